use super::{encapsulate, Pool};
use crate::{
    config::DhcpServerConfig,
    id::Mac,
    ipv4::{Ipv4Address, Ipv4Mask, Ipv4Net},
    logging::Logger,
    packet::{
        dhcp_message, DhcpOp, DhcpOptions, DhcpRecord, MessageType, Packet, DHCP_CLIENT_PORT,
        DHCP_SERVER_PORT,
    },
    protocols::DropReason,
    FxDashMap,
};
use rand::Rng;
use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

/// Who a lease belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientId {
    /// The client named itself in option 61.
    Hardware(Mac),
    /// No option 61: the frame's sender together with the leased address.
    Composite(Mac, Ipv4Address),
}

impl ClientId {
    pub fn mac(&self) -> Mac {
        match self {
            ClientId::Hardware(mac) | ClientId::Composite(mac, _) => *mac,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Hardware(mac) => write!(f, "{mac}"),
            ClientId::Composite(mac, ip) => write!(f, "{mac}@{ip}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Reserved by an Offer, not yet requested.
    Offered,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRecord {
    pub client: ClientId,
    pub duration: Duration,
    pub start: Instant,
    pub state: LeaseState,
}

impl LeaseRecord {
    pub fn expired(&self, now: Instant) -> bool {
        self.start + self.duration <= now
    }
}

/// Option codes every Offer and Ack carries.
const BASE_OPTIONS: [u8; 6] = [
    DhcpOptions::SUBNET_MASK,
    DhcpOptions::ROUTER,
    DhcpOptions::DNS,
    DhcpOptions::LEASE_TIME,
    DhcpOptions::MESSAGE_TYPE,
    DhcpOptions::SERVER_ID,
];

/// Further option codes the server fills in when a client asks for them.
const EXTRA_OPTIONS: [u8; 1] = [DhcpOptions::BROADCAST_ADDRESS];

/// The allocation and lease-tracking side of DHCP.
pub struct DhcpServerHandler {
    ip: Ipv4Address,
    mask: Ipv4Mask,
    config: DhcpServerConfig,
    pool: Pool,
    leases: FxDashMap<Ipv4Address, LeaseRecord>,
}

impl DhcpServerHandler {
    /// A server at `ip`/`mask`.
    pub fn new(ip: Ipv4Address, mask: Ipv4Mask, config: DhcpServerConfig) -> Self {
        let subnet = Ipv4Net::new(ip, mask);
        let mut reserved = vec![ip];
        reserved.extend(config.gateway);
        let pool = Pool::new(config.pool, subnet, &reserved);
        Self {
            ip,
            mask,
            config,
            pool,
            leases: Default::default(),
        }
    }

    pub fn ip(&self) -> Ipv4Address {
        self.ip
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn config(&self) -> &DhcpServerConfig {
        &self.config
    }

    /// The lease table, ordered by address.
    pub fn leases(&self) -> BTreeMap<Ipv4Address, LeaseRecord> {
        self.leases
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    fn options(&self, message_type: MessageType, requested: &[u8]) -> DhcpOptions {
        let mut options = DhcpOptions::of_type(message_type);
        let extras = EXTRA_OPTIONS.iter().filter(|code| requested.contains(code));
        for code in BASE_OPTIONS.iter().chain(extras) {
            match *code {
                DhcpOptions::SUBNET_MASK => options.subnet_mask = Some(self.mask),
                DhcpOptions::ROUTER => {
                    options.router = Some(self.config.gateway.unwrap_or(self.ip))
                }
                DhcpOptions::DNS => options.dns = Some(self.config.dns.clone()),
                DhcpOptions::BROADCAST_ADDRESS => {
                    options.broadcast_address = Some(Ipv4Net::new(self.ip, self.mask).broadcast())
                }
                DhcpOptions::LEASE_TIME => options.lease_time = Some(self.config.lease_time),
                DhcpOptions::SERVER_ID => options.server_id = Some(self.ip),
                _ => {}
            }
        }
        options
    }

    /// Builds the reply to `request`, honouring its broadcast flag.
    fn reply(
        &self,
        mac: Mac,
        packet: &Packet,
        request: &DhcpRecord,
        message_type: MessageType,
        yiaddr: Ipv4Address,
    ) -> Result<Packet, DropReason> {
        let options = self.options(message_type, &request.options.parameter_request);
        let mut record = dhcp_message(DhcpOp::BootReply, request.xid, request.chaddr, options)
            .with_yiaddr(yiaddr)
            .with_siaddr(self.ip);
        record.flags = request.flags;
        let dst_mac = if request.wants_broadcast() {
            Mac::BROADCAST
        } else {
            packet.l2().src
        };
        Ok(encapsulate(
            (mac, dst_mac),
            (self.ip, Ipv4Address::BROADCAST),
            (DHCP_SERVER_PORT, DHCP_CLIENT_PORT),
            record,
        )?)
    }

    /// Processes a client message that reached the server's interface with
    /// address `mac`. Returns the Offer or Ack to send back.
    pub fn handle(
        &self,
        mac: Mac,
        packet: &Packet,
        record: &DhcpRecord,
        rng: &mut impl Rng,
        log: &Logger,
    ) -> Result<Packet, DropReason> {
        if record.op != DhcpOp::BootRequest {
            return Err(DropReason::NotForMe);
        }
        let client_mac = record.options.client_id.unwrap_or(packet.l2().src);

        match record.message_type() {
            Some(MessageType::Discover) => {
                log.info("DHCP", format_args!("Discover from {client_mac}"));
                let ip = self.offer(client_mac, rng)?;
                log.info("DHCP", format_args!("offering {ip} to {client_mac}"));
                self.reply(mac, packet, record, MessageType::Offer, ip)
            }
            Some(MessageType::Request) => {
                if record.options.server_id.is_some_and(|id| id != self.ip) {
                    return Err(DropReason::NotForMe);
                }
                let ip = if record.ciaddr.is_unassigned() {
                    record.options.requested_ip.ok_or_else(|| {
                        DropReason::violation("DHCP", "Request without an address")
                    })?
                } else {
                    record.ciaddr
                };
                let client = match record.options.client_id {
                    Some(id) => ClientId::Hardware(id),
                    None => ClientId::Composite(packet.l2().src, ip),
                };
                self.leases.insert(
                    ip,
                    LeaseRecord {
                        client,
                        duration: self.config.lease_time,
                        start: Instant::now(),
                        state: LeaseState::Active,
                    },
                );
                log.info("DHCP", format_args!("leased {ip} to {client}"));
                self.reply(mac, packet, record, MessageType::Ack, ip)
            }
            Some(other) => Err(DropReason::violation(
                "DHCP",
                format!("unsupported {other:?} from {client_mac}"),
            )),
            None => Err(DropReason::violation("DHCP", "message without option 53")),
        }
    }

    /// Reserves an address for `client`: the one it already holds, if any,
    /// or a free one from the pool.
    fn offer(&self, client: Mac, rng: &mut impl Rng) -> Result<Ipv4Address, DropReason> {
        let now = Instant::now();
        let held = self
            .leases
            .iter()
            .find(|entry| entry.client.mac() == client && !entry.expired(now))
            .map(|entry| *entry.key());
        if let Some(ip) = held {
            if let Some(mut lease) = self.leases.get_mut(&ip) {
                if lease.state == LeaseState::Offered {
                    lease.start = now;
                }
            }
            return Ok(ip);
        }

        let ip = self
            .pool
            .allocate(rng, |ip| {
                self.leases
                    .get(&ip)
                    .map_or(true, |lease| lease.expired(now))
            })
            .ok_or(DropReason::PoolExhausted)?;
        self.leases.insert(
            ip,
            LeaseRecord {
                client: ClientId::Hardware(client),
                duration: self.config.offer_hold(),
                start: now,
                state: LeaseState::Offered,
            },
        );
        Ok(ip)
    }

    /// Deletes every lease whose time is up. Returns the freed addresses.
    pub fn expire(&self, now: Instant) -> Vec<Ipv4Address> {
        let expired: Vec<_> = self
            .leases
            .iter()
            .filter(|entry| entry.expired(now))
            .map(|entry| *entry.key())
            .collect();
        for ip in &expired {
            self.leases.remove_if(ip, |_, lease| lease.expired(now));
        }
        expired
    }
}
