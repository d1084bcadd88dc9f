use super::{encapsulate, REQUESTED_OPTIONS};
use crate::{
    device::RequestError,
    id::Mac,
    ipv4::{Ipv4Address, Ipv4Mask},
    logging::Logger,
    packet::{
        dhcp_message, DhcpOp, DhcpOptions, DhcpRecord, MalformedPacket, MessageType, Packet,
        DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
    },
    protocols::DropReason,
};
use std::{
    sync::RwLock,
    time::{Duration, Instant},
};
use tokio::sync::watch;

/// Where a client is in acquiring an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientPhase {
    #[default]
    NoLease,
    /// A Request is out, from accepting an Offer or from a renewal.
    AwaitingAck,
    Leased,
}

/// An address the client holds, and what the server said about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Address,
    pub mask: Ipv4Mask,
    pub gateway: Option<Ipv4Address>,
    pub duration: Duration,
    pub start: Instant,
    pub server_id: Ipv4Address,
    pub server_mac: Mac,
}

impl Lease {
    pub fn expires(&self) -> Instant {
        self.start + self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires().saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpClientState {
    pub phase: ClientPhase,
    /// The outstanding transaction, if any.
    pub xid: Option<u32>,
    pub offered_ip: Option<Ipv4Address>,
    pub server_id: Option<Ipv4Address>,
    pub server_mac: Option<Mac>,
    pub lease: Option<Lease>,
    /// The last transaction to end in an Ack.
    pub acked: Option<u32>,
    renewing_since: Option<Instant>,
}

/// What periodic maintenance found the client needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTimer {
    /// Half the lease is gone; time to send a renewal.
    Renew,
    /// A renewal went unanswered; the client is back to `Leased`.
    RenewTimedOut,
    /// The lease ran out. The address must be given up.
    Expired(Ipv4Address),
}

/// What handling a server message produced.
#[derive(Debug)]
pub enum ClientOutcome {
    /// Send this back to the server.
    Reply(Packet),
    /// The exchange finished; configure the interface from this lease.
    Bound(Lease),
}

/// The DHCP client of one interface.
pub struct DhcpClient {
    state: RwLock<DhcpClientState>,
    update: watch::Sender<()>,
}

impl Default for DhcpClient {
    fn default() -> Self {
        Self {
            state: Default::default(),
            update: watch::channel(()).0,
        }
    }
}

impl DhcpClient {
    pub fn state(&self) -> DhcpClientState {
        self.state.read().unwrap().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.update.subscribe()
    }

    /// Whether transaction `xid` ended in an Ack.
    pub fn completed(&self, xid: u32) -> bool {
        self.state.read().unwrap().acked == Some(xid)
    }

    fn base_options(mac: Mac, message_type: MessageType) -> DhcpOptions {
        DhcpOptions {
            client_id: Some(mac),
            parameter_request: REQUESTED_OPTIONS.to_vec(),
            ..DhcpOptions::of_type(message_type)
        }
    }

    /// Starts transaction `xid` with a broadcast Discover.
    pub fn discover(&self, mac: Mac, xid: u32) -> Result<Packet, MalformedPacket> {
        let record = dhcp_message(
            DhcpOp::BootRequest,
            xid,
            mac,
            Self::base_options(mac, MessageType::Discover),
        );
        let packet = encapsulate(
            (mac, Mac::BROADCAST),
            (Ipv4Address::UNASSIGNED, Ipv4Address::BROADCAST),
            (DHCP_CLIENT_PORT, DHCP_SERVER_PORT),
            record,
        )?;
        self.state.write().unwrap().xid = Some(xid);
        self.update.send_replace(());
        Ok(packet)
    }

    /// Starts transaction `xid` by asking the leasing server, directly, to
    /// extend the current lease.
    pub fn renew(&self, mac: Mac, xid: u32) -> Result<Packet, RequestError> {
        let mut state = self.state.write().unwrap();
        let lease = state.lease.ok_or(RequestError::NoLease)?;
        let record = dhcp_message(
            DhcpOp::BootRequest,
            xid,
            mac,
            Self::base_options(mac, MessageType::Request),
        )
        .with_ciaddr(lease.ip);
        let packet = encapsulate(
            (mac, lease.server_mac),
            (lease.ip, lease.server_id),
            (DHCP_CLIENT_PORT, DHCP_SERVER_PORT),
            record,
        )?;
        state.phase = ClientPhase::AwaitingAck;
        state.xid = Some(xid);
        state.renewing_since = Some(Instant::now());
        drop(state);
        self.update.send_replace(());
        Ok(packet)
    }

    /// Gives up on transaction `xid` after the caller stopped waiting for it.
    /// A failed renewal falls back to the lease still held.
    ///
    /// An Ack can land between the caller's timeout and this call. Then
    /// nothing is abandoned and the lease it bound is returned.
    pub fn abandon(&self, xid: u32) -> Option<Lease> {
        let mut state = self.state.write().unwrap();
        if state.acked == Some(xid) {
            return state.lease;
        }
        if state.xid != Some(xid) {
            return None;
        }
        state.xid = None;
        state.renewing_since = None;
        if state.lease.is_some() {
            state.phase = ClientPhase::Leased;
        } else {
            state.phase = ClientPhase::NoLease;
            state.offered_ip = None;
            state.server_id = None;
            state.server_mac = None;
        }
        drop(state);
        self.update.send_replace(());
        None
    }

    /// Processes a DHCP message that reached the interface with address
    /// `mac`.
    pub fn handle(
        &self,
        mac: Mac,
        packet: &Packet,
        record: &DhcpRecord,
        log: &Logger,
    ) -> Result<ClientOutcome, DropReason> {
        if record.op != DhcpOp::BootReply || record.chaddr != mac {
            return Err(DropReason::NotForMe);
        }
        let mut state = self.state.write().unwrap();
        if state.xid != Some(record.xid) {
            return Err(DropReason::unexpected(
                "DHCP",
                format!("ignoring DHCP from {}", packet.l2().src),
            ));
        }

        match record.message_type() {
            Some(MessageType::Offer) if state.phase != ClientPhase::AwaitingAck => {
                let server_id = record
                    .options
                    .server_id
                    .or_else(|| packet.ipv4().map(|header| header.src))
                    .unwrap_or(record.siaddr);
                state.phase = ClientPhase::AwaitingAck;
                state.offered_ip = Some(record.yiaddr);
                state.server_id = Some(server_id);
                state.server_mac = Some(packet.l2().src);
                drop(state);
                self.update.send_replace(());
                log.info(
                    "DHCP",
                    format_args!("offered {} by {server_id}, requesting it", record.yiaddr),
                );

                let options = DhcpOptions {
                    requested_ip: Some(record.yiaddr),
                    server_id: Some(server_id),
                    ..Self::base_options(mac, MessageType::Request)
                };
                let request =
                    dhcp_message(DhcpOp::BootRequest, record.xid, mac, options).with_broadcast();
                let reply = encapsulate(
                    (mac, Mac::BROADCAST),
                    (Ipv4Address::UNASSIGNED, Ipv4Address::BROADCAST),
                    (DHCP_CLIENT_PORT, DHCP_SERVER_PORT),
                    request,
                )?;
                Ok(ClientOutcome::Reply(reply))
            }
            Some(MessageType::Ack) if state.phase == ClientPhase::AwaitingAck => {
                let duration = record.options.lease_time.ok_or_else(|| {
                    DropReason::violation("DHCP", "Ack without a lease time")
                })?;
                let lease = Lease {
                    ip: record.yiaddr,
                    mask: record.options.subnet_mask.unwrap_or(Ipv4Mask::HOST),
                    gateway: record.options.router,
                    duration,
                    start: Instant::now(),
                    server_id: state
                        .server_id
                        .or(record.options.server_id)
                        .unwrap_or(record.siaddr),
                    server_mac: state.server_mac.unwrap_or(packet.l2().src),
                };
                state.phase = ClientPhase::Leased;
                state.lease = Some(lease);
                state.acked = state.xid.take();
                state.offered_ip = None;
                state.server_id = Some(lease.server_id);
                state.server_mac = Some(lease.server_mac);
                state.renewing_since = None;
                drop(state);
                self.update.send_replace(());
                log.info(
                    "DHCP",
                    format_args!(
                        "leased {} for {}s from {}",
                        lease.ip,
                        duration.as_secs_f32(),
                        lease.server_id
                    ),
                );
                Ok(ClientOutcome::Bound(lease))
            }
            Some(other) => Err(DropReason::unexpected(
                "DHCP",
                format!("{other:?} while {:?}", state.phase),
            )),
            None => Err(DropReason::violation("DHCP", "message without option 53")),
        }
    }

    /// Renewal and expiry bookkeeping. Renewal is due once at most half the
    /// lease remains.
    pub fn check_timers(&self, now: Instant, renew_timeout: Duration) -> Option<ClientTimer> {
        let mut state = self.state.write().unwrap();
        let lease = state.lease?;
        let timer = if now >= lease.expires() {
            *state = DhcpClientState {
                acked: state.acked,
                ..Default::default()
            };
            ClientTimer::Expired(lease.ip)
        } else if state.phase == ClientPhase::AwaitingAck {
            match state.renewing_since {
                Some(since) if now.saturating_duration_since(since) >= renew_timeout => {
                    state.phase = ClientPhase::Leased;
                    state.xid = None;
                    state.renewing_since = None;
                    ClientTimer::RenewTimedOut
                }
                _ => return None,
            }
        } else if lease.remaining(now) <= lease.duration / 2 {
            return Some(ClientTimer::Renew);
        } else {
            return None;
        };
        drop(state);
        self.update.send_replace(());
        Some(timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::DeviceKind, id::DeviceId, logging::Verbosity};

    const CLIENT: Mac = Mac::new(0x10);
    const SERVER: Mac = Mac::new(0x20);
    const SERVER_IP: Ipv4Address = Ipv4Address::new([10, 10, 10, 1]);
    const OFFERED: Ipv4Address = Ipv4Address::new([10, 10, 10, 7]);

    fn log() -> Logger {
        Logger::new(DeviceId::new(DeviceKind::Host, 1), Verbosity::Silent)
    }

    fn from_server(xid: u32, message_type: MessageType, lease_time: Duration) -> Packet {
        let options = DhcpOptions {
            subnet_mask: Ipv4Mask::from_prefix_len(24),
            router: Some(SERVER_IP),
            lease_time: Some(lease_time),
            server_id: Some(SERVER_IP),
            ..DhcpOptions::of_type(message_type)
        };
        let record = dhcp_message(DhcpOp::BootReply, xid, CLIENT, options).with_yiaddr(OFFERED);
        encapsulate(
            (SERVER, CLIENT),
            (SERVER_IP, Ipv4Address::BROADCAST),
            (DHCP_SERVER_PORT, DHCP_CLIENT_PORT),
            record,
        )
        .unwrap()
    }

    fn deliver(client: &DhcpClient, packet: &Packet) -> Result<ClientOutcome, DropReason> {
        client.handle(CLIENT, packet, packet.dhcp().unwrap(), &log())
    }

    fn leased_client(lease_time: Duration) -> DhcpClient {
        let client = DhcpClient::default();
        client.discover(CLIENT, 5).unwrap();
        deliver(&client, &from_server(5, MessageType::Offer, lease_time)).unwrap();
        deliver(&client, &from_server(5, MessageType::Ack, lease_time)).unwrap();
        client
    }

    #[test]
    fn offer_then_ack() {
        let client = DhcpClient::default();
        let discover = client.discover(CLIENT, 5).unwrap();
        let record = discover.dhcp().unwrap();
        assert_eq!(record.message_type(), Some(MessageType::Discover));
        assert!(!record.wants_broadcast());
        assert_eq!(discover.l2().dst, Mac::BROADCAST);

        let offer = from_server(5, MessageType::Offer, Duration::from_secs(20));
        let ClientOutcome::Reply(request) = deliver(&client, &offer).unwrap() else {
            panic!("an offer should be answered");
        };
        let request = request.dhcp().unwrap();
        assert_eq!(request.message_type(), Some(MessageType::Request));
        assert_eq!(request.options.requested_ip, Some(OFFERED));
        assert_eq!(request.options.server_id, Some(SERVER_IP));
        assert!(request.wants_broadcast());
        assert_eq!(client.state().phase, ClientPhase::AwaitingAck);

        let ack = from_server(5, MessageType::Ack, Duration::from_secs(20));
        let ClientOutcome::Bound(lease) = deliver(&client, &ack).unwrap() else {
            panic!("an ack should bind");
        };
        assert_eq!(lease.ip, OFFERED);
        assert_eq!(lease.mask.prefix_len(), 24);
        assert_eq!(lease.gateway, Some(SERVER_IP));
        assert_eq!(lease.server_mac, SERVER);
        let state = client.state();
        assert_eq!(state.phase, ClientPhase::Leased);
        assert_eq!(state.xid, None);
        assert!(client.completed(5));
    }

    #[test]
    fn mismatched_transactions_ignored() {
        let client = DhcpClient::default();
        client.discover(CLIENT, 5).unwrap();
        let lease_time = Duration::from_secs(20);
        let result = deliver(&client, &from_server(6, MessageType::Offer, lease_time));
        assert!(matches!(
            result,
            Err(DropReason::UnexpectedTransaction { .. })
        ));
        assert_eq!(client.state().phase, ClientPhase::NoLease);

        // An Ack before any Offer does not bind
        let result = deliver(&client, &from_server(5, MessageType::Ack, lease_time));
        assert!(result.is_err());
        assert_eq!(client.state().lease, None);
    }

    #[test]
    fn renew_requires_lease() {
        let client = DhcpClient::default();
        assert!(matches!(client.renew(CLIENT, 1), Err(RequestError::NoLease)));

        let client = leased_client(Duration::from_secs(20));
        let renewal = client.renew(CLIENT, 9).unwrap();
        let record = renewal.dhcp().unwrap();
        assert_eq!(record.ciaddr, OFFERED);
        assert_eq!(renewal.l2().dst, SERVER);
        assert_eq!(renewal.ipv4().unwrap().dst, SERVER_IP);
        assert_eq!(client.state().phase, ClientPhase::AwaitingAck);

        client.abandon(9);
        assert_eq!(client.state().phase, ClientPhase::Leased);
    }

    #[test]
    fn timers_follow_the_lease() {
        let client = leased_client(Duration::from_secs(20));
        let start = client.state().lease.unwrap().start;
        let timeout = Duration::from_secs(5);

        assert_eq!(client.check_timers(start + Duration::from_secs(5), timeout), None);
        assert_eq!(
            client.check_timers(start + Duration::from_secs(10), timeout),
            Some(ClientTimer::Renew)
        );

        client.renew(CLIENT, 11).unwrap();
        let since = client.state().renewing_since.unwrap();
        assert_eq!(client.check_timers(since + Duration::from_secs(1), timeout), None);
        assert_eq!(
            client.check_timers(since + timeout, timeout),
            Some(ClientTimer::RenewTimedOut)
        );
        assert_eq!(client.state().phase, ClientPhase::Leased);

        assert_eq!(
            client.check_timers(start + Duration::from_secs(20), timeout),
            Some(ClientTimer::Expired(OFFERED))
        );
        let state = client.state();
        assert_eq!(state.phase, ClientPhase::NoLease);
        assert_eq!(state.lease, None);
    }

    #[test]
    fn abandoned_discover_clears_transaction() {
        let client = DhcpClient::default();
        client.discover(CLIENT, 3).unwrap();
        client.abandon(3);
        let state = client.state();
        assert_eq!(state.xid, None);
        assert_eq!(state.phase, ClientPhase::NoLease);
    }

    #[test]
    fn abandoning_after_a_late_ack_keeps_the_lease() {
        let client = leased_client(Duration::from_secs(20));
        let lease = client.abandon(5).unwrap();
        assert_eq!(lease.ip, OFFERED);
        assert_eq!(client.state().phase, ClientPhase::Leased);
        assert_eq!(client.state().lease, Some(lease));
    }
}
