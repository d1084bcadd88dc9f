//! The shared machinery of every simulated device.
//!
//! A device is a [`DeviceCore`] (interfaces, mailbox, logger, stop signal)
//! plus a [`DeviceRole`] that decides what to do with each packet. Every
//! device runs one tokio task that drains its mailbox; the blocking request
//! operations ([`send_arp`](DeviceCore::send_arp),
//! [`send_dhcp`](DeviceCore::send_dhcp), [`send_icmp`](DeviceCore::send_icmp))
//! run on the caller's task and wait for the device loop to record the
//! answer.

use crate::{
    config::DeviceConfig,
    id::{DeviceId, LinkId, Mac},
    interface::{Addressing, Interface},
    ipv4::Ipv4Address,
    link::{Link, LinkEnd, TopologyError},
    logging::{Logger, Verbosity},
    packet::{ArpOperation, MalformedPacket, Packet, DHCP_CLIENT_PORT, DHCP_SERVER_PORT},
    protocols::{
        dhcp::{ClientOutcome, ClientTimer, DhcpServerHandler, Lease},
        ArpEntry, DropReason,
    },
    shutdown::Shutdown,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

/// The four kinds of device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    Host,
    Switch,
    Router,
    DhcpServer,
}

impl DeviceKind {
    /// Short prefix used when displaying a [`DeviceId`].
    pub fn prefix(self) -> &'static str {
        match self {
            DeviceKind::Host => "H",
            DeviceKind::Switch => "S",
            DeviceKind::Router => "R",
            DeviceKind::DhcpServer => "D",
        }
    }
}

/// What makes one kind of device behave differently from another.
pub trait DeviceRole: Send + Sync + 'static {
    /// The shared part of the device.
    fn device(&self) -> &DeviceCore;

    fn kind(&self) -> DeviceKind {
        self.device().id().kind()
    }

    /// Called by the device loop with each packet, and the interface it
    /// arrived on.
    fn handle_data(self: Arc<Self>, packet: Packet, iface: Arc<Interface>)
        -> Result<(), DropReason>;

    /// Periodic maintenance, run by the device loop before waiting for each
    /// packet.
    fn check_timeouts(&self) {}

    /// Called once a new interface is fully linked.
    fn interface_attached(&self, _iface: &Arc<Interface>) {}
}

/// The DHCP client transaction [`send_dhcp`](DeviceCore::send_dhcp) starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpContext {
    /// Acquire an address with Discover/Offer/Request/Ack.
    Init,
    /// Extend the current lease with a Request to the leasing server.
    Renew,
}

impl FromStr for DhcpContext {
    type Err = UnknownDhcpContext;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Init" => Ok(Self::Init),
            "Renew" => Ok(Self::Renew),
            other => Err(UnknownDhcpContext(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown DHCP context {0:?}")]
pub struct UnknownDhcpContext(pub String);

/// State shared by every kind of device.
pub struct DeviceCore {
    id: DeviceId,
    config: DeviceConfig,
    interfaces: RwLock<Vec<Arc<Interface>>>,
    /// Addresses for interfaces not created yet, in order
    addresses: Mutex<VecDeque<Addressing>>,
    mailbox: mpsc::UnboundedSender<Packet>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    shutdown: Shutdown,
    log: Logger,
    rng: Mutex<SmallRng>,
}

impl DeviceCore {
    pub(crate) fn new(
        id: DeviceId,
        addresses: Vec<Addressing>,
        config: DeviceConfig,
        seed: u64,
    ) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        Self {
            id,
            log: Logger::new(id, config.verbosity),
            config,
            interfaces: Default::default(),
            addresses: Mutex::new(addresses.into()),
            mailbox,
            inbox: Mutex::new(Some(inbox)),
            shutdown: Shutdown::new(),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn verbosity(&self) -> Verbosity {
        self.log.verbosity()
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.log.set_verbosity(verbosity)
    }

    /// Stops the device loop. Requests waiting on this device fail with
    /// [`RequestError::Stopped`].
    pub fn stop(&self) {
        self.shutdown.shut_down();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_shut_down()
    }

    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.read().unwrap().clone()
    }

    pub fn interface(&self, index: usize) -> Result<Arc<Interface>, TopologyError> {
        self.interfaces
            .read()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or(TopologyError::NoSuchInterface {
                device: self.id,
                index,
            })
    }

    /// The configured addresses of every interface, in interface order.
    pub fn ips(&self) -> Vec<Ipv4Address> {
        self.interfaces().iter().filter_map(|iface| iface.ip()).collect()
    }

    /// The first configured address.
    pub fn ip(&self) -> Option<Ipv4Address> {
        self.interfaces().iter().find_map(|iface| iface.ip())
    }

    /// The ARP cache of interface `index`.
    pub fn arp_cache(&self, index: usize) -> Result<BTreeMap<Ipv4Address, ArpEntry>, TopologyError> {
        Ok(self.interface(index)?.arp().table().snapshot())
    }

    /// The DHCP client lease of interface `index`.
    pub fn lease(&self, index: usize) -> Result<Option<Lease>, TopologyError> {
        Ok(self.interface(index)?.dhcp().state().lease)
    }

    pub(crate) fn interface_for_link(&self, link: LinkId) -> Option<Arc<Interface>> {
        self.interfaces()
            .into_iter()
            .find(|iface| iface.link_id() == link)
    }

    /// Whether any interface of this device is linked to `device`.
    pub(crate) fn linked_to(&self, device: DeviceId) -> bool {
        self.interfaces()
            .iter()
            .flat_map(|iface| iface.link().ends())
            .any(|end| end.device == device)
    }

    /// Attaches a new interface with address `mac` to `link`. It takes the
    /// next unused address this device was built with, if any.
    pub(crate) fn add_interface(
        &self,
        mac: Mac,
        link: Arc<Link>,
    ) -> Result<Arc<Interface>, TopologyError> {
        link.attach(LinkEnd::new(self.id, mac, self.mailbox.clone()))?;
        let mut addressing = self
            .addresses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        if let Some(gateway) = self.config.gateway {
            if addressing.is_configured() && addressing.net().contains(gateway) {
                addressing.gateway = Some(gateway);
            }
        }
        let mut interfaces = self.interfaces.write().unwrap();
        let iface = Arc::new(Interface::new(interfaces.len(), mac, link, addressing));
        interfaces.push(iface.clone());
        Ok(iface)
    }

    pub(crate) fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Packet>> {
        self.inbox.lock().unwrap().take()
    }

    pub(crate) fn with_rng<T>(&self, f: impl FnOnce(&mut SmallRng) -> T) -> T {
        f(&mut self.rng.lock().unwrap())
    }

    /// Sends a copy of `packet` out of interface `iface` (the first interface
    /// if `None`).
    pub fn send(&self, packet: &Packet, iface: Option<usize>) -> Result<(), SendError> {
        let iface = self.interface(iface.unwrap_or(0))?;
        self.send_on(&iface, packet.clone())
    }

    pub(crate) fn send_on(&self, iface: &Interface, packet: Packet) -> Result<(), SendError> {
        self.log.packet("sent", &packet);
        iface.transmit(packet)?;
        Ok(())
    }

    /// Resolves `target` with a fresh ARP request on the interface whose
    /// subnet holds it (the first interface otherwise).
    pub async fn send_arp(&self, target: Ipv4Address) -> Result<Mac, RequestError> {
        let index = self
            .interfaces()
            .iter()
            .find(|iface| iface.net().is_some_and(|net| net.contains(target)))
            .map_or(0, |iface| iface.index());
        self.send_arp_on(target, index, self.config.arp_timeout)
            .await
    }

    /// Resolves `target` with a fresh ARP request on interface `index`.
    /// On failure, no pending entry is left behind.
    pub async fn send_arp_on(
        &self,
        target: Ipv4Address,
        index: usize,
        timeout: Duration,
    ) -> Result<Mac, RequestError> {
        let iface = self.interface(index)?;
        self.arp_request(&iface, target, timeout).await
    }

    async fn arp_request(
        &self,
        iface: &Interface,
        target: Ipv4Address,
        timeout: Duration,
    ) -> Result<Mac, RequestError> {
        let ip = iface.ip().ok_or(RequestError::Unconfigured(iface.index()))?;
        let arp = iface.arp();
        let changes = arp.table().subscribe();
        let request = arp.create(iface.mac(), ip, target)?;
        self.log
            .info("ARP", format_args!("who has {target}? tell {ip}"));
        let result = match self.send_on(iface, request) {
            Ok(()) => {
                self.wait_until(changes, timeout, || arp.table().get_mac(target))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            arp.abandon(target);
            self.log
                .error("ARP", format_args!("resolving {target} failed: {e}"));
        }
        result
    }

    /// The MAC for `next_hop` from the cache of `iface`, or from a fresh
    /// ARP exchange if it is not cached.
    pub async fn resolve(
        &self,
        iface: &Interface,
        next_hop: Ipv4Address,
        timeout: Duration,
    ) -> Result<Mac, RequestError> {
        match iface.arp().table().get_mac(next_hop) {
            Some(mac) => Ok(mac),
            None => self.arp_request(iface, next_hop, timeout).await,
        }
    }

    /// Runs a DHCP client transaction on the first interface.
    pub async fn send_dhcp(&self, context: DhcpContext) -> Result<Lease, RequestError> {
        self.send_dhcp_on(context, 0, self.config.dhcp_timeout).await
    }

    /// Runs a DHCP client transaction on interface `index`, returning the
    /// lease it ends with.
    pub async fn send_dhcp_on(
        &self,
        context: DhcpContext,
        index: usize,
        timeout: Duration,
    ) -> Result<Lease, RequestError> {
        let iface = self.interface(index)?;
        let dhcp = iface.dhcp();
        let xid = self.with_rng(|rng| rng.gen());
        let changes = dhcp.subscribe();
        let message = match context {
            DhcpContext::Init => dhcp.discover(iface.mac(), xid)?,
            DhcpContext::Renew => dhcp.renew(iface.mac(), xid)?,
        };
        self.log
            .info("DHCP", format_args!("sending {context:?} transaction {xid:#x}"));
        let result = match self.send_on(&iface, message) {
            Ok(()) => {
                self.wait_until(changes, timeout, || {
                    dhcp.completed(xid).then(|| dhcp.state().lease).flatten()
                })
                .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            if let Some(lease) = dhcp.abandon(xid) {
                return Ok(lease);
            }
            self.log
                .error("DHCP", format_args!("{context:?} failed: {e}"));
        }
        result
    }

    /// The interface to reach `target` through and the next hop on it: the
    /// target itself when an interface's subnet holds it, else the gateway of
    /// the first interface that has one.
    pub fn next_hop(&self, target: Ipv4Address) -> Result<(Arc<Interface>, Ipv4Address), RequestError> {
        let interfaces = self.interfaces();
        if let Some(iface) = interfaces
            .iter()
            .find(|iface| iface.net().is_some_and(|net| net.contains(target)))
        {
            return Ok((iface.clone(), target));
        }
        interfaces
            .iter()
            .find_map(|iface| {
                let gateway = iface.gateway()?;
                iface.ip().map(|_| (iface.clone(), gateway))
            })
            .ok_or(RequestError::NoRoute(target))
    }

    /// Pings `target`, waiting up to the configured ICMP timeout.
    pub async fn send_icmp(&self, target: Ipv4Address) -> Result<(), RequestError> {
        self.send_icmp_with(target, self.config.icmp_timeout).await
    }

    /// Pings `target`. The next hop is resolved first; `timeout` covers only
    /// the echo itself.
    pub async fn send_icmp_with(
        &self,
        target: Ipv4Address,
        timeout: Duration,
    ) -> Result<(), RequestError> {
        let (iface, next_hop) = self.next_hop(target)?;
        let ip = iface.ip().ok_or(RequestError::Unconfigured(iface.index()))?;
        let dst_mac = self
            .resolve(&iface, next_hop, self.config.arp_timeout)
            .await?;

        let icmp = iface.icmp();
        let identifier = self.with_rng(|rng| loop {
            let candidate: u16 = rng.gen();
            if !icmp.is_outstanding(candidate) {
                break candidate;
            }
        });
        let changes = icmp.subscribe();
        let request = icmp.create(identifier, (iface.mac(), dst_mac), (ip, target))?;
        self.log.info(
            "ICMP",
            format_args!("echo request {identifier} to {target} via {next_hop}"),
        );
        let result = match self.send_on(&iface, request) {
            Ok(()) => {
                self.wait_until(changes, timeout, || {
                    (icmp.answered(identifier) == Some(true)).then_some(())
                })
                .await
            }
            Err(e) => Err(e.into()),
        };
        icmp.remove(identifier);
        if let Err(e) = &result {
            self.log
                .error("ICMP", format_args!("no echo reply from {target}: {e}"));
        }
        result
    }

    /// Waits until `check` passes, re-checking each time `changes` fires.
    async fn wait_until<T>(
        &self,
        mut changes: watch::Receiver<()>,
        timeout: Duration,
        mut check: impl FnMut() -> Option<T>,
    ) -> Result<T, RequestError> {
        let wait = async {
            loop {
                if let Some(value) = check() {
                    return Ok(value);
                }
                if changes.changed().await.is_err() {
                    return Err(RequestError::Stopped);
                }
            }
        };
        tokio::select! {
            result = tokio::time::timeout(timeout, wait) => {
                result.unwrap_or(Err(RequestError::Timeout(timeout)))
            }
            _ = self.shutdown.wait_for_shutdown() => Err(RequestError::Stopped),
        }
    }

    /// Handles a packet as an addressed endpoint would: ARP, ICMP echo, and
    /// DHCP. DHCP server traffic goes to `server` if the device runs one.
    pub(crate) fn handle_endpoint(
        &self,
        packet: &Packet,
        iface: &Interface,
        server: Option<&DhcpServerHandler>,
    ) -> Result<(), DropReason> {
        let dst = packet.l2().dst;
        if dst != iface.mac() && !dst.is_broadcast() {
            return Err(DropReason::NotForMe);
        }

        if let Some(arp) = packet.arp() {
            // Requests are only answered when broadcast
            if arp.op == ArpOperation::Request && !dst.is_broadcast() {
                return Err(DropReason::NotForMe);
            }
            if let Some(reply) = iface.arp().handle(iface.mac(), iface.ip(), arp, &self.log)? {
                self.send_on(iface, reply)?;
            }
            return Ok(());
        }

        let header = packet.ipv4().ok_or(DropReason::Unhandled("bare frame"))?;
        if !header.dst.is_broadcast() && Some(header.dst) != iface.ip() {
            return Err(DropReason::NotForMe);
        }

        if packet.icmp().is_some() {
            if let Some(reply) = iface.icmp().handle(iface.mac(), iface.ip(), packet, &self.log)? {
                self.send_on(iface, reply)?;
            }
            return Ok(());
        }

        let datagram = packet.udp().ok_or(DropReason::Unhandled("IPv4 payload"))?;
        let record = packet.dhcp().ok_or(DropReason::Unhandled("UDP payload"))?;
        match (datagram.dst_port, server) {
            (DHCP_CLIENT_PORT, _) => match iface.dhcp().handle(iface.mac(), packet, record, &self.log)? {
                ClientOutcome::Reply(reply) => self.send_on(iface, reply)?,
                ClientOutcome::Bound(lease) => iface.set_addressing(Addressing {
                    ip: lease.ip,
                    mask: lease.mask,
                    gateway: lease.gateway,
                }),
            },
            (DHCP_SERVER_PORT, Some(server)) => {
                let reply = self.with_rng(|rng| {
                    server.handle(iface.mac(), packet, record, rng, &self.log)
                })?;
                self.send_on(iface, reply)?;
            }
            (DHCP_SERVER_PORT, None) => return Err(DropReason::NotForMe),
            _ => return Err(DropReason::Unhandled("UDP port")),
        }
        Ok(())
    }

    /// Renews, times out and expires the DHCP client leases of every
    /// interface.
    pub(crate) fn check_dhcp_timers(&self) {
        let now = Instant::now();
        for iface in self.interfaces() {
            let dhcp = iface.dhcp();
            match dhcp.check_timers(now, self.config.dhcp_timeout) {
                Some(ClientTimer::Renew) => {
                    let xid = self.with_rng(|rng| rng.gen());
                    let renewal = dhcp
                        .renew(iface.mac(), xid)
                        .and_then(|packet| Ok(self.send_on(&iface, packet)?));
                    match renewal {
                        Ok(()) => self.log.info(
                            "DHCP",
                            format_args!("renewing {}", iface.addressing().ip),
                        ),
                        Err(e) => self.log.error("DHCP", format_args!("renewal failed: {e}")),
                    }
                }
                Some(ClientTimer::RenewTimedOut) => {
                    self.log.warn("DHCP", "renewal went unanswered");
                }
                Some(ClientTimer::Expired(ip)) => {
                    iface.set_addressing(Addressing::UNASSIGNED);
                    self.log
                        .warn("DHCP", format_args!("lease on {ip} expired, releasing it"));
                }
                None => {}
            }
        }
    }
}

impl fmt::Display for DeviceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        for iface in self.interfaces() {
            write!(f, "\n  {iface}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCore")
            .field("id", &self.id)
            .field("interfaces", &self.interfaces())
            .finish()
    }
}

/// Drains the device's mailbox until it is stopped.
pub(crate) async fn run(role: Arc<dyn DeviceRole>) {
    let core = role.device();
    let Some(mut inbox) = core.take_inbox() else {
        core.log.error("Device", "device loop started twice");
        return;
    };
    let shutdown = core.shutdown.clone();
    let mut tick = tokio::time::interval(core.config.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        role.check_timeouts();
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            packet = inbox.recv() => match packet {
                Some(packet) => receive(&role, packet),
                None => break,
            },
            _ = tick.tick() => {}
        }
    }
    core.log.info("Device", "stopped");
}

fn receive(role: &Arc<dyn DeviceRole>, packet: Packet) {
    let core = role.device();
    core.log.packet("received", &packet);
    let ingress = packet.l2().ingress;
    let result = match ingress.and_then(|link| core.interface_for_link(link)) {
        Some(iface) => role.clone().handle_data(packet, iface),
        None => Err(DropReason::UnknownIngress(ingress)),
    };
    if let Err(reason) = result {
        reason.log(&core.log);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Malformed(#[from] MalformedPacket),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("{0} has stopped")]
    PeerStopped(DeviceId),
}

/// Why a blocking request ([`send_arp`](DeviceCore::send_arp) and friends)
/// failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("the device was stopped")]
    Stopped,
    #[error("interface {0} has no address")]
    Unconfigured(usize),
    #[error("no interface can reach {0}")]
    NoRoute(Ipv4Address),
    #[error("there is no lease to renew")]
    NoLease,
    #[error(transparent)]
    Send(#[from] SendError),
}

impl From<MalformedPacket> for RequestError {
    fn from(e: MalformedPacket) -> Self {
        Self::Send(e.into())
    }
}

impl From<TopologyError> for RequestError {
    fn from(e: TopologyError) -> Self {
        Self::Send(e.into())
    }
}
