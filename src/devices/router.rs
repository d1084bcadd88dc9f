//! A layer 3 router forwarding by longest prefix match.

mod routing_table;
pub use routing_table::{Route, RouteKind, RoutingTable};

use crate::{
    device::{DeviceCore, DeviceRole},
    id::Mac,
    interface::Interface,
    ipv4::{Ipv4Address, Ipv4Net},
    link::TopologyError,
    packet::Packet,
    protocols::DropReason,
};
use rustc_hash::FxHashMap;
use std::{
    ops::Deref,
    sync::{Arc, Mutex},
};
use tracing::Instrument;

/// An outgoing interface index and a next hop on it.
type HopKey = (usize, Ipv4Address);

/// Forwards IPv4 traffic between its interfaces. Each addressed interface
/// contributes a local and a connected route; further networks are reached
/// through [`add_route`](Router::add_route).
///
/// A packet with no route, or whose next hop does not answer ARP, is dropped
/// and logged. No ICMP errors are generated.
///
/// Packets to the same next hop leave in the order they arrived. While a
/// next hop is being resolved, later packets for it queue behind the first.
#[derive(Debug)]
pub struct Router {
    core: DeviceCore,
    table: RoutingTable,
    /// Packets held until their next hop resolves, oldest first
    unresolved: Mutex<FxHashMap<HopKey, Vec<Packet>>>,
}

impl Router {
    pub(crate) fn new(core: DeviceCore) -> Self {
        Self {
            core,
            table: Default::default(),
            unresolved: Default::default(),
        }
    }

    /// Adds a static route to `cidr` through the neighbour `next_hop`, which
    /// is reached over interface `interface`. `0.0.0.0/0` makes a default
    /// route.
    pub fn add_route(
        &self,
        cidr: &str,
        next_hop: Ipv4Address,
        interface: usize,
    ) -> Result<(), TopologyError> {
        let net = Ipv4Net::from_cidr(cidr)?;
        self.core.interface(interface)?;
        let route = Route {
            net,
            kind: RouteKind::Static { next_hop },
            interface,
        };
        self.core.log().info("Router", format_args!("added route {route}"));
        self.table.add(route);
        Ok(())
    }

    /// The routing table, most specific route first.
    pub fn routes(&self) -> Vec<Route> {
        self.table.routes()
    }

    pub fn lookup(&self, dst: Ipv4Address) -> Option<Route> {
        self.table.lookup(dst)
    }

    /// Consumes traffic addressed to one of the router's own addresses.
    fn deliver_locally(&self, packet: &Packet, iface: &Interface, dst: Ipv4Address) -> Result<(), DropReason> {
        if dst.is_broadcast() || iface.ip() == Some(dst) || packet.icmp().is_none() {
            return self.core.handle_endpoint(packet, iface, None);
        }
        // An echo request for the address of another interface is answered
        // from that address over the interface it came in on
        if let Some(reply) = iface.icmp().handle(iface.mac(), Some(dst), packet, self.core.log())? {
            self.core.send_on(iface, reply)?;
        }
        Ok(())
    }

    /// Sends `packet` towards `dst` along `route`. A cached next hop is used
    /// at once; otherwise the packet waits for a resolution that runs on its
    /// own task.
    fn forward(self: Arc<Self>, packet: Packet, route: Route, dst: Ipv4Address) -> Result<(), DropReason> {
        let next_hop = route.next_hop(dst);
        let out = self
            .core
            .interface(route.interface)
            .map_err(|_| DropReason::NoRoute(dst))?;
        let key = (out.index(), next_hop);

        let mut unresolved = self.unresolved.lock().unwrap();
        if let Some(queue) = unresolved.get_mut(&key) {
            queue.push(packet);
            return Ok(());
        }
        if let Some(mac) = out.arp().table().get_mac(next_hop) {
            return self.send_to(&out, mac, packet);
        }
        unresolved.insert(key, vec![packet]);
        drop(unresolved);

        tokio::spawn(self.clone().resolve_and_flush(out, next_hop).in_current_span());
        Ok(())
    }

    async fn resolve_and_flush(self: Arc<Self>, out: Arc<Interface>, next_hop: Ipv4Address) {
        let resolved = self
            .core
            .resolve(&out, next_hop, self.core.config().arp_timeout)
            .await;
        // Held while flushing so a packet arriving now cannot overtake the queue
        let mut unresolved = self.unresolved.lock().unwrap();
        let queue = unresolved.remove(&(out.index(), next_hop)).unwrap_or_default();
        for packet in queue {
            let sent = match &resolved {
                Ok(mac) => self.send_to(&out, *mac, packet),
                Err(_) => Err(DropReason::Unresolved(next_hop)),
            };
            if let Err(reason) = sent {
                reason.log(self.core.log());
            }
        }
    }

    fn send_to(&self, out: &Interface, mac: Mac, mut packet: Packet) -> Result<(), DropReason> {
        let frame = packet.l2_mut();
        frame.src = out.mac();
        frame.dst = mac;
        if let Some(header) = packet.ipv4() {
            self.core.log().info(
                "Router",
                format_args!("forwarding to {} on eth{}", header.dst, out.index()),
            );
        }
        self.core.send_on(out, packet)?;
        Ok(())
    }
}

impl Deref for Router {
    type Target = DeviceCore;

    fn deref(&self) -> &DeviceCore {
        &self.core
    }
}

impl DeviceRole for Router {
    fn device(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_data(self: Arc<Self>, packet: Packet, iface: Arc<Interface>) -> Result<(), DropReason> {
        let l2_dst = packet.l2().dst;
        if l2_dst != iface.mac() && !l2_dst.is_broadcast() {
            return Err(DropReason::NotForMe);
        }
        let Some(header) = packet.ipv4() else {
            return self.core.handle_endpoint(&packet, &iface, None);
        };
        let dst = header.dst;
        if dst.is_broadcast() || self.core.ips().contains(&dst) {
            return self.deliver_locally(&packet, &iface, dst);
        }

        let route = self.table.lookup(dst).ok_or(DropReason::NoRoute(dst))?;
        self.forward(packet, route, dst)
    }

    fn interface_attached(&self, iface: &Arc<Interface>) {
        let (Some(ip), Some(net)) = (iface.ip(), iface.net()) else {
            return;
        };
        let interface = iface.index();
        self.table.add(Route {
            net: Ipv4Net::single(ip),
            kind: RouteKind::Local,
            interface,
        });
        self.table.add(Route {
            net,
            kind: RouteKind::Connected,
            interface,
        });
    }
}
