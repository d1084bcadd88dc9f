use crate::ipv4::{Ipv4Address, Ipv4Net};
use std::{fmt, sync::RwLock};

/// How a route reaches its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// The network is one of the router's own addresses.
    Local,
    /// The network is attached to the route's interface.
    Connected,
    /// The network is reached through a neighbouring router.
    Static { next_hop: Ipv4Address },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub net: Ipv4Net,
    pub kind: RouteKind,
    /// Index of the outgoing interface
    pub interface: usize,
}

impl Route {
    /// The address to resolve when forwarding to `dst` along this route.
    pub fn next_hop(&self, dst: Ipv4Address) -> Ipv4Address {
        match self.kind {
            RouteKind::Static { next_hop } => next_hop,
            RouteKind::Local | RouteKind::Connected => dst,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RouteKind::Local => write!(f, "{} local eth{}", self.net, self.interface),
            RouteKind::Connected => write!(f, "{} connected eth{}", self.net, self.interface),
            RouteKind::Static { next_hop } => {
                write!(f, "{} via {} eth{}", self.net, next_hop, self.interface)
            }
        }
    }
}

/// Routes ordered from the longest prefix to the shortest.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: RwLock<Vec<Route>>,
}

impl RoutingTable {
    /// Adds a route. Among routes with equal prefixes, earlier ones win.
    pub fn add(&self, route: Route) {
        let mut routes = self.routes.write().unwrap();
        routes.push(route);
        // Stable, so insertion order breaks ties
        routes.sort_by_key(|route| std::cmp::Reverse(route.net.prefix_len()));
    }

    /// The most specific route whose network holds `dst`.
    pub fn lookup(&self, dst: Ipv4Address) -> Option<Route> {
        self.routes
            .read()
            .unwrap()
            .iter()
            .find(|route| route.net.contains(dst))
            .copied()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(cidr: &str, kind: RouteKind, interface: usize) -> Route {
        Route {
            net: cidr.parse().unwrap(),
            kind,
            interface,
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RoutingTable::default();
        let hop = Ipv4Address::new([192, 168, 0, 2]);
        table.add(route("10.0.0.0/8", RouteKind::Static { next_hop: hop }, 1));
        table.add(route("10.0.0.0/24", RouteKind::Connected, 0));
        table.add(route("0.0.0.0/0", RouteKind::Static { next_hop: hop }, 2));

        let narrow = table.lookup(Ipv4Address::new([10, 0, 0, 9])).unwrap();
        assert_eq!(narrow.interface, 0);
        assert_eq!(narrow.next_hop(Ipv4Address::new([10, 0, 0, 9])), Ipv4Address::new([10, 0, 0, 9]));

        let wide = table.lookup(Ipv4Address::new([10, 7, 0, 9])).unwrap();
        assert_eq!(wide.interface, 1);
        assert_eq!(wide.next_hop(Ipv4Address::new([10, 7, 0, 9])), hop);

        assert_eq!(table.lookup(Ipv4Address::new([8, 8, 8, 8])).unwrap().interface, 2);
        let prefixes: Vec<_> = table.routes().iter().map(|r| r.net.prefix_len()).collect();
        assert_eq!(prefixes, [24, 8, 0]);
    }

    #[test]
    fn no_route_without_default() {
        let table = RoutingTable::default();
        table.add(route("10.0.0.1/32", RouteKind::Local, 0));
        table.add(route("10.0.0.0/24", RouteKind::Connected, 0));
        assert_eq!(table.lookup(Ipv4Address::new([10, 0, 0, 1])).unwrap().kind, RouteKind::Local);
        assert!(table.lookup(Ipv4Address::new([10, 0, 1, 1])).is_none());
    }
}
