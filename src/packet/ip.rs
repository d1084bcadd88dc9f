use crate::ipv4::Ipv4Address;

/// The IP protocol numbers of the payloads the simulation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Icmp = 1,
    Udp = 17,
}

/// The L3 record of IP traffic. Routers forward it untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub protocol: IpProtocol,
}

pub fn ipv4(src: Ipv4Address, dst: Ipv4Address, protocol: IpProtocol) -> Ipv4Header {
    Ipv4Header { src, dst, protocol }
}
