use std::{
    fmt::{self, Display},
    net::Ipv4Addr,
};

/// An IPv4 address assigned to an [`Interface`](crate::Interface) or carried
/// in a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    /// The address `0.0.0.0`. Interfaces hold it until they are configured,
    /// and DHCP clients use it as their source before they have a lease.
    pub const UNASSIGNED: Self = Self([0u8, 0, 0, 0]);

    /// The limited broadcast address `255.255.255.255`.
    pub const BROADCAST: Self = Self([255u8, 255, 255, 255]);

    /// The address `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127u8, 0, 0, 1]);

    /// Creates a new address from its four octets.
    pub const fn new(address: [u8; 4]) -> Self {
        Self(address)
    }

    /// Gets the address as a `u32`.
    pub fn to_u32(self) -> u32 {
        self.into()
    }

    /// Gets the address as a `[u8; 4]`.
    pub fn to_bytes(self) -> [u8; 4] {
        self.into()
    }

    /// Whether this is the unassigned sentinel `0.0.0.0`.
    pub fn is_unassigned(self) -> bool {
        self == Self::UNASSIGNED
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl From<u32> for Ipv4Address {
    fn from(n: u32) -> Self {
        Self::from(n.to_be_bytes())
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(n: [u8; 4]) -> Self {
        Self(n)
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(address: Ipv4Addr) -> Self {
        Self(address.octets())
    }
}

impl From<Ipv4Address> for Ipv4Addr {
    fn from(address: Ipv4Address) -> Self {
        Ipv4Addr::from(address.0)
    }
}

impl From<Ipv4Address> for u32 {
    fn from(address: Ipv4Address) -> Self {
        u32::from_be_bytes(address.0)
    }
}

impl From<Ipv4Address> for [u8; 4] {
    fn from(address: Ipv4Address) -> Self {
        address.0
    }
}
