//! Subnet masks, networks and CIDR notation.
//!
//! Only CIDR subnetting is supported; classful networks are not modelled.

use super::Ipv4Address;
use std::{fmt, net::Ipv4Addr, num::ParseIntError, str::FromStr};
use thiserror::Error;

/// An IPv4 subnet mask: some number of leading 1s followed by 0s.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct Ipv4Mask(u32);

impl Ipv4Mask {
    /// `255.255.255.255`, the mask of a single address.
    pub const HOST: Self = Self(u32::MAX);

    /// Returns a mask with `prefix_len` leading 1s, or `None` if
    /// `prefix_len > 32`.
    ///
    /// ```
    /// # use lansim::ipv4::Ipv4Mask;
    /// let mask = Ipv4Mask::from_prefix_len(16).unwrap();
    /// assert_eq!(u32::from(mask), 0xFF_FF_00_00);
    /// ```
    pub const fn from_prefix_len(prefix_len: u32) -> Option<Self> {
        match prefix_len {
            0 => Some(Self(0)),
            1..=32 => Some(Self(u32::MAX << (32 - prefix_len))),
            _ => None,
        }
    }

    /// The number of 1s in this mask.
    pub const fn prefix_len(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn to_ipv4_address(self) -> Ipv4Address {
        Ipv4Address::new(self.0.to_be_bytes())
    }
}

impl fmt::Debug for Ipv4Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ipv4Mask")
            .field(&self.to_ipv4_address())
            .finish()
    }
}

impl fmt::Display for Ipv4Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_ipv4_address(), f)
    }
}

impl From<Ipv4Mask> for u32 {
    fn from(mask: Ipv4Mask) -> u32 {
        mask.0
    }
}

impl From<Ipv4Mask> for Ipv4Address {
    fn from(mask: Ipv4Mask) -> Ipv4Address {
        mask.to_ipv4_address()
    }
}

impl TryFrom<u32> for Ipv4Mask {
    type Error = u32;

    /// Fails, handing the number back, if it has 0s between its 1s.
    fn try_from(mask: u32) -> Result<Ipv4Mask, u32> {
        match Ipv4Mask::from_prefix_len(mask.count_ones()) {
            Some(result) if result.0 == mask => Ok(result),
            _ => Err(mask),
        }
    }
}

impl TryFrom<Ipv4Address> for Ipv4Mask {
    type Error = Ipv4Address;

    fn try_from(mask: Ipv4Address) -> Result<Ipv4Mask, Ipv4Address> {
        Ipv4Mask::try_from(mask.to_u32()).or(Err(mask))
    }
}

/// A network identified by its id (first address) and mask.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ipv4Net {
    // Always a network id, with the host bits cleared.
    id: Ipv4Address,
    mask: Ipv4Mask,
}

impl Ipv4Net {
    /// Creates the network holding `ip` under `mask`.
    pub fn new(ip: Ipv4Address, mask: Ipv4Mask) -> Self {
        Self {
            id: Ipv4Address::from(ip.to_u32() & mask.to_u32()),
            mask,
        }
    }

    /// Creates the `/32` network holding exactly `ip`.
    pub fn single(ip: Ipv4Address) -> Self {
        Self {
            id: ip,
            mask: Ipv4Mask::HOST,
        }
    }

    /// Parses `a.b.c.d/n` into the network it names. Host bits are cleared.
    ///
    /// ```
    /// # use lansim::ipv4::{Ipv4Address, Ipv4Net};
    /// let net = Ipv4Net::from_cidr("10.0.0.119/24").unwrap();
    /// assert_eq!(net.id(), Ipv4Address::new([10, 0, 0, 0]));
    /// assert_eq!(net.broadcast(), Ipv4Address::new([10, 0, 0, 255]));
    /// ```
    pub fn from_cidr(cidr: &str) -> Result<Self, CidrParseError> {
        cidr_to_ip(cidr).map(|(ip, mask)| Self::new(ip, mask))
    }

    pub fn id(&self) -> Ipv4Address {
        self.id
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    pub fn prefix_len(&self) -> u32 {
        self.mask.prefix_len()
    }

    /// The last address in the network.
    pub fn broadcast(&self) -> Ipv4Address {
        Ipv4Address::from(self.id.to_u32() | !self.mask.to_u32())
    }

    pub fn contains(&self, ip: Ipv4Address) -> bool {
        ip.to_u32() & self.mask.to_u32() == self.id.to_u32()
    }

    /// The first and last usable host addresses: everything but the network
    /// id and broadcast address. `/31` and `/32` networks have no reserved
    /// addresses.
    pub fn host_bounds(&self) -> (Ipv4Address, Ipv4Address) {
        match self.prefix_len() {
            31 | 32 => (self.id, self.broadcast()),
            _ => (
                Ipv4Address::from(self.id.to_u32() + 1),
                Ipv4Address::from(self.broadcast().to_u32() - 1),
            ),
        }
    }

    /// Iterates the usable host addresses, as bounded by
    /// [`host_bounds`](Self::host_bounds).
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Address> {
        let (first, last) = self.host_bounds();
        (first.to_u32()..=last.to_u32()).map(Ipv4Address::from)
    }
}

impl fmt::Debug for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ipv4Net({self})")
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.prefix_len())
    }
}

impl FromStr for Ipv4Net {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

/// Splits a string in CIDR notation into the address it names and its mask.
/// Unlike [`Ipv4Net::from_cidr`], host bits are kept.
///
/// ```
/// # use lansim::ipv4::{cidr_to_ip, Ipv4Address};
/// let (ip, mask) = cidr_to_ip("192.168.1.7/24").unwrap();
/// assert_eq!(ip, Ipv4Address::new([192, 168, 1, 7]));
/// assert_eq!(mask.prefix_len(), 24);
/// ```
pub fn cidr_to_ip(cidr: &str) -> Result<(Ipv4Address, Ipv4Mask), CidrParseError> {
    let (ip, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| CidrParseError::MissingSlash(cidr.to_string()))?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| CidrParseError::Ipv4(ip.to_string()))?;
    let prefix: u32 = prefix.parse()?;
    let mask = Ipv4Mask::from_prefix_len(prefix).ok_or(CidrParseError::PrefixTooLong(prefix))?;
    Ok((ip.into(), mask))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CidrParseError {
    #[error("expected an address of the form a.b.c.d/n, got {0:?}")]
    MissingSlash(String),
    #[error("invalid IPv4 address {0:?}")]
    Ipv4(String),
    #[error("invalid prefix length: {0}")]
    Prefix(#[from] ParseIntError),
    #[error("prefix length {0} exceeds 32")]
    PrefixTooLong(u32),
}
