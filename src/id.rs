use crate::device::DeviceKind;
use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicU64, Ordering},
};

/// Identifies a device within its [`Lan`](crate::Lan).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    kind: DeviceKind,
    number: u64,
}

impl DeviceId {
    pub const fn new(kind: DeviceKind, number: u64) -> Self {
        Self { kind, number }
    }

    pub fn kind(self) -> DeviceKind {
        self.kind
    }

    pub fn into_inner(self) -> u64 {
        self.number
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.number)
    }
}

/// The L2 address of one interface. Frames are addressed to these, the way
/// Ethernet frames are addressed to hardware addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mac(u64);

impl Mac {
    /// Frames addressed here are accepted by every interface.
    pub const BROADCAST: Self = Self(0xFF_FF_FF_FF_FF_FF);

    pub const fn new(n: u64) -> Self {
        Self(n & 0xFF_FF_FF_FF_FF_FF)
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
        )
    }
}

/// Identifies a [`Link`](crate::Link) within its [`Lan`](crate::Lan).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u64);

impl LinkId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Hands out the identifiers of one [`Lan`](crate::Lan). Nothing here is
/// process-wide, so two simulations never share a numbering.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    devices: AtomicU64,
    macs: AtomicU64,
    links: AtomicU64,
}

/// Locally administered, so simulated addresses never look vendor-assigned.
const MAC_BASE: u64 = 0x02_00_00_00_00_00;

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            devices: AtomicU64::new(1),
            macs: AtomicU64::new(1),
            links: AtomicU64::new(1),
        }
    }

    pub fn device(&self, kind: DeviceKind) -> DeviceId {
        DeviceId::new(kind, self.devices.fetch_add(1, Ordering::Relaxed))
    }

    pub fn mac(&self) -> Mac {
        Mac::new(MAC_BASE | self.macs.fetch_add(1, Ordering::Relaxed))
    }

    pub fn link(&self) -> LinkId {
        LinkId::new(self.links.fetch_add(1, Ordering::Relaxed))
    }
}
