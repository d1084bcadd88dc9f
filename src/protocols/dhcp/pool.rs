use crate::ipv4::{Ipv4Address, Ipv4Net};
use rand::Rng;

/// An inclusive range of addresses a DHCP server may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub start: Ipv4Address,
    pub end: Ipv4Address,
}

impl IpRange {
    pub fn new(start: Ipv4Address, end: Ipv4Address) -> Self {
        Self { start, end }
    }

    /// How many addresses the range holds. Zero if `end` comes before `start`.
    pub fn len(&self) -> u64 {
        let (start, end) = (u64::from(self.start.to_u32()), u64::from(self.end.to_u32()));
        (end + 1).saturating_sub(start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ip: Ipv4Address) -> bool {
        (self.start..=self.end).contains(&ip)
    }

    /// The address `offset` places above `start`, if it is in the range.
    pub fn nth(&self, offset: u64) -> Option<Ipv4Address> {
        if offset >= self.len() {
            return None;
        }
        // start + offset <= end <= u32::MAX here
        Some(Ipv4Address::from((u64::from(self.start.to_u32()) + offset) as u32))
    }

    pub fn iter(&self) -> IpGenerator {
        IpGenerator::new(*self)
    }
}

/// Walks an [`IpRange`] in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpGenerator {
    current: u64,
    end: u64,
}

impl IpGenerator {
    pub fn new(range: IpRange) -> Self {
        Self {
            current: range.start.to_u32().into(),
            end: range.end.to_u32().into(),
        }
    }
}

impl Iterator for IpGenerator {
    type Item = Ipv4Address;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current > self.end {
            None
        } else {
            // current <= end <= u32::MAX here
            let out = Ipv4Address::from(self.current as u32);
            self.current += 1;
            Some(out)
        }
    }
}

/// Random draws [`Pool::allocate`] makes before falling back to a scan.
const MAX_DRAWS: u64 = 64;

/// The addresses a server allocates from: a range, less a few reserved
/// addresses.
#[derive(Debug, Clone)]
pub struct Pool {
    range: IpRange,
    reserved: Vec<Ipv4Address>,
}

impl Pool {
    /// Uses `range` if given. Otherwise the pool is every host address of
    /// `subnet`. Addresses in `reserved` are never handed out.
    pub fn new(range: Option<IpRange>, subnet: Ipv4Net, reserved: &[Ipv4Address]) -> Self {
        let range = range.unwrap_or_else(|| {
            let (start, end) = subnet.host_bounds();
            IpRange::new(start, end)
        });
        let mut reserved: Vec<_> = reserved
            .iter()
            .copied()
            .filter(|ip| range.contains(*ip))
            .collect();
        reserved.sort();
        reserved.dedup();
        Self { range, reserved }
    }

    pub fn range(&self) -> IpRange {
        self.range
    }

    pub fn len(&self) -> u64 {
        self.range.len() - self.reserved.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ip: Ipv4Address) -> bool {
        self.range.contains(ip) && !self.reserved.contains(&ip)
    }

    /// Picks a free address: a few uniform random draws, then a scan from
    /// the bottom of the pool. `None` means every address is taken.
    pub fn allocate(
        &self,
        rng: &mut impl Rng,
        is_free: impl Fn(Ipv4Address) -> bool,
    ) -> Option<Ipv4Address> {
        if self.is_empty() {
            return None;
        }
        let available = |ip: &Ipv4Address| !self.reserved.contains(ip) && is_free(*ip);
        (0..self.len().min(MAX_DRAWS))
            .filter_map(|_| self.range.nth(rng.gen_range(0..self.range.len())))
            .find(&available)
            .or_else(|| self.range.iter().find(&available))
    }
}
