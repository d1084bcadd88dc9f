//! Typed configuration handed to a [`Lan`](crate::Lan) and its devices at
//! construction.

use crate::{ipv4::Ipv4Address, logging::Verbosity, protocols::dhcp::IpRange};
use std::time::Duration;

/// Settings for a whole [`Lan`](crate::Lan).
#[derive(Debug, Clone, Default)]
pub struct LanConfig {
    /// Used by devices built without their own [`DeviceConfig`].
    pub device: DeviceConfig,
    /// Seeds every device's random number generator. A fixed seed makes
    /// transaction ids, echo identifiers and address allocation repeatable.
    /// `None` seeds from entropy.
    pub seed: Option<u64>,
}

/// Settings for one device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// How long the device loop waits for a packet before it runs its
    /// periodic maintenance again.
    pub tick: Duration,
    /// Default wait for [`send_arp`](crate::DeviceCore::send_arp).
    pub arp_timeout: Duration,
    /// Default wait for [`send_icmp`](crate::DeviceCore::send_icmp).
    pub icmp_timeout: Duration,
    /// Default wait for [`send_dhcp`](crate::DeviceCore::send_dhcp).
    pub dhcp_timeout: Duration,
    pub verbosity: Verbosity,
    /// A static default gateway, given to every addressed interface whose
    /// subnet holds it.
    pub gateway: Option<Ipv4Address>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(25),
            arp_timeout: Duration::from_secs(5),
            icmp_timeout: Duration::from_secs(5),
            dhcp_timeout: Duration::from_secs(5),
            verbosity: Verbosity::default(),
            gateway: None,
        }
    }
}

impl DeviceConfig {
    /// Uses `timeout` for every request kind.
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.arp_timeout = timeout;
        self.icmp_timeout = timeout;
        self.dhcp_timeout = timeout;
        self
    }

    pub fn with_gateway(mut self, gateway: Ipv4Address) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}

/// Settings for the address server of a [`DhcpServer`](crate::DhcpServer).
#[derive(Debug, Clone)]
pub struct DhcpServerConfig {
    /// Lease time advertised in option 51.
    pub lease_time: Duration,
    /// How long an offered address stays reserved for the client it was
    /// offered to. `None` holds it for `lease_time`.
    pub offer_hold: Option<Duration>,
    /// Addresses to hand out. `None` uses every host address of the server's
    /// subnet except the server's own and the gateway.
    pub pool: Option<IpRange>,
    /// Advertised as the router (option 3). `None` advertises the server.
    pub gateway: Option<Ipv4Address>,
    /// Advertised in option 6; empty by default.
    pub dns: Vec<Ipv4Address>,
}

impl Default for DhcpServerConfig {
    fn default() -> Self {
        Self {
            lease_time: Duration::from_secs(20),
            offer_hold: None,
            pool: None,
            gateway: None,
            dns: Vec::new(),
        }
    }
}

impl DhcpServerConfig {
    pub fn offer_hold(&self) -> Duration {
        self.offer_hold.unwrap_or(self.lease_time)
    }
}
