use crate::{
    config::{DeviceConfig, DhcpServerConfig, LanConfig},
    device::{self, DeviceCore, DeviceKind, DeviceRole},
    devices::{DhcpServer, Host, Router, Switch},
    id::{IdAllocator, LinkId},
    interface::Addressing,
    ipv4::cidr_to_ip,
    link::{Link, TopologyError},
    logging::Verbosity,
    protocols::dhcp::DhcpServerHandler,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{fmt, sync::Arc};
use tokio::task::JoinSet;
use tracing::Instrument;

/// A simulated network and the owner of every device task in it.
///
/// Devices are built already linked to the peers they are given, and start
/// running immediately, so a `Lan` must be used from within a tokio runtime.
/// Dropping a `Lan` stops all of its devices.
///
/// ```
/// # use lansim::Lan;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut lan = Lan::new();
/// let switch = lan.switch(&[])?;
/// let a = lan.host(&["10.0.0.1/24"], &[&*switch])?;
/// let b = lan.host(&["10.0.0.2/24"], &[&*switch])?;
/// a.send_icmp(b.ip().unwrap()).await?;
/// lan.shut_down().await;
/// # Ok(())
/// # }
/// ```
pub struct Lan {
    config: LanConfig,
    ids: IdAllocator,
    /// Seeds each new device's generator
    seeds: SmallRng,
    devices: Vec<Arc<dyn DeviceRole>>,
    tasks: JoinSet<()>,
}

impl Lan {
    /// Creates an empty network with default settings.
    pub fn new() -> Self {
        Self::with_config(LanConfig::default())
    }

    pub fn with_config(config: LanConfig) -> Self {
        let seeds = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            config,
            ids: IdAllocator::new(),
            seeds,
            devices: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn config(&self) -> &LanConfig {
        &self.config
    }

    /// Every device, in the order they were built.
    pub fn devices(&self) -> &[Arc<dyn DeviceRole>] {
        &self.devices
    }

    /// Adds a host with one interface per address in `addrs` (CIDR strings),
    /// linked to each of `peers`.
    pub fn host(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
    ) -> Result<Arc<Host>, TopologyError> {
        self.host_with(addrs, peers, self.config.device.clone())
    }

    pub fn host_with(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
        config: DeviceConfig,
    ) -> Result<Arc<Host>, TopologyError> {
        let addresses = parse_addresses(addrs)?;
        self.build(DeviceKind::Host, addresses, peers, config, Host::new)
    }

    /// Adds a switch linked to each of `peers`. Switches carry no addresses.
    pub fn switch(&mut self, peers: &[&dyn DeviceRole]) -> Result<Arc<Switch>, TopologyError> {
        self.switch_with(peers, self.config.device.clone())
    }

    pub fn switch_with(
        &mut self,
        peers: &[&dyn DeviceRole],
        config: DeviceConfig,
    ) -> Result<Arc<Switch>, TopologyError> {
        self.build(DeviceKind::Switch, Vec::new(), peers, config, Switch::new)
    }

    /// Adds a router with one interface per address in `addrs`, linked to
    /// each of `peers`.
    pub fn router(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
    ) -> Result<Arc<Router>, TopologyError> {
        self.router_with(addrs, peers, self.config.device.clone())
    }

    pub fn router_with(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
        config: DeviceConfig,
    ) -> Result<Arc<Router>, TopologyError> {
        let addresses = parse_addresses(addrs)?;
        self.build(DeviceKind::Router, addresses, peers, config, Router::new)
    }

    /// Adds a DHCP server serving the subnet of its first address, with the
    /// default [`DhcpServerConfig`].
    pub fn dhcp_server(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
    ) -> Result<Arc<DhcpServer>, TopologyError> {
        let config = self.config.device.clone();
        self.dhcp_server_with(addrs, peers, config, DhcpServerConfig::default())
    }

    pub fn dhcp_server_with(
        &mut self,
        addrs: &[&str],
        peers: &[&dyn DeviceRole],
        config: DeviceConfig,
        server: DhcpServerConfig,
    ) -> Result<Arc<DhcpServer>, TopologyError> {
        let addresses = parse_addresses(addrs)?;
        let Some(first) = addresses.first() else {
            return Err(TopologyError::Unaddressed(self.ids.device(DeviceKind::DhcpServer)));
        };
        let handler = DhcpServerHandler::new(first.ip, first.mask, server);
        self.build(DeviceKind::DhcpServer, addresses, peers, config, |core| {
            DhcpServer::new(core, handler)
        })
    }

    /// Links two devices that already exist, giving each a new interface.
    pub fn link(
        &mut self,
        a: &dyn DeviceRole,
        b: &dyn DeviceRole,
    ) -> Result<LinkId, TopologyError> {
        let (a_id, b_id) = (a.device().id(), b.device().id());
        if a_id == b_id {
            return Err(TopologyError::SelfLink(a_id));
        }
        if a.device().linked_to(b_id) {
            return Err(TopologyError::DuplicateLink(a_id, b_id));
        }
        let link = Arc::new(Link::new(self.ids.link()));
        let a_iface = a.device().add_interface(self.ids.mac(), link.clone())?;
        let b_iface = b.device().add_interface(self.ids.mac(), link.clone())?;
        a.interface_attached(&a_iface);
        b.interface_attached(&b_iface);
        tracing::debug!(link = %link.id(), "linked {a_id} eth{} to {b_id} eth{}", a_iface.index(), b_iface.index());
        Ok(link.id())
    }

    fn build<D: DeviceRole>(
        &mut self,
        kind: DeviceKind,
        addresses: Vec<Addressing>,
        peers: &[&dyn DeviceRole],
        config: DeviceConfig,
        make: impl FnOnce(DeviceCore) -> D,
    ) -> Result<Arc<D>, TopologyError> {
        let id = self.ids.device(kind);
        // Checked up front so a failed build leaves no half-linked peers
        for (i, peer) in peers.iter().enumerate() {
            let peer_id = peer.device().id();
            if peers[..i].iter().any(|earlier| earlier.device().id() == peer_id) {
                return Err(TopologyError::DuplicateLink(id, peer_id));
            }
        }

        let seed = self.seeds.gen();
        let device = Arc::new(make(DeviceCore::new(id, addresses, config, seed)));
        for peer in peers {
            self.link(&*device, *peer)?;
        }
        let role: Arc<dyn DeviceRole> = device.clone();
        self.devices.push(role.clone());
        self.tasks.spawn(device::run(role).in_current_span());
        tracing::debug!(device = %id, "started");
        Ok(device)
    }

    /// Sets the log verbosity of every device.
    pub fn set_verbosity(&self, verbosity: Verbosity) {
        for device in &self.devices {
            device.device().set_verbosity(verbosity);
        }
    }

    /// Stops every device and waits for their tasks to finish.
    pub async fn shut_down(mut self) {
        self.stop_all();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("device task failed: {e}");
            }
        }
    }

    fn stop_all(&self) {
        for device in &self.devices {
            device.device().stop();
        }
    }
}

impl Default for Lan {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lan {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Display for Lan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for device in &self.devices {
            writeln!(f, "{}", device.device())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Lan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lan")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .finish()
    }
}

fn parse_addresses(addrs: &[&str]) -> Result<Vec<Addressing>, TopologyError> {
    addrs
        .iter()
        .map(|cidr| {
            let (ip, mask) = cidr_to_ip(cidr)?;
            Ok(Addressing::new(ip, mask))
        })
        .collect()
}
