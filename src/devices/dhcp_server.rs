use crate::{
    device::{DeviceCore, DeviceRole},
    interface::Interface,
    ipv4::Ipv4Address,
    packet::Packet,
    protocols::{
        dhcp::{DhcpServerHandler, LeaseRecord},
        DropReason,
    },
};
use std::{collections::BTreeMap, fmt, ops::Deref, sync::Arc, time::Instant};

/// A host that also hands out addresses from its subnet. It answers on any
/// of its interfaces, always as the address of its first one.
pub struct DhcpServer {
    core: DeviceCore,
    server: DhcpServerHandler,
}

impl DhcpServer {
    pub(crate) fn new(core: DeviceCore, server: DhcpServerHandler) -> Self {
        Self { core, server }
    }

    pub fn server(&self) -> &DhcpServerHandler {
        &self.server
    }

    /// The lease table, ordered by address.
    pub fn leases(&self) -> BTreeMap<Ipv4Address, LeaseRecord> {
        self.server.leases()
    }
}

impl Deref for DhcpServer {
    type Target = DeviceCore;

    fn deref(&self) -> &DeviceCore {
        &self.core
    }
}

impl fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhcpServer")
            .field("core", &self.core)
            .field("leases", &self.leases())
            .finish()
    }
}

impl DeviceRole for DhcpServer {
    fn device(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_data(self: Arc<Self>, packet: Packet, iface: Arc<Interface>) -> Result<(), DropReason> {
        self.core.handle_endpoint(&packet, &iface, Some(&self.server))
    }

    fn check_timeouts(&self) {
        for ip in self.server.expire(Instant::now()) {
            self.core
                .log()
                .info("DHCP", format_args!("lease on {ip} expired"));
        }
    }
}
