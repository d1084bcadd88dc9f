use crate::{
    device::{DeviceCore, DeviceRole},
    interface::Interface,
    packet::Packet,
    protocols::DropReason,
};
use std::{ops::Deref, sync::Arc};

/// An end system: answers ARP and pings, and leases addresses over DHCP.
#[derive(Debug)]
pub struct Host {
    core: DeviceCore,
}

impl Host {
    pub(crate) fn new(core: DeviceCore) -> Self {
        Self { core }
    }
}

impl Deref for Host {
    type Target = DeviceCore;

    fn deref(&self) -> &DeviceCore {
        &self.core
    }
}

impl DeviceRole for Host {
    fn device(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_data(self: Arc<Self>, packet: Packet, iface: Arc<Interface>) -> Result<(), DropReason> {
        self.core.handle_endpoint(&packet, &iface, None)
    }

    fn check_timeouts(&self) {
        self.core.check_dhcp_timers();
    }
}
