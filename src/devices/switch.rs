use crate::{
    device::{DeviceCore, DeviceRole},
    id::{LinkId, Mac},
    interface::Interface,
    packet::Packet,
    protocols::DropReason,
    FxDashMap,
};
use std::{collections::BTreeMap, ops::Deref, sync::Arc};

/// A learning layer 2 switch. It has no addresses of its own and never
/// consumes a frame: everything is forwarded or dropped.
///
/// There is no spanning tree, so a topology with a loop of switches floods
/// forever.
#[derive(Debug)]
pub struct Switch {
    core: DeviceCore,
    /// The link each source address was last seen arriving over
    table: FxDashMap<Mac, LinkId>,
}

impl Switch {
    pub(crate) fn new(core: DeviceCore) -> Self {
        Self {
            core,
            table: Default::default(),
        }
    }

    /// The switch table, ordered by address.
    pub fn table(&self) -> BTreeMap<Mac, LinkId> {
        self.table
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    fn forward(&self, iface: &Interface, packet: Packet) {
        if let Err(e) = self.core.send_on(iface, packet) {
            self.core
                .log()
                .error("Switch", format_args!("forwarding on eth{} failed: {e}", iface.index()));
        }
    }
}

impl Deref for Switch {
    type Target = DeviceCore;

    fn deref(&self) -> &DeviceCore {
        &self.core
    }
}

impl DeviceRole for Switch {
    fn device(&self) -> &DeviceCore {
        &self.core
    }

    fn handle_data(self: Arc<Self>, packet: Packet, iface: Arc<Interface>) -> Result<(), DropReason> {
        let arrival = iface.link_id();
        let frame = packet.l2();
        if !frame.src.is_broadcast() {
            self.table.insert(frame.src, arrival);
        }

        let known = (!frame.dst.is_broadcast())
            .then(|| self.table.get(&frame.dst).map(|link| *link))
            .flatten();
        match known {
            Some(link) if link == arrival => Err(DropReason::NotForMe),
            Some(link) => {
                let out = self
                    .core
                    .interface_for_link(link)
                    .ok_or(DropReason::UnknownIngress(Some(link)))?;
                self.forward(&out, packet);
                Ok(())
            }
            None => {
                for out in self.core.interfaces() {
                    if out.link_id() != arrival {
                        self.forward(&out, packet.clone());
                    }
                }
                Ok(())
            }
        }
    }
}
