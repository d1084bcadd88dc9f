use crate::{
    device::SendError,
    id::{LinkId, Mac},
    ipv4::{Ipv4Address, Ipv4Mask, Ipv4Net},
    link::{Link, LinkEnd, TopologyError},
    packet::Packet,
    protocols::{dhcp::DhcpClient, ArpHandler, IcmpHandler},
};
use std::{
    fmt,
    sync::{Arc, RwLock},
};

/// The layer 3 configuration of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    /// [`Ipv4Address::UNASSIGNED`] until configured.
    pub ip: Ipv4Address,
    pub mask: Ipv4Mask,
    pub gateway: Option<Ipv4Address>,
}

impl Addressing {
    pub const UNASSIGNED: Self = Self {
        ip: Ipv4Address::UNASSIGNED,
        mask: Ipv4Mask::HOST,
        gateway: None,
    };

    pub fn new(ip: Ipv4Address, mask: Ipv4Mask) -> Self {
        Self {
            ip,
            mask,
            gateway: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.ip.is_unassigned()
    }

    pub fn net(&self) -> Ipv4Net {
        Ipv4Net::new(self.ip, self.mask)
    }
}

impl Default for Addressing {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

/// A device's attachment to one [`Link`], with the addressing and protocol
/// state that belong to that attachment.
pub struct Interface {
    index: usize,
    mac: Mac,
    link: Arc<Link>,
    addressing: RwLock<Addressing>,
    arp: ArpHandler,
    dhcp: DhcpClient,
    icmp: IcmpHandler,
}

impl Interface {
    pub(crate) fn new(index: usize, mac: Mac, link: Arc<Link>, addressing: Addressing) -> Self {
        Self {
            index,
            mac,
            link,
            addressing: RwLock::new(addressing),
            arp: Default::default(),
            dhcp: Default::default(),
            icmp: Default::default(),
        }
    }

    /// Position among the owning device's interfaces, in creation order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mac(&self) -> Mac {
        self.mac
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn link_id(&self) -> LinkId {
        self.link.id()
    }

    /// The interface on the other side of this one's link.
    pub fn peer(&self) -> Result<LinkEnd, TopologyError> {
        self.link.other_end(self.mac)
    }

    pub fn addressing(&self) -> Addressing {
        *self.addressing.read().unwrap()
    }

    /// The interface's address, or `None` while it is unassigned.
    pub fn ip(&self) -> Option<Ipv4Address> {
        let addressing = self.addressing();
        addressing.is_configured().then_some(addressing.ip)
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.addressing().mask
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.addressing().gateway
    }

    /// The network this interface is on, once it has an address.
    pub fn net(&self) -> Option<Ipv4Net> {
        let addressing = self.addressing();
        addressing.is_configured().then(|| addressing.net())
    }

    pub(crate) fn set_addressing(&self, addressing: Addressing) {
        *self.addressing.write().unwrap() = addressing;
    }

    pub fn arp(&self) -> &ArpHandler {
        &self.arp
    }

    pub fn dhcp(&self) -> &DhcpClient {
        &self.dhcp
    }

    pub fn icmp(&self) -> &IcmpHandler {
        &self.icmp
    }

    /// Hands `packet` to the device across the link, stamped with the link
    /// it crossed.
    pub(crate) fn transmit(&self, mut packet: Packet) -> Result<LinkEnd, SendError> {
        let peer = self.peer()?;
        packet.l2_mut().ingress = Some(self.link.id());
        match peer.deliver(packet) {
            Ok(()) => Ok(peer),
            Err(_) => Err(SendError::PeerStopped(peer.device)),
        }
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("index", &self.index)
            .field("mac", &self.mac)
            .field("link", &self.link.id())
            .field("addressing", &self.addressing())
            .finish()
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eth{} {}", self.index, self.mac)?;
        match self.net() {
            Some(_) => write!(f, " {}/{}", self.addressing().ip, self.mask().prefix_len())?,
            None => write!(f, " unassigned")?,
        }
        match self.peer() {
            Ok(peer) => write!(f, " -> {} ({})", peer.device, peer.mac),
            Err(_) => write!(f, " -> nothing"),
        }
    }
}
