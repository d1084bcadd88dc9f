use crate::{
    id::{DeviceId, LinkId, Mac},
    ipv4::CidrParseError,
    packet::Packet,
};
use std::{fmt, sync::RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// One side of a [`Link`]: the interface attached there and the mailbox of
/// the device that owns it.
#[derive(Clone)]
pub struct LinkEnd {
    pub device: DeviceId,
    pub mac: Mac,
    mailbox: mpsc::UnboundedSender<Packet>,
}

impl LinkEnd {
    pub(crate) fn new(device: DeviceId, mac: Mac, mailbox: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            device,
            mac,
            mailbox,
        }
    }

    /// Queues a packet for the device at this end. Fails only if that
    /// device's loop has gone away.
    pub(crate) fn deliver(&self, packet: Packet) -> Result<(), Packet> {
        self.mailbox.send(packet).map_err(|e| e.0)
    }
}

impl fmt::Debug for LinkEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEnd")
            .field("device", &self.device)
            .field("mac", &self.mac)
            .finish()
    }
}

/// A point-to-point link joining exactly two interfaces. Membership is fixed
/// once the second end is attached.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    ends: RwLock<Vec<LinkEnd>>,
}

impl Link {
    pub(crate) fn new(id: LinkId) -> Self {
        Self {
            id,
            ends: RwLock::new(Vec::with_capacity(2)),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub(crate) fn attach(&self, end: LinkEnd) -> Result<(), TopologyError> {
        let mut ends = self.ends.write().unwrap();
        if ends.len() >= 2 {
            return Err(TopologyError::LinkFull(self.id));
        }
        ends.push(end);
        Ok(())
    }

    /// The end opposite the interface with address `mac`.
    pub fn other_end(&self, mac: Mac) -> Result<LinkEnd, TopologyError> {
        let ends = self.ends.read().unwrap();
        if ends.len() < 2 {
            return Err(TopologyError::IncompleteLink(self.id));
        }
        match ends.iter().position(|end| end.mac == mac) {
            Some(i) => Ok(ends[1 - i].clone()),
            None => Err(TopologyError::NotAnEnd { link: self.id, mac }),
        }
    }

    pub fn ends(&self) -> Vec<LinkEnd> {
        self.ends.read().unwrap().clone()
    }
}

/// Mistakes in how a topology was put together. These surface when the
/// topology is built, or when a packet is sent over a half-built link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("{0} cannot be linked to itself")]
    SelfLink(DeviceId),
    #[error("{0} and {1} are already linked")]
    DuplicateLink(DeviceId, DeviceId),
    #[error("bad interface address: {0}")]
    Cidr(#[from] CidrParseError),
    #[error("link {0} already joins two interfaces")]
    LinkFull(LinkId),
    #[error("link {0} has only one end attached")]
    IncompleteLink(LinkId),
    #[error("{mac} is not attached to link {link}")]
    NotAnEnd { link: LinkId, mac: Mac },
    #[error("{device} has no interface {index}")]
    NoSuchInterface { device: DeviceId, index: usize },
    #[error("{0} needs an address to serve from")]
    Unaddressed(DeviceId),
}
