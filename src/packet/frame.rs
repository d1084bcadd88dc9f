use crate::id::{LinkId, Mac};

/// What an Ethernet frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
}

/// The L2 record of every packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub src: Mac,
    pub dst: Mac,
    pub ethertype: EtherType,
    /// The link the frame last crossed. Stamped by `send`, so a receiver
    /// knows which of its interfaces the frame arrived on.
    pub ingress: Option<LinkId>,
}

pub fn ethernet(src: Mac, dst: Mac, ethertype: EtherType) -> EthernetFrame {
    EthernetFrame {
        src,
        dst,
        ethertype,
        ingress: None,
    }
}
