use crate::{id::Mac, ipv4::Ipv4Address};

/// Specifies the operation the sender of an ARP record is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpRecord {
    pub op: ArpOperation,
    pub sender_mac: Mac,
    pub sender_ip: Ipv4Address,
    /// [`Mac::BROADCAST`] in a request, since it is not yet known.
    pub target_mac: Mac,
    pub target_ip: Ipv4Address,
}

/// Asks who holds `target_ip`.
pub fn arp_request(sender_mac: Mac, sender_ip: Ipv4Address, target_ip: Ipv4Address) -> ArpRecord {
    ArpRecord {
        op: ArpOperation::Request,
        sender_mac,
        sender_ip,
        target_mac: Mac::BROADCAST,
        target_ip,
    }
}

/// Answers a request from `target_mac`/`target_ip`.
pub fn arp_reply(
    sender_mac: Mac,
    sender_ip: Ipv4Address,
    target_mac: Mac,
    target_ip: Ipv4Address,
) -> ArpRecord {
    ArpRecord {
        op: ArpOperation::Reply,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    }
}
