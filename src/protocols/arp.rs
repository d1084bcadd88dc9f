//! The Address Resolution Protocol: finding the MAC behind an IP address on
//! the local link.
//!
//! Each interface runs its own [`ArpHandler`]. A resolution starts with
//! [`ArpHandler::create`], which marks the target pending in the cache and
//! builds a broadcast request; it ends when the owner of the address replies
//! and [`ArpHandler::handle`] records the answer, or when the caller's wait
//! times out and [`ArpHandler::abandon`] removes the pending entry. Requests
//! are never retransmitted.

use super::DropReason;
use crate::{
    id::Mac,
    ipv4::Ipv4Address,
    logging::Logger,
    packet::{
        arp_reply, arp_request, ethernet, ArpOperation, ArpRecord, EtherType, MalformedPacket,
        Packet,
    },
    FxDashMap,
};
use std::{collections::BTreeMap, time::Instant};
use tokio::sync::watch;

/// The state of one address in an ARP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpEntry {
    /// A request went out at this instant and has not been answered.
    Pending(Instant),
    Resolved(Mac),
}

/// An ARP cache that can be waited on.
pub struct ArpTable {
    table: FxDashMap<Ipv4Address, ArpEntry>,
    /// () is sent through this whenever the table changes
    update: watch::Sender<()>,
}

impl ArpTable {
    pub fn set_pending(&self, ip: Ipv4Address) {
        self.table.insert(ip, ArpEntry::Pending(Instant::now()));
        self.update.send_replace(());
    }

    pub fn set_mac(&self, ip: Ipv4Address, mac: Mac) {
        self.table.insert(ip, ArpEntry::Resolved(mac));
        self.update.send_replace(());
    }

    /// Removes `ip` if it is still waiting on a reply. Resolved entries stay.
    pub fn remove_pending(&self, ip: Ipv4Address) {
        self.table
            .remove_if(&ip, |_, entry| matches!(entry, ArpEntry::Pending(_)));
    }

    pub fn get(&self, ip: Ipv4Address) -> Option<ArpEntry> {
        self.table.get(&ip).map(|entry| *entry)
    }

    /// The MAC for `ip`, if it has been resolved.
    pub fn get_mac(&self, ip: Ipv4Address) -> Option<Mac> {
        match self.get(ip)? {
            ArpEntry::Resolved(mac) => Some(mac),
            ArpEntry::Pending(_) => None,
        }
    }

    pub fn contains(&self, ip: Ipv4Address) -> bool {
        self.table.contains_key(&ip)
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.update.subscribe()
    }

    pub fn snapshot(&self) -> BTreeMap<Ipv4Address, ArpEntry> {
        self.table
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

impl Default for ArpTable {
    fn default() -> Self {
        Self {
            table: FxDashMap::default(),
            update: watch::channel(()).0,
        }
    }
}

/// ARP for one interface.
#[derive(Default)]
pub struct ArpHandler {
    table: ArpTable,
}

impl ArpHandler {
    pub fn table(&self) -> &ArpTable {
        &self.table
    }

    /// Marks `target_ip` pending and builds the broadcast request for it.
    pub fn create(
        &self,
        mac: Mac,
        ip: Ipv4Address,
        target_ip: Ipv4Address,
    ) -> Result<Packet, MalformedPacket> {
        self.table.set_pending(target_ip);
        Packet::new_arp(
            ethernet(mac, Mac::BROADCAST, EtherType::Arp),
            arp_request(mac, ip, target_ip),
        )
    }

    /// Gives up on a resolution the caller stopped waiting for.
    pub fn abandon(&self, target_ip: Ipv4Address) {
        self.table.remove_pending(target_ip);
    }

    /// Processes an ARP record that reached the interface with address `mac`
    /// and IP `ip` (`None` while unconfigured). Returns the reply to send, if
    /// any.
    pub fn handle(
        &self,
        mac: Mac,
        ip: Option<Ipv4Address>,
        record: &ArpRecord,
        log: &Logger,
    ) -> Result<Option<Packet>, DropReason> {
        let ip = ip.ok_or(DropReason::Unconfigured)?;
        // Only traffic about our own address is learned from
        if record.target_ip != ip {
            return Err(DropReason::NotForMe);
        }

        match record.op {
            ArpOperation::Request => {
                self.table.set_mac(record.sender_ip, record.sender_mac);
                log.info(
                    "ARP",
                    format_args!("{} asked for {ip}, replying", record.sender_ip),
                );
                let reply = Packet::new_arp(
                    ethernet(mac, record.sender_mac, EtherType::Arp),
                    arp_reply(mac, ip, record.sender_mac, record.sender_ip),
                )?;
                Ok(Some(reply))
            }
            ArpOperation::Reply => {
                if !self.table.contains(record.sender_ip) {
                    log.warn(
                        "ARP",
                        format_args!(
                            "reply from {} matches no request, recording it anyway",
                            record.sender_ip
                        ),
                    );
                }
                self.table.set_mac(record.sender_ip, record.sender_mac);
                log.info(
                    "ARP",
                    format_args!("{} is at {}", record.sender_ip, record.sender_mac),
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::DeviceKind,
        id::DeviceId,
        logging::Verbosity,
    };
    use tracing_test::traced_test;

    const MY_MAC: Mac = Mac::new(1);
    const MY_IP: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const PEER_MAC: Mac = Mac::new(2);
    const PEER_IP: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);

    fn log() -> Logger {
        Logger::new(DeviceId::new(DeviceKind::Host, 1), Verbosity::Silent)
    }

    #[test]
    fn create_marks_pending() {
        let arp = ArpHandler::default();
        let packet = arp.create(MY_MAC, MY_IP, PEER_IP).unwrap();
        assert_eq!(packet.l2().dst, Mac::BROADCAST);
        assert_eq!(packet.arp().unwrap().target_ip, PEER_IP);
        assert!(matches!(arp.table().get(PEER_IP), Some(ArpEntry::Pending(_))));

        arp.abandon(PEER_IP);
        assert!(arp.table().get(PEER_IP).is_none());
    }

    #[test]
    fn request_for_me_is_answered_and_learned() {
        let arp = ArpHandler::default();
        let request = arp_request(PEER_MAC, PEER_IP, MY_IP);
        let reply = arp.handle(MY_MAC, Some(MY_IP), &request, &log()).unwrap().unwrap();

        let record = reply.arp().unwrap();
        assert_eq!(record.op, ArpOperation::Reply);
        assert_eq!(record.sender_mac, MY_MAC);
        assert_eq!(reply.l2().dst, PEER_MAC);
        assert_eq!(arp.table().get_mac(PEER_IP), Some(PEER_MAC));
    }

    #[test]
    fn request_for_someone_else_is_ignored() {
        let arp = ArpHandler::default();
        let request = arp_request(PEER_MAC, PEER_IP, Ipv4Address::new([10, 0, 0, 9]));
        let result = arp.handle(MY_MAC, Some(MY_IP), &request, &log());
        assert_eq!(result, Err(DropReason::NotForMe));
        assert!(arp.table().snapshot().is_empty());
    }

    #[test]
    fn unconfigured_interface_stays_silent() {
        let arp = ArpHandler::default();
        let request = arp_request(PEER_MAC, PEER_IP, MY_IP);
        let result = arp.handle(MY_MAC, None, &request, &log());
        assert_eq!(result, Err(DropReason::Unconfigured));
        assert!(arp.table().snapshot().is_empty());
    }

    #[test]
    fn reply_resolves_pending_and_abandon_keeps_it() {
        let arp = ArpHandler::default();
        arp.create(MY_MAC, MY_IP, PEER_IP).unwrap();
        let reply = arp_reply(PEER_MAC, PEER_IP, MY_MAC, MY_IP);
        assert_eq!(arp.handle(MY_MAC, Some(MY_IP), &reply, &log()), Ok(None));
        assert_eq!(arp.table().get(PEER_IP), Some(ArpEntry::Resolved(PEER_MAC)));

        arp.abandon(PEER_IP);
        assert_eq!(arp.table().get_mac(PEER_IP), Some(PEER_MAC));
    }

    #[test]
    #[traced_test]
    fn unrequested_reply_is_recorded_with_a_warning() {
        let arp = ArpHandler::default();
        let reply = arp_reply(PEER_MAC, PEER_IP, MY_MAC, MY_IP);
        assert_eq!(arp.handle(MY_MAC, Some(MY_IP), &reply, &log()), Ok(None));
        assert!(logs_contain("matches no request"));
        assert_eq!(arp.table().get_mac(PEER_IP), Some(PEER_MAC));
    }
}
