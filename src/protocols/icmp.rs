//! ICMP echo: requests, replies, and the table of requests still waiting on
//! a reply.

use super::DropReason;
use crate::{
    id::Mac,
    ipv4::Ipv4Address,
    logging::Logger,
    packet::{ethernet, icmp_echo, ipv4, EtherType, IcmpKind, IpProtocol, MalformedPacket, Packet},
    FxDashMap,
};
use std::collections::BTreeMap;
use tokio::sync::watch;

/// ICMP for one interface.
pub struct IcmpHandler {
    /// Outstanding echo requests by identifier, and whether each was answered
    outstanding: FxDashMap<u16, bool>,
    update: watch::Sender<()>,
}

impl IcmpHandler {
    /// Records `identifier` as unanswered and builds the echo request.
    pub fn create(
        &self,
        identifier: u16,
        (src_mac, dst_mac): (Mac, Mac),
        (src_ip, dst_ip): (Ipv4Address, Ipv4Address),
    ) -> Result<Packet, MalformedPacket> {
        let packet = Packet::new_icmp(
            ethernet(src_mac, dst_mac, EtherType::Ipv4),
            ipv4(src_ip, dst_ip, IpProtocol::Icmp),
            icmp_echo(IcmpKind::EchoRequest, identifier),
        )?;
        self.outstanding.insert(identifier, false);
        Ok(packet)
    }

    pub fn is_outstanding(&self, identifier: u16) -> bool {
        self.outstanding.contains_key(&identifier)
    }

    /// `Some(true)` once a reply for `identifier` has arrived.
    pub fn answered(&self, identifier: u16) -> Option<bool> {
        self.outstanding.get(&identifier).map(|answered| *answered)
    }

    /// Forgets a request, answered or not.
    pub fn remove(&self, identifier: u16) {
        self.outstanding.remove(&identifier);
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.update.subscribe()
    }

    pub fn snapshot(&self) -> BTreeMap<u16, bool> {
        self.outstanding
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Processes an ICMP packet that reached the interface with address `mac`
    /// and IP `ip`. Echo requests are answered to whoever handed us the
    /// frame, which is the router when the requester is on another subnet.
    pub fn handle(
        &self,
        mac: Mac,
        ip: Option<Ipv4Address>,
        packet: &Packet,
        log: &Logger,
    ) -> Result<Option<Packet>, DropReason> {
        let (Some(header), Some(icmp)) = (packet.ipv4(), packet.icmp()) else {
            return Err(DropReason::violation("ICMP", "not an ICMP packet"));
        };
        match icmp.kind {
            IcmpKind::EchoRequest => {
                let ip = ip.ok_or(DropReason::Unconfigured)?;
                log.info(
                    "ICMP",
                    format_args!("echo request {} from {}", icmp.identifier, header.src),
                );
                let reply = Packet::new_icmp(
                    ethernet(mac, packet.l2().src, EtherType::Ipv4),
                    ipv4(ip, header.src, IpProtocol::Icmp),
                    icmp_echo(IcmpKind::EchoReply, icmp.identifier),
                )?;
                Ok(Some(reply))
            }
            IcmpKind::EchoReply => match self.outstanding.get_mut(&icmp.identifier) {
                Some(mut answered) => {
                    *answered = true;
                    drop(answered);
                    self.update.send_replace(());
                    log.info(
                        "ICMP",
                        format_args!("echo reply {} from {}", icmp.identifier, header.src),
                    );
                    Ok(None)
                }
                None => Err(DropReason::unexpected(
                    "ICMP",
                    format!("unsolicited echo reply {} from {}", icmp.identifier, header.src),
                )),
            },
            IcmpKind::Other(kind) => Err(DropReason::violation(
                "ICMP",
                format!("unsupported ICMP type {kind} from {}", header.src),
            )),
        }
    }
}

impl Default for IcmpHandler {
    fn default() -> Self {
        Self {
            outstanding: FxDashMap::default(),
            update: watch::channel(()).0,
        }
    }
}
