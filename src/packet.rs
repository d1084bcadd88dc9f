//! The layered packet envelope exchanged between devices.
//!
//! A [`Packet`] holds an Ethernet frame in its `L2` slot, optionally an ARP or
//! IPv4 record in `L3`, and, above IPv4, a UDP or ICMP record in `L4`. Packets
//! are only built through [`Packet::layered`] (or the helpers that call it),
//! so every packet a device sees has already passed the structural checks
//! listed on [`MalformedPacket`].
//!
//! The record constructors in this module are the only way protocol code
//! assembles layer records.

use std::{fmt, str::FromStr};
use thiserror::Error;

mod arp;
pub use arp::{arp_reply, arp_request, ArpOperation, ArpRecord};

mod dhcp;
pub use dhcp::{dhcp_message, DhcpOp, DhcpOptions, DhcpRecord, MessageType};

mod frame;
pub use frame::{ethernet, EtherType, EthernetFrame};

mod icmp;
pub use icmp::{icmp_echo, IcmpKind, IcmpRecord};

mod ip;
pub use ip::{ipv4, IpProtocol, Ipv4Header};

mod udp;
pub use udp::{udp, UdpDatagram, UdpPayload, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

/// A named position in a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerSlot {
    L2,
    L3,
    L4,
}

impl FromStr for LayerSlot {
    type Err = MalformedPacket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L2" => Ok(Self::L2),
            "L3" => Ok(Self::L3),
            "L4" => Ok(Self::L4),
            other => Err(MalformedPacket::UnknownSlot(other.to_string())),
        }
    }
}

impl fmt::Display for LayerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Any one layer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Ethernet(EthernetFrame),
    Arp(ArpRecord),
    Ipv4(Ipv4Header),
    Udp(UdpDatagram),
    Icmp(IcmpRecord),
}

impl Layer {
    /// The slot this kind of record belongs in.
    pub fn slot(&self) -> LayerSlot {
        match self {
            Layer::Ethernet(_) => LayerSlot::L2,
            Layer::Arp(_) | Layer::Ipv4(_) => LayerSlot::L3,
            Layer::Udp(_) | Layer::Icmp(_) => LayerSlot::L4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Layer::Ethernet(_) => "Ethernet",
            Layer::Arp(_) => "ARP",
            Layer::Ipv4(_) => "IPv4",
            Layer::Udp(_) => "UDP",
            Layer::Icmp(_) => "ICMP",
        }
    }
}

impl From<EthernetFrame> for Layer {
    fn from(frame: EthernetFrame) -> Self {
        Self::Ethernet(frame)
    }
}

impl From<ArpRecord> for Layer {
    fn from(arp: ArpRecord) -> Self {
        Self::Arp(arp)
    }
}

impl From<Ipv4Header> for Layer {
    fn from(header: Ipv4Header) -> Self {
        Self::Ipv4(header)
    }
}

impl From<UdpDatagram> for Layer {
    fn from(datagram: UdpDatagram) -> Self {
        Self::Udp(datagram)
    }
}

impl From<IcmpRecord> for Layer {
    fn from(icmp: IcmpRecord) -> Self {
        Self::Icmp(icmp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Network {
    Arp(ArpRecord),
    Ipv4(Ipv4Header),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    Udp(UdpDatagram),
    Icmp(IcmpRecord),
}

/// A validated stack of layer records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    l2: EthernetFrame,
    l3: Option<Network>,
    l4: Option<Transport>,
}

impl Packet {
    /// Assembles a packet from slot/record pairs.
    ///
    /// ```
    /// # use lansim::packet::*;
    /// # use lansim::{Ipv4Address, Mac};
    /// let me = Ipv4Address::new([10, 0, 0, 1]);
    /// let packet = Packet::layered([
    ///     (LayerSlot::L2, ethernet(Mac::new(1), Mac::BROADCAST, EtherType::Arp).into()),
    ///     (LayerSlot::L3, arp_request(Mac::new(1), me, Ipv4Address::new([10, 0, 0, 2])).into()),
    /// ])
    /// .unwrap();
    /// assert!(packet.arp().is_some());
    /// ```
    pub fn layered(
        layers: impl IntoIterator<Item = (LayerSlot, Layer)>,
    ) -> Result<Self, MalformedPacket> {
        let mut l2 = None;
        let mut l3 = None;
        let mut l4 = None;
        for (slot, layer) in layers {
            if layer.slot() != slot {
                return Err(MalformedPacket::WrongSlot {
                    slot,
                    layer: layer.name(),
                });
            }
            let duplicate = match layer {
                Layer::Ethernet(frame) => l2.replace(frame).is_some(),
                Layer::Arp(arp) => l3.replace(Network::Arp(arp)).is_some(),
                Layer::Ipv4(header) => l3.replace(Network::Ipv4(header)).is_some(),
                Layer::Udp(datagram) => l4.replace(Transport::Udp(datagram)).is_some(),
                Layer::Icmp(icmp) => l4.replace(Transport::Icmp(icmp)).is_some(),
            };
            if duplicate {
                return Err(MalformedPacket::DuplicateSlot(slot));
            }
        }

        let l2 = l2.ok_or(MalformedPacket::MissingL2)?;
        match (&l3, l2.ethertype) {
            (None, _) | (Some(Network::Arp(_)), EtherType::Arp) => {}
            (Some(Network::Ipv4(_)), EtherType::Ipv4) => {}
            (Some(network), ethertype) => {
                return Err(MalformedPacket::EtherTypeMismatch {
                    ethertype,
                    layer: match network {
                        Network::Arp(_) => "ARP",
                        Network::Ipv4(_) => "IPv4",
                    },
                })
            }
        }
        if let Some(transport) = &l4 {
            let Some(Network::Ipv4(header)) = &l3 else {
                return Err(MalformedPacket::TransportWithoutIpv4);
            };
            let carried = match transport {
                Transport::Udp(_) => IpProtocol::Udp,
                Transport::Icmp(_) => IpProtocol::Icmp,
            };
            if header.protocol != carried {
                return Err(MalformedPacket::ProtocolMismatch {
                    protocol: header.protocol,
                    carried,
                });
            }
        }
        Ok(Self { l2, l3, l4 })
    }

    /// Like [`layered`](Self::layered), with slots given by name (`"L2"`,
    /// `"L3"`, `"L4"`).
    pub fn from_named<'a>(
        layers: impl IntoIterator<Item = (&'a str, Layer)>,
    ) -> Result<Self, MalformedPacket> {
        let layers = layers
            .into_iter()
            .map(|(name, layer)| Ok((name.parse()?, layer)))
            .collect::<Result<Vec<_>, MalformedPacket>>()?;
        Self::layered(layers)
    }

    /// An ARP packet.
    pub fn new_arp(frame: EthernetFrame, arp: ArpRecord) -> Result<Self, MalformedPacket> {
        Self::layered([(LayerSlot::L2, frame.into()), (LayerSlot::L3, arp.into())])
    }

    /// An IPv4 packet carrying UDP.
    pub fn new_udp(
        frame: EthernetFrame,
        header: Ipv4Header,
        datagram: UdpDatagram,
    ) -> Result<Self, MalformedPacket> {
        Self::layered([
            (LayerSlot::L2, frame.into()),
            (LayerSlot::L3, header.into()),
            (LayerSlot::L4, datagram.into()),
        ])
    }

    /// An IPv4 packet carrying ICMP.
    pub fn new_icmp(
        frame: EthernetFrame,
        header: Ipv4Header,
        icmp: IcmpRecord,
    ) -> Result<Self, MalformedPacket> {
        Self::layered([
            (LayerSlot::L2, frame.into()),
            (LayerSlot::L3, header.into()),
            (LayerSlot::L4, icmp.into()),
        ])
    }

    pub fn l2(&self) -> &EthernetFrame {
        &self.l2
    }

    /// Only the L2 addressing of a packet is rewritten in flight: by `send`
    /// stamping the ingress link, and by routers re-addressing a frame.
    pub(crate) fn l2_mut(&mut self) -> &mut EthernetFrame {
        &mut self.l2
    }

    pub fn arp(&self) -> Option<&ArpRecord> {
        match &self.l3 {
            Some(Network::Arp(arp)) => Some(arp),
            _ => None,
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.l3 {
            Some(Network::Ipv4(header)) => Some(header),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<&UdpDatagram> {
        match &self.l4 {
            Some(Transport::Udp(datagram)) => Some(datagram),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpRecord> {
        match &self.l4 {
            Some(Transport::Icmp(icmp)) => Some(icmp),
            _ => None,
        }
    }

    /// The DHCP message carried by this packet, if it is one.
    pub fn dhcp(&self) -> Option<&DhcpRecord> {
        match &self.udp()?.payload {
            UdpPayload::Dhcp(record) => Some(record),
            UdpPayload::Empty => None,
        }
    }

    /// Which slots are filled.
    pub fn slots(&self) -> Vec<LayerSlot> {
        let mut slots = vec![LayerSlot::L2];
        if self.l3.is_some() {
            slots.push(LayerSlot::L3);
        }
        if self.l4.is_some() {
            slots.push(LayerSlot::L4);
        }
        slots
    }
}

/// Structural problems that stop a packet from being built or sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("a packet must carry an Ethernet frame in L2")]
    MissingL2,
    #[error("unknown layer slot {0:?}")]
    UnknownSlot(String),
    #[error("{layer} does not belong in {slot}")]
    WrongSlot { slot: LayerSlot, layer: &'static str },
    #[error("{0} supplied more than once")]
    DuplicateSlot(LayerSlot),
    #[error("EtherType {ethertype:?} does not describe an {layer} payload")]
    EtherTypeMismatch {
        ethertype: EtherType,
        layer: &'static str,
    },
    #[error("an L4 record needs an IPv4 header in L3")]
    TransportWithoutIpv4,
    #[error("IP protocol {protocol:?} does not describe a {carried:?} payload")]
    ProtocolMismatch {
        protocol: IpProtocol,
        carried: IpProtocol,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id::Mac, ipv4::Ipv4Address};

    const A: Mac = Mac::new(0xA);
    const B: Mac = Mac::new(0xB);
    const IP_A: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const IP_B: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);

    fn echo() -> Packet {
        Packet::new_icmp(
            ethernet(A, B, EtherType::Ipv4),
            ipv4(IP_A, IP_B, IpProtocol::Icmp),
            icmp_echo(IcmpKind::EchoRequest, 7),
        )
        .unwrap()
    }

    #[test]
    fn well_formed_packets() {
        let packet = echo();
        assert_eq!(
            packet.slots(),
            vec![LayerSlot::L2, LayerSlot::L3, LayerSlot::L4]
        );
        assert_eq!(packet.icmp().unwrap().identifier, 7);
        assert!(packet.udp().is_none());

        let bare = Packet::layered([(
            LayerSlot::L2,
            ethernet(A, B, EtherType::Ipv4).into(),
        )]);
        assert_eq!(bare.unwrap().slots(), vec![LayerSlot::L2]);
    }

    #[test]
    fn l2_is_required() {
        let result = Packet::layered([(
            LayerSlot::L3,
            ipv4(IP_A, IP_B, IpProtocol::Udp).into(),
        )]);
        assert_eq!(result, Err(MalformedPacket::MissingL2));
    }

    #[test]
    fn named_slots() {
        let frame = ethernet(A, B, EtherType::Arp);
        let ok = Packet::from_named([
            ("L2", frame.clone().into()),
            ("L3", arp_request(A, IP_A, IP_B).into()),
        ]);
        assert!(ok.unwrap().arp().is_some());

        let bad = Packet::from_named([
            ("L2", frame.into()),
            ("L7", ipv4(IP_A, IP_B, IpProtocol::Udp).into()),
        ]);
        assert_eq!(bad, Err(MalformedPacket::UnknownSlot("L7".into())));
    }

    #[test]
    fn structural_mismatches_rejected() {
        let frame = ethernet(A, B, EtherType::Ipv4);

        let wrong_slot = Packet::layered([
            (LayerSlot::L2, frame.clone().into()),
            (LayerSlot::L4, ipv4(IP_A, IP_B, IpProtocol::Udp).into()),
        ]);
        assert!(matches!(wrong_slot, Err(MalformedPacket::WrongSlot { .. })));

        let twice = Packet::layered([
            (LayerSlot::L2, frame.clone().into()),
            (LayerSlot::L2, frame.clone().into()),
        ]);
        assert_eq!(twice, Err(MalformedPacket::DuplicateSlot(LayerSlot::L2)));

        let arp_in_ip_frame = Packet::new_arp(frame.clone(), arp_request(A, IP_A, IP_B));
        assert!(matches!(
            arp_in_ip_frame,
            Err(MalformedPacket::EtherTypeMismatch { .. })
        ));

        let udp_says_icmp = Packet::new_udp(
            frame.clone(),
            ipv4(IP_A, IP_B, IpProtocol::Icmp),
            udp(DHCP_CLIENT_PORT, DHCP_SERVER_PORT, UdpPayload::Empty),
        );
        assert!(matches!(
            udp_says_icmp,
            Err(MalformedPacket::ProtocolMismatch { .. })
        ));

        let no_ip = Packet::layered([
            (LayerSlot::L2, frame.into()),
            (LayerSlot::L4, icmp_echo(IcmpKind::EchoReply, 1).into()),
        ]);
        assert_eq!(no_ip, Err(MalformedPacket::TransportWithoutIpv4));
    }

    #[test]
    fn clones_do_not_alias() {
        let original = echo();
        let mut copy = original.clone();
        copy.l2_mut().dst = Mac::BROADCAST;
        assert_eq!(original.l2().dst, B);
    }
}
