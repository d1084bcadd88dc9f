//! DHCP: a client per interface that leases an address through the
//! Discover/Offer/Request/Ack exchange and renews it at half-life, and the
//! server side that allocates addresses and tracks leases.
//!
//! DHCP NAK is not implemented. A server acknowledges every Request addressed
//! to it, overwriting whatever lease it held for that address.

mod dhcp_client;
pub use dhcp_client::{ClientOutcome, ClientPhase, ClientTimer, DhcpClient, DhcpClientState, Lease};

mod dhcp_server;
pub use dhcp_server::{ClientId, DhcpServerHandler, LeaseRecord, LeaseState};

mod pool;
pub use pool::{IpGenerator, IpRange, Pool};

use crate::{
    id::Mac,
    ipv4::Ipv4Address,
    packet::{
        ethernet, ipv4, udp, DhcpRecord, EtherType, IpProtocol, MalformedPacket, Packet,
        UdpPayload,
    },
};

/// The option codes a client asks servers to fill in.
pub const REQUESTED_OPTIONS: [u8; 3] = [1, 3, 6];

/// Wraps a DHCP record in UDP, IPv4 and Ethernet.
pub(crate) fn encapsulate(
    (src_mac, dst_mac): (Mac, Mac),
    (src_ip, dst_ip): (Ipv4Address, Ipv4Address),
    (src_port, dst_port): (u16, u16),
    record: DhcpRecord,
) -> Result<Packet, MalformedPacket> {
    Packet::new_udp(
        ethernet(src_mac, dst_mac, EtherType::Ipv4),
        ipv4(src_ip, dst_ip, IpProtocol::Udp),
        udp(src_port, dst_port, UdpPayload::Dhcp(Box::new(record))),
    )
}
