use super::DhcpRecord;

/// DHCP servers listen here.
pub const DHCP_SERVER_PORT: u16 = 67;
/// DHCP clients listen here.
pub const DHCP_CLIENT_PORT: u16 = 68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpPayload {
    Empty,
    Dhcp(Box<DhcpRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: UdpPayload,
}

pub fn udp(src_port: u16, dst_port: u16, payload: UdpPayload) -> UdpDatagram {
    UdpDatagram {
        src_port,
        dst_port,
        payload,
    }
}
