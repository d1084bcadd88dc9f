use crate::{
    id::Mac,
    ipv4::{Ipv4Address, Ipv4Mask},
};
use std::time::Duration;

/// Whether a message travels from client to server or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhcpOp {
    BootRequest = 1,
    BootReply = 2,
}

/// The DHCP message type carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Discover = 1,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(msg_type: u8) -> Result<Self, u8> {
        Ok(match msg_type {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Decline,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            7 => MessageType::Release,
            other => return Err(other),
        })
    }
}

/// The options a message carries, one field per supported option code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    /// Option 1.
    pub subnet_mask: Option<Ipv4Mask>,
    /// Option 3.
    pub router: Option<Ipv4Address>,
    /// Option 6. Present but empty when the server has no DNS to offer.
    pub dns: Option<Vec<Ipv4Address>>,
    /// Option 28.
    pub broadcast_address: Option<Ipv4Address>,
    /// Option 50.
    pub requested_ip: Option<Ipv4Address>,
    /// Option 51.
    pub lease_time: Option<Duration>,
    /// Option 53.
    pub message_type: Option<MessageType>,
    /// Option 54.
    pub server_id: Option<Ipv4Address>,
    /// Option 55: the option codes the client would like in the reply.
    pub parameter_request: Vec<u8>,
    /// Option 61.
    pub client_id: Option<Mac>,
}

impl DhcpOptions {
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const CLIENT_ID: u8 = 61;

    pub fn of_type(message_type: MessageType) -> Self {
        Self {
            message_type: Some(message_type),
            ..Default::default()
        }
    }

    /// The codes of the options that are present, ascending.
    pub fn codes(&self) -> Vec<u8> {
        [
            (Self::SUBNET_MASK, self.subnet_mask.is_some()),
            (Self::ROUTER, self.router.is_some()),
            (Self::DNS, self.dns.is_some()),
            (Self::BROADCAST_ADDRESS, self.broadcast_address.is_some()),
            (Self::REQUESTED_IP, self.requested_ip.is_some()),
            (Self::LEASE_TIME, self.lease_time.is_some()),
            (Self::MESSAGE_TYPE, self.message_type.is_some()),
            (Self::SERVER_ID, self.server_id.is_some()),
            (Self::PARAMETER_REQUEST, !self.parameter_request.is_empty()),
            (Self::CLIENT_ID, self.client_id.is_some()),
        ]
        .into_iter()
        .filter_map(|(code, present)| present.then_some(code))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRecord {
    pub op: DhcpOp,
    /// Transaction id, chosen by the client and echoed by the server.
    pub xid: u32,
    /// Only the high bit is used: set when the client wants replies broadcast.
    pub flags: u16,
    /// The client's current address, when renewing.
    pub ciaddr: Ipv4Address,
    /// The address the server is handing out.
    pub yiaddr: Ipv4Address,
    pub siaddr: Ipv4Address,
    pub giaddr: Ipv4Address,
    /// Client hardware address.
    pub chaddr: Mac,
    pub options: DhcpOptions,
}

impl DhcpRecord {
    pub const BROADCAST_FLAG: u16 = 0x8000;

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.message_type
    }

    pub fn wants_broadcast(&self) -> bool {
        self.flags & Self::BROADCAST_FLAG != 0
    }

    pub fn with_broadcast(mut self) -> Self {
        self.flags |= Self::BROADCAST_FLAG;
        self
    }

    pub fn with_ciaddr(mut self, ciaddr: Ipv4Address) -> Self {
        self.ciaddr = ciaddr;
        self
    }

    pub fn with_yiaddr(mut self, yiaddr: Ipv4Address) -> Self {
        self.yiaddr = yiaddr;
        self
    }

    pub fn with_siaddr(mut self, siaddr: Ipv4Address) -> Self {
        self.siaddr = siaddr;
        self
    }
}

/// A message with every address field unassigned and no flags set.
pub fn dhcp_message(op: DhcpOp, xid: u32, chaddr: Mac, options: DhcpOptions) -> DhcpRecord {
    DhcpRecord {
        op,
        xid,
        flags: 0,
        ciaddr: Ipv4Address::UNASSIGNED,
        yiaddr: Ipv4Address::UNASSIGNED,
        siaddr: Ipv4Address::UNASSIGNED,
        giaddr: Ipv4Address::UNASSIGNED,
        chaddr,
        options,
    }
}
