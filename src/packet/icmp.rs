#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpKind {
    EchoReply,
    EchoRequest,
    /// Any type the simulation does not implement.
    Other(u8),
}

impl From<u8> for IcmpKind {
    fn from(kind: u8) -> Self {
        match kind {
            0 => Self::EchoReply,
            8 => Self::EchoRequest,
            other => Self::Other(other),
        }
    }
}

impl From<IcmpKind> for u8 {
    fn from(kind: IcmpKind) -> Self {
        match kind {
            IcmpKind::EchoReply => 0,
            IcmpKind::EchoRequest => 8,
            IcmpKind::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpRecord {
    pub kind: IcmpKind,
    /// Pairs a reply with its request.
    pub identifier: u16,
}

pub fn icmp_echo(kind: IcmpKind, identifier: u16) -> IcmpRecord {
    IcmpRecord { kind, identifier }
}
