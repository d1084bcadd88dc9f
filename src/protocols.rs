//! The protocol state machines that interfaces and devices embed: ARP, the
//! DHCP client and server, and ICMP echo.

use crate::{
    device::SendError,
    id::LinkId,
    ipv4::Ipv4Address,
    logging::{Logger, Severity},
    packet::MalformedPacket,
};
use thiserror::Error;

pub mod arp;
pub use arp::{ArpEntry, ArpHandler};

pub mod dhcp;

pub mod icmp;
pub use icmp::IcmpHandler;

/// Why a device discarded a packet it received. A receive loop never fails
/// because of what a peer sent; it logs one of these and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("not addressed to this interface")]
    NotForMe,
    #[error("interface has no address")]
    Unconfigured,
    #[error("arrived over unknown link {0:?}")]
    UnknownIngress(Option<LinkId>),
    #[error("no handler for {0}")]
    Unhandled(&'static str),
    #[error("{protocol}: {detail}")]
    UnexpectedTransaction {
        protocol: &'static str,
        detail: String,
    },
    #[error("{protocol}: {detail}")]
    ProtocolViolation {
        protocol: &'static str,
        detail: String,
    },
    #[error("no route to {0}")]
    NoRoute(Ipv4Address),
    #[error("could not resolve next hop {0}")]
    Unresolved(Ipv4Address),
    #[error("address pool exhausted")]
    PoolExhausted,
    #[error(transparent)]
    Malformed(#[from] MalformedPacket),
    #[error(transparent)]
    Send(#[from] SendError),
}

impl DropReason {
    pub(crate) fn unexpected(protocol: &'static str, detail: impl Into<String>) -> Self {
        Self::UnexpectedTransaction {
            protocol,
            detail: detail.into(),
        }
    }

    pub(crate) fn violation(protocol: &'static str, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            protocol,
            detail: detail.into(),
        }
    }

    /// Ordinary traffic for someone else is only reported in packet dumps.
    pub fn severity(&self) -> Severity {
        match self {
            Self::NotForMe | Self::Unconfigured => Severity::Debug,
            Self::Unhandled(_) | Self::UnexpectedTransaction { .. } | Self::NoRoute(_) => {
                Severity::Warn
            }
            _ => Severity::Error,
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            Self::UnexpectedTransaction { protocol, .. }
            | Self::ProtocolViolation { protocol, .. } => protocol,
            Self::NoRoute(_) | Self::Unresolved(_) => "Router",
            Self::PoolExhausted => "DHCP",
            _ => "Device",
        }
    }

    pub(crate) fn log(&self, log: &Logger) {
        log.log(
            self.severity(),
            self.component(),
            format_args!("dropping packet: {self}"),
        );
    }
}
