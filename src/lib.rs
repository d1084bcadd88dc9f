//! A simulator for small local area networks.
//!
//! Hosts, switches, routers and DHCP servers run as independent tokio tasks
//! and talk only by queueing [`Packet`]s into each other's mailboxes across
//! point-to-point [`Link`]s. The protocols modelled are ARP, DHCP address
//! leasing, ICMP echo, learning switch forwarding and longest prefix match
//! routing. Packets are structured values rather than bytes on a wire.
//!
//! # Organization
//! - [`Lan`] builds a topology and owns the device tasks
//! - [`Host`], [`Switch`], [`Router`] and [`DhcpServer`] are the device kinds,
//!   each a [`DeviceRole`] around a shared [`DeviceCore`]
//! - [`packet`] holds the layer records and the functions that build them
//! - [`protocols`] holds the per-interface protocol state machines
//!
//! # Requests
//!
//! [`DeviceCore::send_arp`], [`DeviceCore::send_dhcp`] and
//! [`DeviceCore::send_icmp`] send a request and wait for the device to
//! record its answer, failing with [`RequestError::Timeout`] if none
//! arrives in time. They run on the caller's task, so the device keeps
//! answering its peers while one of its own requests is outstanding.

pub mod config;
pub use config::{DeviceConfig, DhcpServerConfig, LanConfig};

pub mod device;
pub use device::{
    DeviceCore, DeviceKind, DeviceRole, DhcpContext, RequestError, SendError, UnknownDhcpContext,
};

pub mod devices;
pub use devices::{DhcpServer, Host, Router, Switch};

mod id;
pub use id::{DeviceId, LinkId, Mac};

pub mod interface;
pub use interface::{Addressing, Interface};

pub mod ipv4;
pub use ipv4::{Ipv4Address, Ipv4Mask, Ipv4Net};

mod lan;
pub use lan::Lan;

pub mod link;
pub use link::{Link, TopologyError};

pub mod logging;

pub mod packet;
pub use packet::{MalformedPacket, Packet};

pub mod protocols;
pub use protocols::DropReason;

mod shutdown;

use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

pub(crate) type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;
