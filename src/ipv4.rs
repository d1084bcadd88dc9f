//! IPv4 addressing used throughout the simulation: addresses, subnet masks,
//! networks and CIDR parsing.

mod ipv4_address;
pub use ipv4_address::Ipv4Address;

pub mod subnetting;
pub use subnetting::{cidr_to_ip, CidrParseError, Ipv4Mask, Ipv4Net};
