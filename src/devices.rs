//! The four kinds of device a [`Lan`](crate::Lan) can hold.

mod host;
pub use host::Host;

mod switch;
pub use switch::Switch;

pub mod router;
pub use router::Router;

mod dhcp_server;
pub use dhcp_server::DhcpServer;
