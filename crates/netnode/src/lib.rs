//! Namespace-backed emulation nodes for network testbeds.
//!
//! A [`Node`] is an emulated host or router: a Linux network namespace
//! (created, adopted by name, or taken from a running container), a netlink
//! session bound to that namespace, and a bind mount that keeps the
//! namespace reachable under the node's state directory.
//!
//! Interfaces inside the namespace are configured in a fixed order: MTU,
//! hardware address, tx queue length and group, then a `netem` qdisc at
//! `1:0` followed by a `tbf` qdisc at `2:0`, then the link is set up.
//! Addresses, routes and proc-filesystem tunables are applied through the
//! same session.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use netnode::{Interface, Node, NodeOptions};
//! use netnode::netlink::{NetemConfig, TbfConfig};
//!
//! #[tokio::main]
//! async fn main() -> netnode::Result<()> {
//!     let network: Arc<dyn netnode::Topology> = my_network();
//!     let mut r1 = Node::create(network, "r1", NodeOptions::new()).await?;
//!
//!     r1.configure_interface(
//!         Interface::new("eth0")
//!             .mtu(1400)
//!             .netem(NetemConfig::new().delay(Duration::from_millis(10)).loss(0.5))
//!             .tbf(TbfConfig::new().rate_bps(10_000_000)),
//!     )
//!     .await?;
//!     r1.add_address("eth0", "10.0.0.1/24".parse()?).await?;
//!     r1.enable_forwarding()?;
//!
//!     r1.teardown()
//! }
//! ```
//!
//! # Logging
//!
//! Every lifecycle and configuration step is reported through [`tracing`];
//! install a subscriber to see them.

pub mod config;
pub mod container;
pub mod error;
pub mod interface;
pub mod namespace;
pub mod netlink;
pub mod node;
pub mod topology;
pub mod util;

pub use config::NetworkConfig;
pub use container::{ContainerRuntime, DockerCli};
pub use error::{Error, Result};
pub use interface::{Interface, LinkAttribute, LinkAttrs};
pub use namespace::Namespace;
pub use node::{NamespaceSource, Node, NodeOptions};
pub use topology::Topology;
pub use util::IpNet;
