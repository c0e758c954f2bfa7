//! The contract between a node and the network that owns it.

use std::io;

use crate::config::NetworkConfig;
use crate::node::Node;

/// Implemented by the network object that allocates nodes.
///
/// A node calls [`register`](Topology::register) exactly once, after it has
/// been fully created, and
/// [`generate_hosts_file`](Topology::generate_hosts_file) after every
/// interface it configures successfully.
pub trait Topology: Send + Sync {
    fn config(&self) -> &NetworkConfig;

    fn register(&self, node: &Node);

    fn generate_hosts_file(&self) -> io::Result<()>;
}
