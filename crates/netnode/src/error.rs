//! Error types for node lifecycle and configuration.

use std::io;
use std::path::PathBuf;

use crate::interface::LinkAttribute;
use crate::netlink;
use crate::util::addr::IpNet;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, configuring or tearing down a node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Inconsistent options.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create network namespace {name}: {source}")]
    NamespaceCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("network namespace {name} not found: {source}")]
    NamespaceNotFound {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot release network namespace {name}: {source}")]
    NamespaceClose {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("container {id} not found: {reason}")]
    ContainerNotFound { id: String, reason: String },

    /// The netlink session could not be opened or a query on it failed.
    #[error("node {node}: netlink session: {source}")]
    Session {
        node: String,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot bind-mount namespace onto {}: {source}", path.display())]
    Mount {
        node: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("node {node}: cannot unmount {}: {source}", path.display())]
    Unmount {
        node: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("node {node}: link {interface} not found")]
    LinkNotFound { node: String, interface: String },

    #[error("node {node}: cannot set {attribute} on {interface}: {source}")]
    LinkAttribute {
        node: String,
        interface: String,
        attribute: LinkAttribute,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot set {interface} up: {source}")]
    LinkUp {
        node: String,
        interface: String,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot add {kind} qdisc on {interface}: {source}")]
    Qdisc {
        node: String,
        interface: String,
        kind: &'static str,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot add {address} to {interface}: {source}")]
    Address {
        node: String,
        interface: String,
        address: IpNet,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot add route {route}: {source}")]
    Route {
        node: String,
        route: String,
        #[source]
        source: netlink::Error,
    },

    #[error("node {node}: cannot write {}: {source}", path.display())]
    ProcFs {
        node: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The interface was configured; only the hosts file is stale.
    #[error("node {node}: hosts file generation failed: {source}")]
    HostsFile {
        node: String,
        #[source]
        source: io::Error,
    },

    #[error("node {node} has been torn down")]
    TornDown { node: String },
}

impl Error {
    /// Name of the node the error refers to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Session { node, .. }
            | Self::Mount { node, .. }
            | Self::Unmount { node, .. }
            | Self::LinkNotFound { node, .. }
            | Self::LinkAttribute { node, .. }
            | Self::LinkUp { node, .. }
            | Self::Qdisc { node, .. }
            | Self::Address { node, .. }
            | Self::Route { node, .. }
            | Self::ProcFs { node, .. }
            | Self::HostsFile { node, .. }
            | Self::TornDown { node } => Some(node),
            _ => None,
        }
    }

    /// True for failures that happened after the interface was registered.
    pub fn is_hosts_file(&self) -> bool {
        matches!(self, Self::HostsFile { .. })
    }
}
