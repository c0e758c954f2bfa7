//! Emulation nodes: a network namespace, a netlink session inside it, and
//! the interfaces configured through that session.
//!
//! ```ignore
//! use std::time::Duration;
//! use netnode::{Interface, Node, NodeOptions};
//! use netnode::netlink::NetemConfig;
//!
//! let mut h1 = Node::create(network.clone(), "h1", NodeOptions::new()).await?;
//! // ... move a veth end called eth0 into h1's namespace ...
//! h1.configure_interface(
//!     Interface::new("eth0")
//!         .mtu(1400)
//!         .netem(NetemConfig::new().delay(Duration::from_millis(10))),
//! )
//! .await?;
//! h1.add_address("eth0", "10.0.0.1/24".parse()?).await?;
//! h1.add_default_route("10.0.0.254".parse()?).await?;
//! h1.teardown()?;
//! ```

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::net::IpAddr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::validate_name;
use crate::container::{ContainerRuntime, DockerCli};
use crate::error::{Error, Result};
use crate::interface::{Interface, LinkAttribute};
use crate::namespace::{self, Namespace};
use crate::netlink::{Connection, LinkInfo, Route};
use crate::topology::Topology;
use crate::util::addr::IpNet;

pub const IPV4_FORWARDING: &str = "/proc/sys/net/ipv4/conf/all/forwarding";
pub const IPV6_FORWARDING: &str = "/proc/sys/net/ipv6/conf/all/forwarding";

/// How a node obtains its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceSource {
    /// Create `<prefix><network>-<node>`.
    Create,
    /// Adopt `/var/run/netns/<name>`.
    Existing(String),
    /// Adopt the namespace of a running container.
    Container(String),
}

/// Options for [`Node::create`].
///
/// At most one existing namespace source may be given; conflicting requests
/// are recorded and rejected when the node is created.
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeOptions {
    existing_namespace: Option<String>,
    existing_container: Option<String>,
    #[serde(skip)]
    conflicts: Vec<String>,
    #[serde(skip)]
    runtime: Option<Arc<dyn ContainerRuntime>>,
    #[serde(skip)]
    interfaces: Vec<Interface>,
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("existing_namespace", &self.existing_namespace)
            .field("existing_container", &self.existing_container)
            .field("conflicts", &self.conflicts)
            .field("custom_runtime", &self.runtime.is_some())
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("node options: {e}")))
    }

    /// Adopt the named namespace instead of creating one.
    pub fn existing_namespace(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(prev) = &self.existing_namespace
            && *prev != name
        {
            self.conflicts
                .push(format!("existing namespace {prev:?} and {name:?}"));
        }
        self.existing_namespace = Some(name);
        self
    }

    /// Adopt a container's namespace instead of creating one.
    pub fn existing_container(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if let Some(prev) = &self.existing_container
            && *prev != id
        {
            self.conflicts
                .push(format!("existing container {prev:?} and {id:?}"));
        }
        self.existing_container = Some(id);
        self
    }

    /// Runtime used to look up containers; the docker CLI by default.
    pub fn container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Queue an interface on the new node; it is configured by
    /// [`Node::apply_configured_interfaces`].
    pub fn interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Interfaces the node will start with queued.
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// The single namespace source these options describe.
    pub fn resolve(&self) -> Result<NamespaceSource> {
        if !self.conflicts.is_empty() {
            return Err(Error::Config(format!(
                "conflicting options: {}",
                self.conflicts.join(", ")
            )));
        }
        match (&self.existing_namespace, &self.existing_container) {
            (Some(ns), Some(id)) => Err(Error::Config(format!(
                "both existing namespace {ns:?} and existing container {id:?} given"
            ))),
            (Some(ns), None) => {
                validate_name("namespace", ns)?;
                Ok(NamespaceSource::Existing(ns.clone()))
            }
            (None, Some(id)) if id.is_empty() => {
                Err(Error::Config("empty container id".to_string()))
            }
            (None, Some(id)) => Ok(NamespaceSource::Container(id.clone())),
            (None, None) => Ok(NamespaceSource::Create),
        }
    }
}

/// An emulated host backed by a network namespace.
pub struct Node {
    name: String,
    topology: Arc<dyn Topology>,
    base_path: PathBuf,
    namespace: Option<Namespace>,
    session: Option<Connection>,
    interfaces: Vec<Interface>,
    pending: Vec<Interface>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("namespace", &self.namespace)
            .field("interfaces", &self.interfaces)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// `<network>/<node>`
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topology.config().name, self.name)
    }
}

impl Node {
    /// Create a node and register it with `topology`.
    ///
    /// Acquires the namespace, opens a netlink session inside it and
    /// bind-mounts it onto `<base>/ns/net`. On failure everything acquired
    /// so far is released and nothing is registered.
    pub async fn create(
        topology: Arc<dyn Topology>,
        name: &str,
        options: NodeOptions,
    ) -> Result<Self> {
        validate_name("node", name)?;
        let source = options.resolve()?;

        let config = topology.config();
        let base_path = config.node_path(name);
        let ns_dir = base_path.join("ns");
        let created = make_node_dir(name, &base_path, &ns_dir)?;

        let namespace = match &source {
            NamespaceSource::Create => Namespace::create(&config.namespace_name(name)),
            NamespaceSource::Existing(ns) => Namespace::adopt_by_name(ns),
            NamespaceSource::Container(id) => {
                let runtime = options
                    .runtime
                    .clone()
                    .unwrap_or_else(|| Arc::new(DockerCli::new()));
                adopt_container(runtime, id.clone()).await
            }
        };
        let namespace = match namespace {
            Ok(ns) => ns,
            Err(e) => {
                remove_node_dir(name, &base_path, created);
                return Err(e);
            }
        };

        let session = match Connection::new_in(namespace.fd()) {
            Ok(conn) => conn,
            Err(source) => {
                abandon(name, namespace, &base_path, created);
                return Err(Error::Session {
                    node: name.to_string(),
                    source,
                });
            }
        };

        let target = ns_dir.join("net");
        if let Err(source) = bind_namespace(&namespace, &target) {
            drop(session);
            abandon(name, namespace, &base_path, created);
            return Err(Error::Mount {
                node: name.to_string(),
                path: target,
                source,
            });
        }

        let node = Self {
            name: name.to_string(),
            topology,
            base_path,
            namespace: Some(namespace),
            session: Some(session),
            interfaces: Vec::new(),
            pending: options.interfaces,
        };
        info!(
            node = %node.name,
            namespace = %node.namespace_name().unwrap_or_default(),
            ?source,
            path = %node.base_path.display(),
            queued = node.pending.len(),
            "created node"
        );
        node.topology.register(&node);
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The network this node belongs to.
    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    /// `<networkBasePath>/nodes/<name>`
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Bind mount of the namespace: `<base>/ns/net`.
    pub fn ns_mount_path(&self) -> PathBuf {
        self.base_path.join("ns").join("net")
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn namespace_name(&self) -> Option<String> {
        self.namespace.as_ref().map(|ns| ns.name().to_string())
    }

    /// The netlink session bound to this node's namespace.
    pub fn session(&self) -> Result<&Connection> {
        self.session.as_ref().ok_or_else(|| self.torn_down())
    }

    fn torn_down(&self) -> Error {
        Error::TornDown {
            node: self.name.clone(),
        }
    }

    /// Interfaces configured so far, in order.
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// A configured interface by name.
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Queue an interface for [`apply_configured_interfaces`](Self::apply_configured_interfaces).
    pub fn add_interface(&mut self, interface: Interface) {
        debug!(node = %self.name, interface = %interface.name, "queued interface");
        self.pending.push(interface);
    }

    /// Interfaces queued but not configured yet.
    pub fn configured_interfaces(&self) -> &[Interface] {
        &self.pending
    }

    /// Configure queued interfaces in order.
    ///
    /// Stops at the first failure; the failed interface and those after it
    /// stay queued. A hosts-file failure still dequeues the interface, since
    /// it has been configured.
    pub async fn apply_configured_interfaces(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            let interface = self.pending.remove(0);
            if let Err(e) = self.configure_interface(interface.clone()).await {
                if !e.is_hosts_file() {
                    self.pending.insert(0, interface);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn find_link(&self, interface: &str) -> Result<LinkInfo> {
        let conn = self.session()?;
        conn.get_link(interface)
            .await
            .map_err(|source| Error::Session {
                node: self.name.clone(),
                source,
            })?
            .ok_or_else(|| Error::LinkNotFound {
                node: self.name.clone(),
                interface: interface.to_string(),
            })
    }

    /// Apply an interface's attributes and qdisc chain, then set it up.
    ///
    /// The interface is recorded only once all of that succeeded. Steps
    /// already applied are not rolled back on failure.
    pub async fn configure_interface(&mut self, mut interface: Interface) -> Result<()> {
        let link = self.find_link(&interface.name).await?;
        let ifindex = link.index;
        let conn = self.session()?;
        let iface = interface.name.as_str();

        for attribute in interface.attrs.plan() {
            info!(node = %self.name, interface = %iface, %attribute, "setting link attribute");
            let result = match attribute {
                LinkAttribute::Mtu(mtu) => conn.set_link_mtu(ifindex, mtu).await,
                LinkAttribute::HardwareAddr(mac) => conn.set_link_address(ifindex, &mac).await,
                LinkAttribute::TxQueueLen(len) => conn.set_link_txqlen(ifindex, len).await,
                LinkAttribute::Group(group) => conn.set_link_group(ifindex, group).await,
            };
            result.map_err(|source| Error::LinkAttribute {
                node: self.name.clone(),
                interface: iface.to_string(),
                attribute,
                source,
            })?;
        }

        for qdisc in interface.qdisc_chain() {
            info!(
                node = %self.name,
                interface = %iface,
                kind = qdisc.kind(),
                ?qdisc,
                "adding qdisc"
            );
            conn.add_qdisc(ifindex, qdisc.parent, qdisc.handle, qdisc.config)
                .await
                .map_err(|source| Error::Qdisc {
                    node: self.name.clone(),
                    interface: iface.to_string(),
                    kind: qdisc.kind(),
                    source,
                })?;
        }

        info!(node = %self.name, interface = %iface, "setting link up");
        conn.set_link_up(ifindex)
            .await
            .map_err(|source| Error::LinkUp {
                node: self.name.clone(),
                interface: iface.to_string(),
                source,
            })?;

        interface.set_index(ifindex);
        self.interfaces.push(interface);

        self.topology
            .generate_hosts_file()
            .map_err(|source| Error::HostsFile {
                node: self.name.clone(),
                source,
            })
    }

    /// Add an address to one of the node's links.
    pub async fn add_address(&self, interface: &str, address: IpNet) -> Result<()> {
        let link = self.find_link(interface).await?;
        info!(node = %self.name, interface = %interface, %address, "adding address");
        self.session()?
            .add_address(link.index, &address)
            .await
            .map_err(|source| Error::Address {
                node: self.name.clone(),
                interface: interface.to_string(),
                address,
                source,
            })
    }

    pub async fn add_route(&self, route: &Route) -> Result<()> {
        let oif = match &route.dev {
            Some(dev) => Some(self.find_link(dev).await?.index),
            None => None,
        };
        info!(node = %self.name, %route, "adding route");
        self.session()?
            .add_route(route, oif)
            .await
            .map_err(|source| Error::Route {
                node: self.name.clone(),
                route: route.to_string(),
                source,
            })
    }

    /// Route all traffic of the gateway's family through `gateway`.
    pub async fn add_default_route(&self, gateway: IpAddr) -> Result<()> {
        self.add_route(&default_route(gateway)).await
    }

    /// Write `value` to a proc-filesystem file as seen from inside the
    /// node's namespace.
    pub fn write_procfs(&self, path: impl AsRef<Path>, value: &str) -> Result<()> {
        let path = path.as_ref();
        let ns = self.namespace.as_ref().ok_or_else(|| self.torn_down())?;
        debug!(node = %self.name, path = %path.display(), value, "writing procfs");

        namespace::run_in(ns.fd(), || fs::write(path, value))
            .and_then(|written| written)
            .map_err(|source| Error::ProcFs {
                node: self.name.clone(),
                path: path.to_path_buf(),
                source,
            })
    }

    /// Enable IPv4 and IPv6 forwarding on all interfaces.
    pub fn enable_forwarding(&self) -> Result<()> {
        self.write_procfs(IPV4_FORWARDING, "1")?;
        self.write_procfs(IPV6_FORWARDING, "1")?;
        info!(node = %self.name, "enabled forwarding");
        Ok(())
    }

    /// Release the namespace, the session, the bind mount and the node
    /// directory.
    ///
    /// Every step is attempted; the first failure is returned. Calling it
    /// again, or after the mount was removed externally, succeeds.
    pub fn teardown(&mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        let node = self.name.clone();
        let mut record = |e: Error| {
            warn!(node = %node, error = %e, "teardown step failed");
            first.get_or_insert(e);
        };

        if let Some(ns) = self.namespace.take()
            && let Err(e) = ns.close()
        {
            record(e);
        }
        self.session = None;

        let mount_path = self.ns_mount_path();
        match umount2(&mount_path, MntFlags::MNT_DETACH) {
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
            Err(e) => record(Error::Unmount {
                node: self.name.clone(),
                path: mount_path,
                source: e.into(),
            }),
        }

        match fs::remove_dir_all(&self.base_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => record(Error::Filesystem {
                path: self.base_path.clone(),
                source: e,
            }),
            _ => {}
        }

        info!(node = %self.name, "tore down node");
        first.map_or(Ok(()), Err)
    }
}

/// `0.0.0.0/0` or `::/0` via `gateway`. IPv4-mapped IPv6 gateways count as
/// IPv4.
pub fn default_route(gateway: IpAddr) -> Route {
    let gateway = gateway.to_canonical();
    let destination = if gateway.is_ipv4() {
        IpNet::default_v4()
    } else {
        IpNet::default_v6()
    };
    Route::new(destination).gateway(gateway)
}

/// Ensure `<base>/ns` exists and nothing is mounted on `<base>/ns/net`.
///
/// Returns whether `<base>` was created here; only then may a failed
/// creation remove it.
fn make_node_dir(node: &str, base_path: &Path, ns_dir: &Path) -> Result<bool> {
    let created = !base_path.exists();
    fs::create_dir_all(ns_dir).map_err(|source| Error::Filesystem {
        path: ns_dir.to_path_buf(),
        source,
    })?;

    let target = ns_dir.join("net");
    if is_mount_point(&target) {
        return Err(Error::Mount {
            node: node.to_string(),
            path: target,
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a namespace is already mounted here",
            ),
        });
    }
    Ok(created)
}

/// A bind-mounted namespace file lives on nsfs, not on its directory's
/// filesystem.
fn is_mount_point(path: &Path) -> bool {
    let (Ok(file), Some(Ok(dir))) = (
        fs::metadata(path),
        path.parent().map(fs::metadata),
    ) else {
        return false;
    };
    file.dev() != dir.dev()
}

/// Resolve and open a container's namespace off the async workers; the
/// runtime may shell out.
async fn adopt_container(runtime: Arc<dyn ContainerRuntime>, id: String) -> Result<Namespace> {
    let lookup_id = id.clone();
    tokio::task::spawn_blocking(move || {
        Namespace::adopt_from_container(runtime.as_ref(), &lookup_id)
    })
    .await
    .map_err(|e| Error::ContainerNotFound {
        id,
        reason: format!("lookup task failed: {e}"),
    })?
}

/// Create the mount point and bind the open namespace onto it.
fn bind_namespace(namespace: &Namespace, target: &Path) -> io::Result<()> {
    File::create(target)?;
    mount(
        Some(namespace.fd().proc_fd_path().as_path()),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )?;
    Ok(())
}

/// Undo a partially created node.
fn abandon(node: &str, namespace: Namespace, base_path: &Path, created: bool) {
    if let Err(e) = namespace.close() {
        warn!(node = %node, error = %e, "cannot release namespace of failed node");
    }
    remove_node_dir(node, base_path, created);
}

/// Remove the node directory if this creation attempt made it.
fn remove_node_dir(node: &str, base_path: &Path, created: bool) {
    if !created {
        return;
    }
    if let Err(e) = fs::remove_dir_all(base_path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(node = %node, path = %base_path.display(), error = %e, "cannot remove node directory");
    }
}
