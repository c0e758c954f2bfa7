//! Common test utilities for integration tests.
//!
//! Provides `TestNetwork`, a topology double that records registrations and
//! hosts-file requests, `TestNamespace` for adoption tests, and helper
//! macros for conditional test execution.

use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use netnode::{NetworkConfig, Node, Topology};

pub type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Global counter for unique names.
static COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique(prefix: &str) -> String {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), id)
}

/// Install a subscriber once; `RUST_LOG=netnode=debug` shows node steps.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A network with a private state directory under the temp dir.
pub struct TestNetwork {
    config: NetworkConfig,
    registered: Mutex<Vec<String>>,
    hosts_file_calls: AtomicUsize,
    fail_hosts_file: AtomicBool,
}

impl TestNetwork {
    pub fn new(prefix: &str) -> Arc<Self> {
        init_tracing();
        let name = unique(prefix);
        let base = std::env::temp_dir().join(format!("netnode-it-{name}"));
        Arc::new(Self {
            config: NetworkConfig::new(name)
                .with_base_path(base)
                .with_namespace_prefix("netnode-it-"),
            registered: Mutex::new(Vec::new()),
            hosts_file_calls: AtomicUsize::new(0),
            fail_hosts_file: AtomicBool::new(false),
        })
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    pub fn hosts_file_calls(&self) -> usize {
        self.hosts_file_calls.load(Ordering::SeqCst)
    }

    /// Make every following hosts-file request fail.
    pub fn break_hosts_file(&self) {
        self.fail_hosts_file.store(true, Ordering::SeqCst);
    }

    pub fn base_path(&self) -> PathBuf {
        self.config.base_path()
    }
}

impl Topology for TestNetwork {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn register(&self, node: &Node) {
        self.registered.lock().unwrap().push(node.name().to_string());
    }

    fn generate_hosts_file(&self) -> io::Result<()> {
        self.hosts_file_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_hosts_file.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "hosts file is read-only",
            ));
        }
        Ok(())
    }
}

impl Drop for TestNetwork {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.config.base_path());
    }
}

/// Tears the node down when the test ends, even on assertion failure.
pub struct NodeGuard(pub Node);

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.0.teardown();
    }
}

impl std::ops::Deref for NodeGuard {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.0
    }
}

impl std::ops::DerefMut for NodeGuard {
    fn deref_mut(&mut self) -> &mut Node {
        &mut self.0
    }
}

/// A named namespace managed with `ip netns`, deleted on drop.
pub struct TestNamespace {
    name: String,
}

impl TestNamespace {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let name = unique(&format!("netnode-it-{prefix}"));
        run("ip", &["netns", "add", &name])?;
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        let _ = Command::new("ip").args(["netns", "del", &self.name]).status();
    }
}

fn run(cmd: &str, args: &[&str]) -> io::Result<String> {
    let output = Command::new(cmd).args(args).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "{} {:?}: {}",
            cmd,
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `ip -n <ns> <args>`.
pub fn ip_in(ns: &str, args: &[&str]) -> io::Result<String> {
    let mut full = vec!["-n", ns];
    full.extend_from_slice(args);
    run("ip", &full)
}

/// The name a node's namespace is known by.
pub fn ns_of(node: &Node) -> String {
    node.namespace_name().unwrap_or_default()
}

/// Add a dummy interface inside the node's namespace, or one end of a veth
/// pair (peer `<name>p`) on kernels built without the dummy driver.
pub fn add_dummy(node: &Node, name: &str) -> io::Result<()> {
    match ip_in(&ns_of(node), &["link", "add", name, "type", "dummy"]) {
        Ok(_) => Ok(()),
        Err(_) => add_veth(node, name, &format!("{name}p")),
    }
}

/// Add a veth pair inside the node's namespace.
pub fn add_veth(node: &Node, name: &str, peer: &str) -> io::Result<()> {
    ip_in(
        &ns_of(node),
        &["link", "add", name, "type", "veth", "peer", "name", peer],
    )
    .map(drop)
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let a = unique("x");
        let b = unique("x");
        assert_ne!(a, b);
        assert!(a.starts_with("x-"));
    }
}
