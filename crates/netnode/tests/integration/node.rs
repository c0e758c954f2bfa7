//! Node lifecycle integration tests.
//!
//! Tests for namespace creation, adoption and teardown.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use netnode::namespace::{self, NETNS_RUN_DIR};
use netnode::{ContainerRuntime, Error, Interface, Node, NodeOptions, Topology};

use crate::common::{NodeGuard, TestNamespace, TestNetwork, TestResult, ns_of};

/// Resolves every container to this test process.
struct ThisProcess;

impl ContainerRuntime for ThisProcess {
    fn init_pid(&self, _id: &str) -> Result<u32, String> {
        Ok(std::process::id())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[tokio::test]
async fn test_create_and_teardown() -> TestResult {
    require_root!();

    let network = TestNetwork::new("lifecycle");
    let mut node = Node::create(network.clone(), "h1", NodeOptions::new()).await?;

    let ns_name = network.config().namespace_name("h1");
    assert_eq!(ns_of(&node), ns_name);
    assert!(node.namespace().is_some_and(|ns| ns.is_owned()));
    assert!(namespace::exists(&ns_name));
    assert_eq!(network.registered(), vec!["h1".to_string()]);

    // The bind mount refers to the same namespace as the named entry.
    let named = Path::new(NETNS_RUN_DIR).join(&ns_name);
    assert!(same_file(&named, &node.ns_mount_path()));

    node.teardown()?;
    assert!(!namespace::exists(&ns_name));
    assert!(!node.base_path().exists());
    assert!(!namespace::list()?.contains(&ns_name));

    Ok(())
}

#[tokio::test]
async fn test_double_teardown() -> TestResult {
    require_root!();

    let network = TestNetwork::new("twice");
    let mut node = Node::create(network.clone(), "h1", NodeOptions::new()).await?;

    node.teardown()?;
    node.teardown()?;

    assert!(matches!(node.session(), Err(Error::TornDown { .. })));
    let err = node
        .configure_interface(Interface::new("lo"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TornDown { node: ref n } if n == "h1"));
    assert!(matches!(
        node.enable_forwarding(),
        Err(Error::TornDown { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_teardown_after_external_unmount() -> TestResult {
    require_root!();

    let network = TestNetwork::new("extumount");
    let mut node = Node::create(network.clone(), "h1", NodeOptions::new()).await?;

    nix::mount::umount2(&node.ns_mount_path(), nix::mount::MntFlags::MNT_DETACH)?;
    node.teardown()?;
    assert!(!node.base_path().exists());

    Ok(())
}

#[tokio::test]
async fn test_adopt_by_name_keeps_namespace() -> TestResult {
    require_root!();

    let existing = TestNamespace::new("adopt")?;
    crate::common::ip_in(
        existing.name(),
        &["link", "add", "peer0", "type", "veth", "peer", "name", "peer1"],
    )?;

    let network = TestNetwork::new("adopt");
    let opts = NodeOptions::new().existing_namespace(existing.name());
    let mut node = Node::create(network.clone(), "h1", opts).await?;

    assert!(node.namespace().is_some_and(|ns| !ns.is_owned()));
    // The session lives in the adopted namespace.
    let peer = node.session()?.get_link("peer0").await?;
    assert!(peer.is_some());

    node.teardown()?;
    assert!(namespace::exists(existing.name()));
    assert!(!node.base_path().exists());

    Ok(())
}

#[tokio::test]
async fn test_adopt_from_container() -> TestResult {
    require_root!();

    let network = TestNetwork::new("container");
    let opts = NodeOptions::new()
        .existing_container("self")
        .container_runtime(Arc::new(ThisProcess));
    let mut node = Node::create(network.clone(), "h1", opts).await?;

    assert!(node.namespace().is_some_and(|ns| !ns.is_owned()));
    assert!(node.session()?.get_link("lo").await?.is_some());
    assert!(same_file(
        Path::new("/proc/self/ns/net"),
        &node.ns_mount_path()
    ));

    node.teardown()?;

    Ok(())
}

#[tokio::test]
async fn test_name_collision_is_rejected() -> TestResult {
    require_root!();

    let network = TestNetwork::new("collide");
    let taken = network.config().namespace_name("h2");
    std::process::Command::new("ip")
        .args(["netns", "add", &taken])
        .status()?;

    let err = Node::create(network.clone(), "h2", NodeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceCreate { ref name, .. } if *name == taken));
    assert!(network.registered().is_empty());
    assert!(!network.config().node_path("h2").exists());
    // Someone else's namespace is left alone.
    assert!(namespace::exists(&taken));

    std::process::Command::new("ip")
        .args(["netns", "del", &taken])
        .status()?;

    Ok(())
}

#[tokio::test]
async fn test_duplicate_node_keeps_first() -> TestResult {
    require_root!();

    let network = TestNetwork::new("dup");
    let first = NodeGuard(Node::create(network.clone(), "h1", NodeOptions::new()).await?);

    let err = Node::create(network.clone(), "h1", NodeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mount { .. }));
    assert_eq!(network.registered().len(), 1);
    assert!(first.ns_mount_path().exists());
    assert!(first.session()?.get_link("lo").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_leftover_directory_is_reused() -> TestResult {
    require_root!();

    let network = TestNetwork::new("leftover");
    // What a crashed run leaves behind: directories and an unmounted file.
    let ns_dir = network.config().node_path("h1").join("ns");
    std::fs::create_dir_all(&ns_dir)?;
    std::fs::write(ns_dir.join("net"), "")?;

    let mut node = Node::create(network.clone(), "h1", NodeOptions::new()).await?;
    assert!(node.session()?.get_link("lo").await?.is_some());
    assert_eq!(node.to_string(), format!("{}/h1", network.config().name));

    node.teardown()?;
    assert!(!node.base_path().exists());

    Ok(())
}
