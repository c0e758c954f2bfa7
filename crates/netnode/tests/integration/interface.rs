//! Interface configuration integration tests.
//!
//! Link attributes, the netem/tbf chain and link state, verified through
//! the node's own netlink session.

use std::time::Duration;

use netnode::interface::{NETEM_HANDLE, TBF_HANDLE};
use netnode::netlink::{NetemConfig, TbfConfig, tc_handle};
use netnode::{Error, Interface, LinkAttribute, Node, NodeOptions};

use crate::common::{NodeGuard, TestNetwork, TestResult, add_dummy, add_veth};

async fn node_with_dummy(
    network: &std::sync::Arc<TestNetwork>,
    link: &str,
) -> Result<NodeGuard, Box<dyn std::error::Error>> {
    let node = NodeGuard(Node::create(network.clone(), "h1", NodeOptions::new()).await?);
    add_dummy(&node, link)?;
    Ok(node)
}

#[tokio::test]
async fn test_mtu_and_delay() -> TestResult {
    require_root!();

    let network = TestNetwork::new("mtudelay");
    let mut node = node_with_dummy(&network, "eth0").await?;

    node.configure_interface(
        Interface::new("eth0")
            .mtu(1400)
            .netem(NetemConfig::new().delay(Duration::from_millis(10))),
    )
    .await?;

    let conn = node.session()?;
    let link = conn.get_link("eth0").await?.expect("eth0 exists");
    assert_eq!(link.mtu, Some(1400));
    assert!(link.is_up());

    let qdiscs = conn.get_qdiscs(link.index).await?;
    let netem = qdiscs
        .iter()
        .find(|q| q.kind == "netem")
        .expect("netem qdisc should exist");
    assert_eq!(netem.handle, NETEM_HANDLE);
    assert_eq!(netem.parent, tc_handle::ROOT);
    assert_eq!(netem.netem_delay(), Some(Duration::from_millis(10)));
    assert!(qdiscs.iter().all(|q| q.kind != "tbf"));

    let configured = node.interface("eth0").expect("eth0 registered");
    assert_eq!(configured.index(), Some(link.index));
    assert_eq!(network.hosts_file_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_netem_parents_tbf() -> TestResult {
    require_root!();

    let network = TestNetwork::new("chain");
    let mut node = node_with_dummy(&network, "eth0").await?;

    node.configure_interface(
        Interface::new("eth0")
            .netem(NetemConfig::new().delay(Duration::from_millis(5)).loss(1.0))
            .tbf(TbfConfig::new().rate_bps(10_000_000).burst(32_000)),
    )
    .await?;

    let conn = node.session()?;
    let index = node.interface("eth0").and_then(|i| i.index()).expect("index");
    let qdiscs = conn.get_qdiscs(index).await?;

    let netem = qdiscs.iter().find(|q| q.kind == "netem").expect("netem");
    let tbf = qdiscs.iter().find(|q| q.kind == "tbf").expect("tbf");
    assert_eq!(netem.parent, tc_handle::ROOT);
    assert_eq!(netem.handle, NETEM_HANDLE);
    assert_eq!(tbf.parent, NETEM_HANDLE);
    assert_eq!(tbf.handle, TBF_HANDLE);

    Ok(())
}

#[tokio::test]
async fn test_tbf_alone_at_root() -> TestResult {
    require_root!();

    let network = TestNetwork::new("tbfonly");
    let mut node = node_with_dummy(&network, "eth0").await?;

    node.configure_interface(Interface::new("eth0").tbf(TbfConfig::new().rate(125_000)))
        .await?;

    let index = node.interface("eth0").and_then(|i| i.index()).expect("index");
    let qdiscs = node.session()?.get_qdiscs(index).await?;
    let tbf = qdiscs.iter().find(|q| q.kind == "tbf").expect("tbf");
    assert_eq!(tbf.parent, tc_handle::ROOT);
    assert_eq!(tbf.handle, TBF_HANDLE);

    Ok(())
}

#[tokio::test]
async fn test_all_link_attributes() -> TestResult {
    require_root!();

    let network = TestNetwork::new("attrs");
    let mut node = node_with_dummy(&network, "eth0").await?;

    node.configure_interface(
        Interface::new("eth0")
            .mtu(9000)
            .hardware_addr([0x02, 0x00, 0x00, 0x00, 0xbe, 0xef])
            .tx_queue_len(250)
            .group(7),
    )
    .await?;

    let link = node.session()?.get_link("eth0").await?.expect("eth0");
    assert_eq!(link.mtu, Some(9000));
    assert_eq!(link.mac().as_deref(), Some("02:00:00:00:be:ef"));
    assert_eq!(link.tx_queue_len, Some(250));
    assert_eq!(link.group, Some(7));
    assert!(link.is_up());

    // Without netem or tbf only the kernel's default qdisc remains.
    let qdiscs = node.session()?.get_qdiscs(link.index).await?;
    assert!(qdiscs.iter().all(|q| q.kind != "netem" && q.kind != "tbf"));
    assert!(qdiscs.iter().all(|q| q.handle != NETEM_HANDLE && q.handle != TBF_HANDLE));

    Ok(())
}

#[tokio::test]
async fn test_missing_link() -> TestResult {
    require_root!();

    let network = TestNetwork::new("nolink");
    let mut node = NodeGuard(Node::create(network.clone(), "h1", NodeOptions::new()).await?);

    let err = node
        .configure_interface(Interface::new("eth9").mtu(1400))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LinkNotFound { ref interface, .. } if interface == "eth9"));
    assert!(node.interfaces().is_empty());
    assert_eq!(network.hosts_file_calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_mtu_failure_leaves_interface_unregistered() -> TestResult {
    require_root!();

    let network = TestNetwork::new("badmtu");
    let mut node = NodeGuard(Node::create(network.clone(), "h1", NodeOptions::new()).await?);
    // veth caps the MTU at 65535.
    add_veth(&node, "eth0", "eth0p")?;

    let err = node
        .configure_interface(
            Interface::new("eth0")
                .mtu(70_000)
                .netem(NetemConfig::new().delay(Duration::from_millis(1))),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LinkAttribute {
            attribute: LinkAttribute::Mtu(70_000),
            ..
        }
    ));
    assert!(node.interface("eth0").is_none());
    assert_eq!(network.hosts_file_calls(), 0);

    // Nothing after the failing step was applied.
    let conn = node.session()?;
    let link = conn.get_link("eth0").await?.expect("eth0");
    assert!(!link.is_up());
    let qdiscs = conn.get_qdiscs(link.index).await?;
    assert!(qdiscs.iter().all(|q| q.kind != "netem"));

    Ok(())
}

#[tokio::test]
async fn test_hosts_file_failure_keeps_interface() -> TestResult {
    require_root!();

    let network = TestNetwork::new("hosts");
    let mut node = node_with_dummy(&network, "eth0").await?;
    network.break_hosts_file();

    let err = node
        .configure_interface(Interface::new("eth0").mtu(1400))
        .await
        .unwrap_err();
    assert!(err.is_hosts_file());
    assert!(node.interface("eth0").is_some());

    Ok(())
}

#[tokio::test]
async fn test_apply_configured_interfaces() -> TestResult {
    require_root!();

    let network = TestNetwork::new("pending");
    let mut node = node_with_dummy(&network, "eth0").await?;
    add_dummy(&node, "eth1")?;

    node.add_interface(Interface::new("eth0").mtu(1400));
    node.add_interface(Interface::new("missing0"));
    node.add_interface(Interface::new("eth1").mtu(1300));
    assert_eq!(node.configured_interfaces().len(), 3);

    let err = node.apply_configured_interfaces().await.unwrap_err();
    assert!(matches!(err, Error::LinkNotFound { .. }));
    assert_eq!(node.interfaces().len(), 1);
    let pending: Vec<_> = node
        .configured_interfaces()
        .iter()
        .map(|i| i.name.as_str())
        .collect();
    assert_eq!(pending, ["missing0", "eth1"]);

    add_dummy(&node, "missing0")?;
    node.apply_configured_interfaces().await?;
    assert!(node.configured_interfaces().is_empty());
    assert_eq!(node.interfaces().len(), 3);
    assert_eq!(network.hosts_file_calls(), 3);

    Ok(())
}

#[tokio::test]
async fn test_interfaces_from_options() -> TestResult {
    require_root!();

    let network = TestNetwork::new("optifaces");
    let opts = NodeOptions::new()
        .interface(Interface::new("eth0").mtu(1400))
        .interface(Interface::new("eth1").tx_queue_len(100));
    let mut node = NodeGuard(Node::create(network.clone(), "h1", opts).await?);

    let queued: Vec<_> = node
        .configured_interfaces()
        .iter()
        .map(|i| i.name.as_str())
        .collect();
    assert_eq!(queued, ["eth0", "eth1"]);
    assert!(node.interfaces().is_empty());

    add_dummy(&node, "eth0")?;
    add_dummy(&node, "eth1")?;
    node.apply_configured_interfaces().await?;

    let link = node.session()?.get_link("eth0").await?.expect("eth0");
    assert_eq!(link.mtu, Some(1400));
    assert_eq!(node.interfaces().len(), 2);

    Ok(())
}
