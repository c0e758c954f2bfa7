//! Address, route and proc-fs integration tests.

use std::net::IpAddr;

use netnode::namespace;
use netnode::netlink::{AF_INET, AF_INET6, Route};
use netnode::node::{IPV4_FORWARDING, IPV6_FORWARDING};
use netnode::{Error, Interface, IpNet, Node, NodeOptions};

use crate::common::{NodeGuard, TestNetwork, TestResult, add_dummy};

/// A node with a configured, up `eth0`.
async fn node_with_eth0(
    network: &std::sync::Arc<TestNetwork>,
) -> Result<NodeGuard, Box<dyn std::error::Error>> {
    let mut node = NodeGuard(Node::create(network.clone(), "r1", NodeOptions::new()).await?);
    add_dummy(&node, "eth0")?;
    node.configure_interface(Interface::new("eth0")).await?;
    Ok(node)
}

fn read_in(node: &Node, path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let ns = node.namespace().ok_or("node torn down")?;
    let value = namespace::run_in(ns.fd(), || std::fs::read_to_string(path))??;
    Ok(value.trim().to_string())
}

#[tokio::test]
async fn test_address_and_default_route() -> TestResult {
    require_root!();

    let network = TestNetwork::new("addr");
    let node = node_with_eth0(&network).await?;

    let address: IpNet = "10.0.0.1/24".parse()?;
    node.add_address("eth0", address).await?;
    node.add_default_route("10.0.0.254".parse()?).await?;

    let conn = node.session()?;
    let index = node.interface("eth0").and_then(|i| i.index()).expect("index");

    let addrs = conn.get_addresses(index).await?;
    let added = addrs
        .iter()
        .find(|a| a.address == address)
        .expect("address should be assigned");
    assert_eq!(added.broadcast, Some("10.0.0.255".parse::<IpAddr>()?));

    let routes = conn.get_routes(AF_INET).await?;
    let default = routes
        .iter()
        .find(|r| r.is_default())
        .expect("default route should exist");
    assert_eq!(default.gateway, Some("10.0.0.254".parse::<IpAddr>()?));
    assert_eq!(default.oif, Some(index));

    Ok(())
}

#[tokio::test]
async fn test_ipv6_default_route() -> TestResult {
    require_root!();

    let network = TestNetwork::new("v6");
    let node = node_with_eth0(&network).await?;

    // nodad keeps the address usable immediately.
    crate::common::ip_in(
        &crate::common::ns_of(&node),
        &["-6", "addr", "add", "fd00::1/64", "dev", "eth0", "nodad"],
    )?;
    node.add_default_route("fd00::fe".parse()?).await?;

    let routes = node.session()?.get_routes(AF_INET6).await?;
    let default = routes
        .iter()
        .find(|r| r.is_default() && r.gateway.is_some())
        .expect("v6 default route should exist");
    assert_eq!(default.gateway, Some("fd00::fe".parse::<IpAddr>()?));

    Ok(())
}

#[tokio::test]
async fn test_route_via_device_and_table() -> TestResult {
    require_root!();

    let network = TestNetwork::new("dev");
    let node = node_with_eth0(&network).await?;
    node.add_address("eth0", "192.168.7.1/24".parse()?).await?;

    let on_link = Route::new("10.20.0.0/16".parse()?).dev("eth0").metric(50);
    node.add_route(&on_link).await?;

    let custom = Route::new("10.30.0.0/16".parse()?)
        .gateway("192.168.7.254".parse()?)
        .table(1000);
    node.add_route(&custom).await?;

    let routes = node.session()?.get_routes(AF_INET).await?;
    let found = routes
        .iter()
        .find(|r| r.destination == "10.20.0.0/16".parse::<IpNet>().unwrap())
        .expect("on-link route");
    assert_eq!(found.gateway, None);
    assert_eq!(found.metric, Some(50));

    let found = routes
        .iter()
        .find(|r| r.destination == "10.30.0.0/16".parse::<IpNet>().unwrap())
        .expect("table 1000 route");
    assert_eq!(found.table, 1000);

    Ok(())
}

#[tokio::test]
async fn test_route_errors() -> TestResult {
    require_root!();

    let network = TestNetwork::new("rterr");
    let node = node_with_eth0(&network).await?;

    let err = node
        .add_address("eth7", "10.0.0.1/24".parse()?)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LinkNotFound { .. }));

    // No address on eth0, so the gateway is unreachable.
    let err = node
        .add_default_route("10.9.9.9".parse()?)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Route { ref route, .. } if route.starts_with("0.0.0.0/0 via 10.9.9.9")
    ));

    Ok(())
}

#[tokio::test]
async fn test_enable_forwarding() -> TestResult {
    require_root!();

    let network = TestNetwork::new("fwd");
    let node = NodeGuard(Node::create(network.clone(), "r1", NodeOptions::new()).await?);

    // IPv4 settings may be inherited from the host; start from a known state.
    node.write_procfs(IPV4_FORWARDING, "0")?;
    assert_eq!(read_in(&node, IPV4_FORWARDING)?, "0");

    node.enable_forwarding()?;
    assert_eq!(read_in(&node, IPV4_FORWARDING)?, "1");
    assert_eq!(read_in(&node, IPV6_FORWARDING)?, "1");

    Ok(())
}

#[tokio::test]
async fn test_write_procfs_error_names_path() -> TestResult {
    require_root!();

    let network = TestNetwork::new("procerr");
    let node = NodeGuard(Node::create(network.clone(), "r1", NodeOptions::new()).await?);

    let err = node
        .write_procfs("/proc/sys/net/ipv4/no_such_knob", "1")
        .unwrap_err();
    match err {
        Error::ProcFs { path, .. } => {
            assert_eq!(path.to_str(), Some("/proc/sys/net/ipv4/no_such_knob"))
        }
        other => panic!("unexpected error: {other}"),
    }

    Ok(())
}
