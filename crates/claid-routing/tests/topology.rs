/// Topology parsing and path resolution over the public API.
use std::sync::Arc;

use claid_routing::{
    ClientTable, Direction, ErrorKind, HostDescription, HostDescriptions, HostUserTable,
    MasterRouter, ModuleTable, RouteStrategy, RouterConfig, RoutingError, RoutingTree,
};

/// Server1
///   Server2
///     Server3: Client5, Client6
///     Server4
///       Server5: Client10, Client11
///   Client1, Client2
fn deployment() -> HostDescriptions {
    vec![
        HostDescription::root("Server1", "10.0.0.1:1337"),
        HostDescription::server("Server2", "10.0.0.2:1337", "Server1"),
        HostDescription::server("Server3", "10.0.0.3:1337", "Server2"),
        HostDescription::server("Server4", "10.0.0.4:1337", "Server2"),
        HostDescription::server("Server5", "10.0.0.5:1337", "Server4"),
        HostDescription::client("Client1", "Server1"),
        HostDescription::client("Client2", "Server1"),
        HostDescription::client("Client5", "Server3"),
        HostDescription::client("Client6", "Server3"),
        HostDescription::client("Client10", "Server5"),
        HostDescription::client("Client11", "Server5"),
    ]
    .try_into()
    .unwrap()
}

fn master_at(host: &str) -> MasterRouter {
    MasterRouter::new(
        host,
        Arc::new(ModuleTable::new()),
        Arc::new(HostUserTable::new()),
        Arc::new(ClientTable::new()),
        RouterConfig::default(),
    )
}

#[test]
fn path_between_leaves_in_sibling_subtrees() {
    let tree = RoutingTree::from_hosts(&deployment()).unwrap();
    let route = tree.route_between("Client6", "Client11").unwrap();
    assert_eq!(
        route.path,
        vec!["Server3", "Server2", "Server4", "Server5", "Client11"]
    );
    assert_eq!(route.direction, Direction::Up);
}

#[test]
fn every_host_agrees_on_the_next_hop() {
    let tree = RoutingTree::from_hosts(&deployment()).unwrap();
    let full = tree.route_between("Client6", "Client11").unwrap().path;

    // Re-resolving at each hop walks exactly the path resolved at the source.
    let mut at = "Client6".to_string();
    let mut walked = Vec::new();
    while at != "Client11" {
        let route = tree.route_between(&at, "Client11").unwrap();
        let expected = if tree.subtree(&at).unwrap().contains("Client11") {
            Direction::Down
        } else {
            Direction::Up
        };
        assert_eq!(route.direction, expected, "at {at}");
        at = route.next_hop().unwrap().to_string();
        walked.push(at.clone());
    }
    assert_eq!(walked, full);
}

#[test]
fn routing_table_per_host() {
    let mut server2 = master_at("Server2");
    server2.build_routing_table(&deployment()).unwrap();
    let table = server2.routing_table();

    assert_eq!(table.len(), 11);
    assert_eq!(table["Server2"], RouteStrategy::Local);
    for below in ["Server3", "Server4", "Server5", "Client5", "Client6", "Client10", "Client11"] {
        assert_eq!(table[below], RouteStrategy::Server, "{below}");
    }
    for other in ["Server1", "Client1", "Client2"] {
        assert_eq!(table[other], RouteStrategy::Client, "{other}");
    }

    let mut root = master_at("Server1");
    root.build_routing_table(&deployment()).unwrap();
    for (host, strategy) in root.routing_table() {
        let expected = if host == "Server1" {
            RouteStrategy::Local
        } else {
            RouteStrategy::Server
        };
        assert_eq!(strategy, expected, "{host}");
    }
}

// ── Malformed topologies ───────────────────────────────────────────────

fn build(hosts: Vec<HostDescription>) -> Result<(), RoutingError> {
    let hosts: HostDescriptions = hosts.try_into()?;
    master_at(&hosts.as_slice()[0].hostname).build_routing_table(&hosts)
}

#[test]
fn two_roots_fail() {
    let err = build(vec![
        HostDescription::root("Server1", "a:1"),
        HostDescription::root("Server2", "b:1"),
    ])
    .unwrap_err();
    assert!(matches!(err, RoutingError::MultipleRoots { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn self_connection_fails() {
    let err = build(vec![
        HostDescription::root("Server1", "a:1"),
        HostDescription::server("Server2", "b:1", "Server2"),
    ])
    .unwrap_err();
    assert!(matches!(err, RoutingError::SelfConnection { .. }));
}

#[test]
fn shared_server_address_fails() {
    let err = build(vec![
        HostDescription::root("Server1", "10.0.0.1:1337"),
        HostDescription::server("Server2", "10.0.0.1:1337", "Server1"),
    ])
    .unwrap_err();
    assert!(matches!(err, RoutingError::DuplicateServerAddress { .. }));
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn duplicate_host_name_fails() {
    let mut hosts = HostDescriptions::new();
    hosts.insert(HostDescription::root("Server1", "a:1")).unwrap();
    let err = hosts
        .insert(HostDescription::client("Server1", "Server1"))
        .unwrap_err();
    assert!(matches!(err, RoutingError::DuplicateHost { .. }));
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn failed_build_keeps_previous_table() {
    let mut router = master_at("Server1");
    router.build_routing_table(&deployment()).unwrap();

    let broken: HostDescriptions = vec![
        HostDescription::root("Server1", "a:1"),
        HostDescription::client("Client1", "Ghost"),
    ]
    .try_into()
    .unwrap();
    let err = router.build_routing_table(&broken).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(router.routing_table().len(), 11);
}
