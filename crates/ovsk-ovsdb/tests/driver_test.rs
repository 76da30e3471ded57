//! Store and driver against the in-process OVSDB server

use ovsk_ovsdb::{InterfaceType, OvsdbError, PortSpec, SwitchDriver, SwitchStore};
use ovsk_test_utils::FakeOvsdbServer;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn setup(bridge: &str) -> (FakeOvsdbServer, SwitchDriver) {
    let server = FakeOvsdbServer::start().await.unwrap();
    let store = SwitchStore::connect(server.socket_path()).await.unwrap();
    store.monitor_all().await.unwrap();
    (server, SwitchDriver::new(Arc::new(store), bridge))
}

#[tokio::test]
async fn test_monitor_loads_root_row() {
    let (server, driver) = setup("br0").await;
    assert_eq!(
        driver.store().root_uuid().await,
        Some(server.root_uuid().await)
    );
}

#[tokio::test]
async fn test_connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = SwitchStore::connect(dir.path().join("nope.sock"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OvsdbError::Connection { .. }));
}

#[tokio::test]
async fn test_create_bridge_is_idempotent() {
    let (server, driver) = setup("br0").await;

    driver.create_bridge("br0").await.unwrap();
    let after_first = server.transaction_count().await;
    driver.create_bridge("br0").await.unwrap();

    assert_eq!(server.transaction_count().await, after_first);
    let bridges = server.rows("Bridge").await;
    assert_eq!(bridges.len(), 1);
    let root = server.root_uuid().await;
    assert_eq!(
        server.refs("Open_vSwitch", &root, "bridges").await,
        vec![bridges[0].0.clone()]
    );

    // The bridge's own internal port
    let (_, iface) = server.row_by_name("Interface", "br0").await.unwrap();
    assert_eq!(iface["type"], json!("internal"));
    assert!(driver.store().is_bridge_present("br0").await);
}

#[tokio::test]
async fn test_create_then_delete_port_leaves_nothing_behind() {
    let (server, driver) = setup("br0").await;
    driver.create_bridge("br0").await.unwrap();

    driver
        .create_port("p1", InterfaceType::System, 0, "default:web-0", "0a:58:0a:f4:00:07")
        .await
        .unwrap();
    let (port_uuid, port) = server.row_by_name("Port", "p1").await.unwrap();
    assert_eq!(port["vlan_mode"], json!("trunk"));
    let (bridge_uuid, _) = server.row_by_name("Bridge", "br0").await.unwrap();
    assert!(server
        .refs("Bridge", &bridge_uuid, "ports")
        .await
        .contains(&port_uuid));
    assert_eq!(
        driver.store().port_name_by_external_id("iface-id", "default:web-0").await,
        Some("p1".to_string())
    );

    driver.delete_port_by_name("p1").await.unwrap();

    assert!(server.row_by_name("Port", "p1").await.is_none());
    assert!(server.row_by_name("Interface", "p1").await.is_none());
    assert!(!server
        .refs("Bridge", &bridge_uuid, "ports")
        .await
        .contains(&port_uuid));
    assert!(!driver.store().is_port_name_present("p1").await);
}

#[tokio::test]
async fn test_access_vlan_port() {
    let (server, driver) = setup("br0").await;
    driver.create_bridge("br0").await.unwrap();
    driver
        .create_port_with(PortSpec::new("veth-a.1").vlan_tag(100))
        .await
        .unwrap();
    let (_, port) = server.row_by_name("Port", "veth-a.1").await.unwrap();
    assert_eq!(port["vlan_mode"], json!("access"));
    assert_eq!(port["tag"], json!(100));
}

#[tokio::test]
async fn test_create_vtep() {
    let (server, driver) = setup("br0").await;
    driver.create_bridge("br0").await.unwrap();
    driver
        .create_vtep("tun192_168_1_5", "192.168.1.5")
        .await
        .unwrap();

    let (_, iface) = server.row_by_name("Interface", "tun192_168_1_5").await.unwrap();
    assert_eq!(iface["type"], json!("vxlan"));
    assert_eq!(
        iface["options"],
        json!(["map", [["key", "flow"], ["remote_ip", "192.168.1.5"]]])
    );

    // ovs-vswitchd assigns the port number later
    assert_eq!(driver.store().tunnel_port_by_remote_ip("192.168.1.5").await, None);
    server
        .set_column("Interface", "tun192_168_1_5", "ofport", json!(9))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        driver.store().tunnel_port_by_remote_ip("192.168.1.5").await,
        Some(9)
    );
}

#[tokio::test]
async fn test_controller_and_manager_registration() {
    let (server, driver) = setup("br0").await;
    driver.create_bridge("br0").await.unwrap();

    driver.set_active_controller("127.0.0.1", 0).await.unwrap();
    assert!(driver.store().is_controller_present("tcp:127.0.0.1:6653").await);
    let err = driver.set_active_controller("127.0.0.1", 6653).await.unwrap_err();
    assert!(matches!(err, OvsdbError::AlreadyExists { .. }));

    driver.set_passive_manager(0).await.unwrap();
    assert!(driver.store().is_manager_present("ptcp:6640").await);
    let root = server.root_uuid().await;
    assert_eq!(server.refs("Open_vSwitch", &root, "manager_options").await.len(), 1);
}

#[tokio::test]
async fn test_transaction_error_carries_details() {
    let (server, driver) = setup("br0").await;
    server
        .fail_next_transaction("constraint violation", "duplicate bridge name")
        .await;
    let err = driver.create_bridge("br0").await.unwrap_err();
    match err {
        OvsdbError::TransactionFailed { error, details } => {
            assert_eq!(error, "constraint violation");
            assert_eq!(details, "duplicate bridge name");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!driver.store().is_bridge_present("br0").await);
}

#[tokio::test]
async fn test_delete_bridge() {
    let (server, driver) = setup("br0").await;
    driver.create_bridge("br0").await.unwrap();
    driver.delete().await.unwrap();

    assert!(server.rows("Bridge").await.is_empty());
    let root = server.root_uuid().await;
    assert!(server.refs("Open_vSwitch", &root, "bridges").await.is_empty());
    assert!(!driver.store().is_bridge_present("br0").await);
}

#[tokio::test]
async fn test_echo_from_server_is_answered() {
    let (server, _driver) = setup("br0").await;
    server.send_echo("keepalive").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let replies = server.client_replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["id"], json!("keepalive"));
    assert_eq!(replies[0]["result"], json!(["keepalive"]));
}

#[tokio::test]
async fn test_disconnect_fails_requests() {
    let (server, driver) = setup("br0").await;
    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), driver.store().closed())
        .await
        .unwrap();
    let err = driver.store().client().echo().await.unwrap_err();
    assert!(matches!(err, OvsdbError::Disconnected));
}
