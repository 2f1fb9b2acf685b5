use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dimse::{ForwardingNode, NodeAddress, RelayConfig};
use stowrs::config::Config;
use tokio::sync::mpsc;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn relay_config() -> Config {
    let toml = r#"
        [stow]
        url = "http://localhost:8080/dicom-web/studies"

        [relay]
        idle_timeout_secs = 1
        check_interval_secs = 1

        [[relay.nodes]]
        forward_ae_title = "RELAY_CT"

        [[relay.nodes.accepted_sources]]
        ae_title = "CT_SCANNER"

        [[relay.nodes.accepted_sources]]
        ae_title = "WORKSTATION"
        hostname = "127.0.0.1"
        validate_hostname = true

        [[relay.nodes]]
        forward_ae_title = "RELAY_OPEN"
    "#;
    toml.parse().expect("valid relay configuration")
}

#[test]
fn nodes_are_built_from_configuration() {
    let config = relay_config();
    let nodes: Vec<ForwardingNode> = config
        .relay
        .nodes
        .iter()
        .map(|n| ForwardingNode::from_config(n).unwrap())
        .collect();

    let restricted = &nodes[0];
    assert_eq!(restricted.forward_ae_title(), "RELAY_CT");
    assert_eq!(restricted.accepted_source_nodes().len(), 2);

    let scanner = NodeAddress::new("CT_SCANNER", Some("10.0.0.12".into()), Some(104)).unwrap();
    assert!(restricted.is_accepted_source(&scanner));

    let local_peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let workstation = NodeAddress::from_peer("WORKSTATION", local_peer).unwrap();
    assert!(restricted.is_accepted_source(&workstation));

    let spoofed = NodeAddress::new("WORKSTATION", Some("192.0.2.44".into()), Some(104)).unwrap();
    assert!(!restricted.is_accepted_source(&spoofed));

    let stranger = NodeAddress::from_ae_title("UNKNOWN").unwrap();
    assert!(!restricted.is_accepted_source(&stranger));

    // No allow-list: every source is accepted
    assert!(nodes[1].is_accepted_source(&stranger));
}

#[tokio::test]
async fn allow_list_checks_from_async_tasks() {
    let config = relay_config();
    let restricted = ForwardingNode::from_config(&config.relay.nodes[0]).unwrap();

    let local_peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let workstation = NodeAddress::from_peer("WORKSTATION", local_peer).unwrap();
    assert!(restricted.is_accepted_source_async(&workstation).await);

    let spoofed = NodeAddress::new("WORKSTATION", Some("192.0.2.44".into()), Some(104)).unwrap();
    assert!(!restricted.is_accepted_source_async(&spoofed).await);

    let scanner = NodeAddress::from_ae_title("CT_SCANNER").unwrap();
    assert!(restricted.is_accepted_source_async(&scanner).await);
}

#[test]
fn duplicated_relay_titles_are_rejected() {
    let toml = r#"
        [stow]
        url = "http://localhost:8080/dicom-web/studies"

        [[relay.nodes]]
        forward_ae_title = "RELAY"

        [[relay.nodes]]
        forward_ae_title = "RELAY"
    "#;
    assert!(toml.parse::<Config>().is_err());
}

#[test]
fn invalid_source_address_is_rejected() {
    let toml = r#"
        [stow]
        url = "http://localhost:8080/dicom-web/studies"

        [[relay.nodes]]
        forward_ae_title = "RELAY"

        [[relay.nodes.accepted_sources]]
        ae_title = "THIS_TITLE_IS_FAR_TOO_LONG"
    "#;
    assert!(toml.parse::<Config>().is_err());
}

#[test]
fn node_identity_ignores_relay_state() {
    let mut a = ForwardingNode::with_hostname("RELAY", Some("host-a".into())).unwrap();
    let b = ForwardingNode::with_hostname("RELAY", Some("host-b".into())).unwrap();
    a.add_accepted_source_node("CT").unwrap();
    a.touch();

    assert!(a == b);
    let mut set = HashSet::new();
    set.insert(a);
    assert!(!set.insert(b));
}

#[tokio::test]
async fn idle_node_is_signalled_once_per_idle_period() {
    let config = relay_config();
    let mut node = ForwardingNode::from_config(&config.relay.nodes[0]).unwrap();
    let (tx, mut rx) = mpsc::channel(4);

    node.set_activity_timestamp(now_millis() - 60_000);
    node.start_watchdog(&config.relay, tx).await.unwrap();
    assert!(node.has_watchdog());

    let signal = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("idle signal")
        .expect("channel open");
    assert_eq!(signal.forward_ae_title, "RELAY_CT");
    assert!(signal.idle_for >= Duration::from_secs(60));
    assert_eq!(node.activity_timestamp(), 0);

    // No new activity: no second signal
    assert!(tokio::time::timeout(Duration::from_millis(1500), rx.recv())
        .await
        .is_err());

    node.shutdown().await;
    assert!(!node.has_watchdog());
}

#[tokio::test]
async fn active_node_is_not_signalled() {
    let relay = RelayConfig {
        idle_timeout_secs: 5,
        check_interval_secs: 1,
        nodes: Vec::new(),
    };
    let mut node = ForwardingNode::new("RELAY_BUSY").unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    node.start_watchdog(&relay, tx).await.unwrap();

    for _ in 0..3 {
        node.touch();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert!(rx.try_recv().is_err());
    assert_ne!(node.activity_timestamp(), 0);

    node.shutdown().await;
    // The watchdog owned the only sender
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn zero_check_interval_fails_at_start() {
    let relay = RelayConfig {
        idle_timeout_secs: 1,
        check_interval_secs: 0,
        nodes: Vec::new(),
    };
    let mut node = ForwardingNode::new("RELAY_IDLE").unwrap();
    node.set_activity_timestamp(now_millis() - 60_000);
    let (tx, _rx) = mpsc::channel(4);

    assert!(node.start_watchdog(&relay, tx).await.is_err());
    assert!(!node.has_watchdog());
    // The marker is untouched and can still be watched with a valid period
    assert_ne!(node.activity_timestamp(), 0);
}
