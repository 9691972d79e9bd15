//! Nodes sharing a directory registry find and select each other.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use geomesh_directory::test_utils::RecordingChatHandler;
use geomesh_directory::PeerId;
use geomesh_node::config::{BootstrapPeer, LocationConfig, RegistryBackend};
use geomesh_node::{NodeConfig, NodeRuntime};
use tokio::sync::{mpsc, watch};

fn node_config(id: &str, registry: &Path, latitude: f64, longitude: f64) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.id = Some(id.to_string());
    config.node.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.publisher.interval_secs = 1;
    config.directory.refresh_interval_secs = 1;
    config.directory.probe_timeout_secs = 2;
    config.registry.backend = RegistryBackend::Directory;
    config.registry.path = Some(registry.to_path_buf());
    config.telemetry.location = Some(LocationConfig {
        latitude,
        longitude,
        city: String::new(),
        region: String::new(),
        country: String::new(),
    });
    config.validate().unwrap();
    config
}

fn bootstrap(id: &str, address: SocketAddr) -> BootstrapPeer {
    BootstrapPeer {
        id: id.to_string(),
        address,
    }
}

async fn wait_for_selection(choice: &mut watch::Receiver<Option<PeerId>>, peer: &str) {
    let peer = PeerId::from(peer);
    choice
        .wait_for(|choice| choice.as_ref() == Some(&peer))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_nodes_select_each_other() {
    let registry = tempfile::tempdir().unwrap();
    let recorder = Arc::new(RecordingChatHandler::new());

    // San Francisco and Oakland, ~13 km apart. Only alpha knows where beta is.
    let mut beta = NodeRuntime::build_with_chat_handler(
        node_config("beta", registry.path(), 37.8044, -122.2712),
        recorder.clone(),
    )
    .await
    .unwrap();
    let beta_addr = beta.start().await.unwrap();

    let mut alpha_config = node_config("alpha", registry.path(), 37.7749, -122.4194);
    alpha_config.peers = vec![bootstrap("beta", beta_addr)];
    let mut alpha = NodeRuntime::build(alpha_config).await.unwrap();
    alpha.start().await.unwrap();

    let mut alpha_choice = alpha.subscribe_selection();
    let mut beta_choice = beta.subscribe_selection();

    tokio::time::timeout(Duration::from_secs(15), async {
        wait_for_selection(&mut alpha_choice, "beta").await;
        wait_for_selection(&mut beta_choice, "alpha").await;
    })
    .await
    .expect("nodes never selected each other");

    assert!(alpha.directory().snapshot().contains(&PeerId::from("beta")));
    assert!(!alpha.directory().snapshot().contains(&PeerId::from("alpha")));

    let (tx, rx) = mpsc::channel(8);
    alpha.spawn_chat(rx);
    tx.send("hello beta".to_string()).await.unwrap();

    let expected = (PeerId::from("alpha"), "hello beta".to_string());
    tokio::time::timeout(Duration::from_secs(10), async {
        while !recorder.messages().contains(&expected) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("beta never received the chat line");

    tokio::time::timeout(Duration::from_secs(10), async {
        alpha.shutdown().await;
        beta.shutdown().await;
    })
    .await
    .expect("shutdown hung");
}

#[tokio::test]
async fn test_nodes_meet_through_shared_bootstrap() {
    let registry = tempfile::tempdir().unwrap();

    // New York hub, too far for either neighbour to select.
    let mut hub = NodeRuntime::build(node_config("hub", registry.path(), 40.7128, -74.0060))
        .await
        .unwrap();
    let hub_addr = hub.start().await.unwrap();

    let mut alpha_config = node_config("alpha", registry.path(), 37.7749, -122.4194);
    alpha_config.peers = vec![bootstrap("hub", hub_addr)];
    let mut beta_config = node_config("beta", registry.path(), 37.8044, -122.2712);
    beta_config.peers = vec![bootstrap("hub", hub_addr)];

    let mut alpha = NodeRuntime::build(alpha_config).await.unwrap();
    let mut beta = NodeRuntime::build(beta_config).await.unwrap();
    alpha.start().await.unwrap();
    beta.start().await.unwrap();

    let mut alpha_choice = alpha.subscribe_selection();
    let mut beta_choice = beta.subscribe_selection();

    tokio::time::timeout(Duration::from_secs(15), async {
        wait_for_selection(&mut alpha_choice, "beta").await;
        wait_for_selection(&mut beta_choice, "alpha").await;
    })
    .await
    .expect("neighbours never found each other through the hub");

    assert!(!alpha.address_book().addresses(&PeerId::from("beta")).is_empty());
    assert!(!beta.address_book().addresses(&PeerId::from("alpha")).is_empty());

    tokio::time::timeout(Duration::from_secs(10), async {
        alpha.shutdown().await;
        beta.shutdown().await;
        hub.shutdown().await;
    })
    .await
    .expect("shutdown hung");
}

#[tokio::test]
async fn test_far_node_is_never_selected() {
    let registry = tempfile::tempdir().unwrap();

    // San Francisco and New York, ~4130 km apart.
    let mut east = NodeRuntime::build(node_config("east", registry.path(), 40.7128, -74.0060))
        .await
        .unwrap();
    let east_addr = east.start().await.unwrap();

    let mut west_config = node_config("west", registry.path(), 37.7749, -122.4194);
    west_config.peers = vec![bootstrap("east", east_addr)];
    let mut west = NodeRuntime::build(west_config).await.unwrap();
    west.start().await.unwrap();

    let directory = west.directory().clone();
    tokio::time::timeout(Duration::from_secs(15), async {
        while !directory.snapshot().contains(&PeerId::from("east")) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("east never became live");

    // Live, but outside the default radius.
    assert_eq!(*west.subscribe_selection().borrow(), None);

    west.shutdown().await;
    east.shutdown().await;
}
