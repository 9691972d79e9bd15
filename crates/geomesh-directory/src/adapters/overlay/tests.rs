//! Loopback tests for the TCP overlay

use super::*;
use crate::domain::{PeerId, TransportError};
use crate::ports::{DiscoveryListener, PeerDiscovered, ProbeTransport, SessionTransport};
use crate::test_utils::RecordingChatHandler;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct RunningNode {
    addr: SocketAddr,
    handler: Arc<RecordingChatHandler>,
    _shutdown: watch::Sender<bool>,
}

async fn start_node(id: &str) -> RunningNode {
    start_node_with_book(id, AddressBook::new()).await
}

async fn start_node_with_book(id: &str, book: AddressBook) -> RunningNode {
    let handler = Arc::new(RecordingChatHandler::new());
    let listener = OverlayListener::bind(
        "127.0.0.1:0".parse().unwrap(),
        PeerId::from(id),
        handler.clone(),
    )
    .await
    .unwrap()
    .with_address_book(book);
    let addr = listener.local_addr().unwrap();

    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(listener.run(rx));

    RunningNode {
        addr,
        handler,
        _shutdown: shutdown,
    }
}

async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn client(book: &AddressBook) -> TcpOverlay {
    named_client("client", book)
}

fn named_client(id: &str, book: &AddressBook) -> TcpOverlay {
    TcpOverlay::new(PeerId::from(id), book.clone()).with_connect_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_ping_known_peer() {
    let node = start_node("miner-1").await;
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-1"), &[node.addr]);

    client(&book).ping(&PeerId::from("miner-1")).await.unwrap();
}

#[tokio::test]
async fn test_ping_unknown_peer_is_unreachable() {
    let book = AddressBook::new();
    let result = client(&book).ping(&PeerId::from("nobody")).await;
    assert!(matches!(result, Err(TransportError::Unreachable(_))));
}

#[tokio::test]
async fn test_ping_rejects_wrong_identity() {
    let node = start_node("miner-1").await;
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-2"), &[node.addr]);

    let result = client(&book).ping(&PeerId::from("miner-2")).await;
    assert!(matches!(result, Err(TransportError::ProtocolMismatch(_))));
}

#[tokio::test]
async fn test_ping_closed_port_fails() {
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-1"), &[closed_port().await]);

    assert!(client(&book).ping(&PeerId::from("miner-1")).await.is_err());
}

#[tokio::test]
async fn test_ping_falls_back_to_next_address() {
    let node = start_node("miner-1").await;
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-1"), &[closed_port().await, node.addr]);

    client(&book).ping(&PeerId::from("miner-1")).await.unwrap();
}

#[tokio::test]
async fn test_chat_messages_reach_handler() {
    let node = start_node("miner-1").await;
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-1"), &[node.addr]);

    let mut sink = client(&book)
        .open_session(&PeerId::from("miner-1"))
        .await
        .unwrap();
    assert_eq!(sink.peer_id(), &PeerId::from("miner-1"));

    sink.send("hello").await.unwrap();
    sink.send("two\nlines").await.unwrap();
    drop(sink);

    let expected = vec![
        (PeerId::from("client"), "hello".to_string()),
        (PeerId::from("client"), "two".to_string()),
        (PeerId::from("client"), "lines".to_string()),
    ];
    tokio::time::timeout(Duration::from_secs(5), async {
        while node.handler.messages() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("chat messages not delivered");
}

#[tokio::test]
async fn test_open_session_to_unknown_peer_is_unreachable() {
    let book = AddressBook::new();
    let result = client(&book).open_session(&PeerId::from("nobody")).await;
    assert!(matches!(result, Err(TransportError::Unreachable(_))));
}

#[tokio::test]
async fn test_open_session_to_dead_peer_is_unreachable() {
    let book = AddressBook::new();
    book.insert(PeerId::from("miner-1"), &[closed_port().await]);

    let result = client(&book).open_session(&PeerId::from("miner-1")).await;
    assert!(matches!(result, Err(TransportError::Unreachable(_))));
}

#[tokio::test]
async fn test_peer_exchange_records_requester_and_shares_known_peers() {
    let hub_book = AddressBook::new();
    let hub = start_node_with_book("hub", hub_book.clone()).await;
    let alpha_addr: SocketAddr = "10.0.0.1:15002".parse().unwrap();
    let beta_addr: SocketAddr = "10.0.0.2:15002".parse().unwrap();

    let alpha_book = AddressBook::new();
    alpha_book.insert(PeerId::from("hub"), &[hub.addr]);
    let shared = named_client("alpha", &alpha_book)
        .exchange_peers(&PeerId::from("hub"), alpha_addr)
        .await
        .unwrap();
    assert_eq!(shared, 0);
    assert_eq!(hub_book.addresses(&PeerId::from("alpha")), vec![alpha_addr]);

    let beta_book = AddressBook::new();
    beta_book.insert(PeerId::from("hub"), &[hub.addr]);
    let shared = named_client("beta", &beta_book)
        .exchange_peers(&PeerId::from("hub"), beta_addr)
        .await
        .unwrap();
    assert_eq!(shared, 1);
    assert_eq!(beta_book.addresses(&PeerId::from("alpha")), vec![alpha_addr]);
    assert_eq!(hub_book.peers(), vec![PeerId::from("alpha"), PeerId::from("beta")]);
}

#[tokio::test]
async fn test_exchange_rounds_connect_nodes_through_one_bootstrap() {
    let hub = start_node_with_book("hub", AddressBook::new()).await;
    let alpha = start_node_with_book("alpha", AddressBook::new()).await;
    let beta = start_node_with_book("beta", AddressBook::new()).await;

    let alpha_book = AddressBook::new();
    alpha_book.insert(PeerId::from("hub"), &[hub.addr]);
    let beta_book = AddressBook::new();
    beta_book.insert(PeerId::from("hub"), &[hub.addr]);
    let alpha_client = named_client("alpha", &alpha_book);
    let beta_client = named_client("beta", &beta_book);

    assert_eq!(alpha_client.exchange_round(alpha.addr).await, 0);
    assert_eq!(beta_client.exchange_round(beta.addr).await, 1);
    assert_eq!(alpha_client.exchange_round(alpha.addr).await, 1);

    // Both sides now reach each other directly.
    alpha_client.ping(&PeerId::from("beta")).await.unwrap();
    beta_client.ping(&PeerId::from("alpha")).await.unwrap();
}

#[tokio::test]
async fn test_wildcard_announcement_uses_connection_ip() {
    let hub_book = AddressBook::new();
    let hub = start_node_with_book("hub", hub_book.clone()).await;
    let book = AddressBook::new();
    book.insert(PeerId::from("hub"), &[hub.addr]);

    named_client("alpha", &book)
        .exchange_peers(&PeerId::from("hub"), "0.0.0.0:4000".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(
        hub_book.addresses(&PeerId::from("alpha")),
        vec!["127.0.0.1:4000".parse::<SocketAddr>().unwrap()]
    );
}

#[tokio::test]
async fn test_exchange_with_unknown_peer_is_unreachable() {
    let book = AddressBook::new();
    let result = client(&book)
        .exchange_peers(&PeerId::from("nobody"), "127.0.0.1:1".parse().unwrap())
        .await;
    assert!(matches!(result, Err(TransportError::Unreachable(_))));
}

#[tokio::test]
async fn test_silent_connection_is_dropped_after_handshake_timeout() {
    use tokio::io::AsyncReadExt;

    let listener = OverlayListener::bind(
        "127.0.0.1:0".parse().unwrap(),
        PeerId::from("miner-1"),
        Arc::new(RecordingChatHandler::new()),
    )
    .await
    .unwrap()
    .with_handshake_timeout(Duration::from_millis(100));
    let addr = listener.local_addr().unwrap();
    let (_shutdown, rx) = watch::channel(false);
    tokio::spawn(listener.run(rx));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("listener kept a silent connection open");
    assert_eq!(read.unwrap_or(0), 0);
}

#[tokio::test]
async fn test_frame_line_limit_excludes_terminator() {
    use super::protocol::MAX_LINE_BYTES;
    use super::transport::read_frame_line;

    let exact = format!("{}\r\n", "a".repeat(MAX_LINE_BYTES));
    let line = read_frame_line(&mut exact.as_bytes()).await.unwrap().unwrap();
    assert_eq!(line.len(), MAX_LINE_BYTES);

    let exact_lf = format!("{}\n", "a".repeat(MAX_LINE_BYTES));
    assert!(read_frame_line(&mut exact_lf.as_bytes()).await.unwrap().is_some());

    let over = format!("{}\r\n", "a".repeat(MAX_LINE_BYTES + 1));
    assert!(matches!(
        read_frame_line(&mut over.as_bytes()).await,
        Err(TransportError::ProtocolMismatch(_))
    ));

    let unterminated = "a".repeat(MAX_LINE_BYTES + 5);
    assert!(read_frame_line(&mut unterminated.as_bytes()).await.is_err());
}

#[test]
fn test_address_book_merges_announcements() {
    let book = AddressBook::new();
    let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:4000".parse().unwrap();
    let peer = PeerId::from("miner-1");

    book.insert(peer.clone(), &[a]);
    book.on_peer_discovered(PeerDiscovered {
        peer_id: peer.clone(),
        known_addresses: vec![b, a],
    });
    assert_eq!(book.addresses(&peer), vec![b, a]);

    book.insert(peer.clone(), &[a]);
    assert_eq!(book.addresses(&peer), vec![a, b]);

    book.insert(peer.clone(), &[]);
    assert_eq!(book.len(), 1);
    assert_eq!(book.entries(), vec![(peer.clone(), vec![a, b])]);

    book.remove(&peer);
    assert!(book.is_empty());
}
