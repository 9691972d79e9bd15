//! Outbound chat to the currently selected peer.
//!
//! Lines are queued on a bounded channel and forwarded over a session to
//! whichever peer the selection loop last picked. When the selection moves
//! to another peer, the session is reopened against the new one.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use geomesh_directory::{PeerId, SessionSink, SessionTransport};

/// Lines buffered between stdin and the session.
pub const CHAT_QUEUE_DEPTH: usize = 64;

/// Wait before reopening a session that could not be opened.
pub const CHAT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How a forwarding run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Input closed or shutdown requested.
    Done,
    /// Session broke or the selected peer changed.
    Reopen,
}

/// Read stdin lines into `tx` until EOF. Blank lines are skipped.
pub fn spawn_stdin_reader(tx: mpsc::Sender<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Failed to read stdin");
                    break;
                }
            }
        }
        debug!("Chat input closed");
    })
}

/// Forward queued lines to the selected peer until input closes or shutdown.
pub async fn run_chat(
    transport: Arc<dyn SessionTransport>,
    mut selected: watch::Receiver<Option<PeerId>>,
    mut lines: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    // A line whose send failed, resent first on the next session.
    let mut unsent: Option<String> = None;

    loop {
        let Some(peer) = wait_for_selection(&mut selected, &mut shutdown).await else {
            return;
        };

        let mut sink = match transport.open_session(&peer).await {
            Ok(sink) => sink,
            Err(err) => {
                warn!(peer_id = %peer, error = %err, "Failed to open chat session");
                tokio::select! {
                    _ = tokio::time::sleep(CHAT_RETRY_DELAY) => continue,
                    changed = selected.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    _ = shutdown.changed() => return,
                }
            }
        };
        info!(peer_id = %peer, "Chat session open");

        let end = forward(
            sink.as_mut(),
            &mut unsent,
            &mut selected,
            &mut lines,
            &mut shutdown,
        )
        .await;
        if end == SessionEnd::Done {
            return;
        }
    }
}

async fn wait_for_selection(
    selected: &mut watch::Receiver<Option<PeerId>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<PeerId> {
    loop {
        if let Some(peer) = selected.borrow_and_update().clone() {
            return Some(peer);
        }
        tokio::select! {
            changed = selected.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
            _ = shutdown.changed() => return None,
        }
    }
}

async fn forward(
    sink: &mut dyn SessionSink,
    unsent: &mut Option<String>,
    selected: &mut watch::Receiver<Option<PeerId>>,
    lines: &mut mpsc::Receiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        if let Some(line) = unsent.take() {
            if let Err(err) = sink.send(&line).await {
                warn!(peer_id = %sink.peer_id(), error = %err, "Chat session broke");
                *unsent = Some(line);
                return SessionEnd::Reopen;
            }
            info!(peer_id = %sink.peer_id(), "Message sent");
        }

        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    return SessionEnd::Done;
                };
                *unsent = Some(line);
            }
            changed = selected.changed() => {
                if changed.is_err() {
                    return SessionEnd::Done;
                }
                if selected.borrow().as_ref() != Some(sink.peer_id()) {
                    info!(from = %sink.peer_id(), "Selected peer changed, reopening chat session");
                    return SessionEnd::Reopen;
                }
            }
            _ = shutdown.changed() => return SessionEnd::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomesh_directory::test_utils::RecordingSessionTransport;

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[tokio::test]
    async fn test_lines_reach_selected_peer() {
        let transport = RecordingSessionTransport::new();
        transport.allow("miner-1");

        let (_select_tx, select_rx) = watch::channel(Some(peer("miner-1")));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);

        tx.send("hello".to_string()).await.unwrap();
        tx.send("world".to_string()).await.unwrap();
        drop(tx);

        run_chat(Arc::new(transport.clone()), select_rx, rx, shutdown_rx).await;

        assert_eq!(
            transport.sent(),
            vec![
                (peer("miner-1"), "hello".to_string()),
                (peer("miner-1"), "world".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_waits_for_a_selection() {
        let transport = RecordingSessionTransport::new();
        transport.allow("miner-2");

        let (select_tx, select_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);

        let handle = tokio::spawn(run_chat(
            Arc::new(transport.clone()),
            select_rx,
            rx,
            shutdown_rx,
        ));

        tx.send("queued before selection".to_string()).await.unwrap();
        tokio::task::yield_now().await;
        assert!(transport.sent().is_empty());

        select_tx.send_replace(Some(peer("miner-2")));
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            transport.sent(),
            vec![(peer("miner-2"), "queued before selection".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_peer_is_retried_after_reselection() {
        let transport = RecordingSessionTransport::new();
        transport.allow("miner-2");

        let (select_tx, select_rx) = watch::channel(Some(peer("miner-1")));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);
        tx.send("hi".to_string()).await.unwrap();

        let handle = tokio::spawn(run_chat(
            Arc::new(transport.clone()),
            select_rx,
            rx,
            shutdown_rx,
        ));
        tokio::task::yield_now().await;

        select_tx.send_replace(Some(peer("miner-2")));
        drop(tx);
        handle.await.unwrap();

        assert_eq!(transport.sent(), vec![(peer("miner-2"), "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_line_from_broken_session_is_resent() {
        let transport = RecordingSessionTransport::new();
        transport.allow("miner-1");
        transport.break_sends(1);

        let (_select_tx, select_rx) = watch::channel(Some(peer("miner-1")));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);

        tx.send("first".to_string()).await.unwrap();
        tx.send("second".to_string()).await.unwrap();
        drop(tx);

        run_chat(Arc::new(transport.clone()), select_rx, rx, shutdown_rx).await;

        assert_eq!(transport.opens(), 2);
        assert_eq!(
            transport.sent(),
            vec![
                (peer("miner-1"), "first".to_string()),
                (peer("miner-1"), "second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_chat() {
        let transport = RecordingSessionTransport::new();
        let (_select_tx, select_rx) = watch::channel(None::<PeerId>);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_tx, rx) = mpsc::channel(CHAT_QUEUE_DEPTH);

        let handle = tokio::spawn(run_chat(Arc::new(transport), select_rx, rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("chat loop did not stop")
            .unwrap();
    }
}
