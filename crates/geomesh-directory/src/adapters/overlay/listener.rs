use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::address_book::AddressBook;
use super::protocol::{Frame, MAX_SHARED_PEERS};
use super::transport::read_frame_line;
use crate::domain::{PeerId, TransportError};
use crate::ports::{ChatHandler, DiscoveryListener, PeerDiscovered};

/// How long a new connection may stay silent before its first frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server side of the TCP overlay.
///
/// Answers `PING` with `PONG` carrying this node's id, hands every line of a
/// `CHAT` session to the chat handler, and answers `PEERS` from its address
/// book after recording the requester in it.
pub struct OverlayListener {
    local_id: PeerId,
    listener: TcpListener,
    chat_handler: Arc<dyn ChatHandler>,
    book: AddressBook,
    handshake_timeout: Duration,
}

/// Per-connection view of the listener.
struct Connection {
    local_id: PeerId,
    chat_handler: Arc<dyn ChatHandler>,
    book: AddressBook,
    handshake_timeout: Duration,
}

impl OverlayListener {
    /// Bind to `addr`. Port 0 picks a free port.
    pub async fn bind(
        addr: SocketAddr,
        local_id: PeerId,
        chat_handler: Arc<dyn ChatHandler>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            local_id,
            listener,
            chat_handler,
            book: AddressBook::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Share `book` with the outbound side of this node.
    ///
    /// Peers that announce themselves with `PEERS` are added to it.
    pub fn with_address_book(mut self, book: AddressBook) -> Self {
        self.book = book;
        self
    }

    /// Override the first-frame deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            local_id,
            listener,
            chat_handler,
            book,
            handshake_timeout,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(peer_id = %local_id, %addr, "Overlay listener started");
        }

        let connection = Arc::new(Connection {
            local_id,
            chat_handler,
            book,
            handshake_timeout,
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let connection = Arc::clone(&connection);
                        tokio::spawn(async move {
                            if let Err(err) = connection.serve(stream, remote).await {
                                debug!(%remote, error = %err, "Overlay connection ended with error");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "Failed to accept overlay connection"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Overlay listener stopped");
                        break;
                    }
                }
            }
        }
    }
}

impl Connection {
    async fn serve(&self, stream: TcpStream, remote: SocketAddr) -> Result<(), TransportError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let first = tokio::time::timeout(self.handshake_timeout, read_frame_line(&mut reader))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let Some(first) = first else {
            return Ok(());
        };

        match Frame::parse(&first)? {
            Frame::Ping { nonce } => {
                let pong = Frame::Pong {
                    nonce,
                    peer_id: self.local_id.clone(),
                };
                write_half.write_all(pong.encode().as_bytes()).await?;
                write_half.flush().await?;
            }
            Frame::Chat { from } => {
                debug!(peer_id = %from, "Chat session opened");
                while let Some(message) = read_frame_line(&mut reader).await? {
                    self.chat_handler.on_message(&from, &message);
                }
                debug!(peer_id = %from, "Chat session closed");
            }
            Frame::Peers { from, listen_addr } => {
                self.exchange(&mut write_half, from, advertised_address(listen_addr, remote))
                    .await?;
            }
            other => {
                return Err(TransportError::ProtocolMismatch(format!(
                    "unexpected first frame {other:?}"
                )))
            }
        }
        Ok(())
    }

    /// Record the requester, then reply with every other known peer.
    async fn exchange(
        &self,
        writer: &mut OwnedWriteHalf,
        from: PeerId,
        announced: SocketAddr,
    ) -> Result<(), TransportError> {
        if from != self.local_id {
            self.book.on_peer_discovered(PeerDiscovered {
                peer_id: from.clone(),
                known_addresses: vec![announced],
            });
        }

        let mut reply = String::new();
        let shared = self
            .book
            .entries()
            .into_iter()
            .filter(|(peer, _)| peer != &from && peer != &self.local_id)
            .take(MAX_SHARED_PEERS);
        for (peer_id, addresses) in shared {
            for addr in addresses {
                let frame = Frame::Peer {
                    peer_id: peer_id.clone(),
                    addr,
                };
                reply.push_str(&frame.encode());
            }
        }
        reply.push_str(&Frame::End.encode());

        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
        debug!(peer_id = %from, %announced, "Answered peer exchange");
        Ok(())
    }
}

/// Address other nodes should dial to reach a requester listening on
/// `listen_addr`. A wildcard IP is replaced by the IP the request came from.
fn advertised_address(listen_addr: SocketAddr, remote: SocketAddr) -> SocketAddr {
    if listen_addr.ip().is_unspecified() {
        SocketAddr::new(remote.ip(), listen_addr.port())
    } else {
        listen_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_listen_address_takes_remote_ip() {
        let remote: SocketAddr = "192.168.1.20:51234".parse().unwrap();

        let wildcard: SocketAddr = "0.0.0.0:15002".parse().unwrap();
        assert_eq!(
            advertised_address(wildcard, remote),
            "192.168.1.20:15002".parse::<SocketAddr>().unwrap()
        );

        let explicit: SocketAddr = "10.0.0.5:15002".parse().unwrap();
        assert_eq!(advertised_address(explicit, remote), explicit);
    }
}
