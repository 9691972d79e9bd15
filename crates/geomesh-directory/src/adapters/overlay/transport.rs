use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::address_book::AddressBook;
use super::protocol::{Frame, MAX_LINE_BYTES, MAX_SHARED_PEERS};
use crate::domain::{PeerId, TransportError};
use crate::ports::{DiscoveryListener, PeerDiscovered, ProbeTransport, SessionSink, SessionTransport};

/// Default deadline for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer exchanges in flight at once during one round.
const EXCHANGE_FAN_OUT: usize = 8;

type PeerList = BTreeMap<PeerId, Vec<SocketAddr>>;

/// Client side of the TCP overlay.
///
/// Resolves peers through an [`AddressBook`] and tries their addresses in
/// order until one answers.
#[derive(Debug, Clone)]
pub struct TcpOverlay {
    local_id: PeerId,
    book: AddressBook,
    connect_timeout: Duration,
}

impl TcpOverlay {
    /// Create a client for node `local_id`.
    pub fn new(local_id: PeerId, book: AddressBook) -> Self {
        Self {
            local_id,
            book,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address book this client resolves through.
    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    /// Announce this node to `peer` and merge the peers it shares into the
    /// address book.
    ///
    /// `advertise` is the overlay address other nodes should dial; a wildcard
    /// IP is resolved by `peer` from the connection. Returns how many peers
    /// `peer` shared.
    pub async fn exchange_peers(
        &self,
        peer: &PeerId,
        advertise: SocketAddr,
    ) -> Result<usize, TransportError> {
        let shared = self
            .with_each_address(peer, |addr| self.exchange_with(addr, advertise))
            .await?;
        let count = shared.len();

        for (peer_id, known_addresses) in shared {
            if peer_id != self.local_id {
                self.book.on_peer_discovered(PeerDiscovered {
                    peer_id,
                    known_addresses,
                });
            }
        }
        Ok(count)
    }

    /// Exchange peers with everyone in the address book.
    ///
    /// Failed exchanges are logged and skipped. Returns how many peers the
    /// book gained.
    pub async fn exchange_round(&self, advertise: SocketAddr) -> usize {
        let before = self.book.len();
        let peers: Vec<PeerId> = self
            .book
            .peers()
            .into_iter()
            .filter(|peer| peer != &self.local_id)
            .collect();

        stream::iter(peers)
            .map(|peer| async move {
                if let Err(err) = self.exchange_peers(&peer, advertise).await {
                    debug!(peer_id = %peer, error = %err, "Peer exchange failed");
                }
            })
            .buffer_unordered(EXCHANGE_FAN_OUT)
            .collect::<Vec<()>>()
            .await;

        self.book.len().saturating_sub(before)
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, TransportError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Run `attempt` against each known address of `peer` until one succeeds.
    async fn with_each_address<T, F, Fut>(&self, peer: &PeerId, attempt: F) -> Result<T, TransportError>
    where
        F: Fn(SocketAddr) -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        let addresses = self.book.addresses(peer);
        let mut last_error = TransportError::Unreachable(format!("no known address for {peer}"));

        for addr in addresses {
            match attempt(addr).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(peer_id = %peer, %addr, error = %err, "Address attempt failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn ping_address(&self, addr: SocketAddr, peer: &PeerId) -> Result<(), TransportError> {
        let stream = self.connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let nonce = rand::random::<u64>();
        write_half
            .write_all(Frame::Ping { nonce }.encode().as_bytes())
            .await?;

        let mut reader = BufReader::new(read_half);
        let line = read_frame_line(&mut reader)
            .await?
            .ok_or_else(|| TransportError::ProtocolMismatch("closed before PONG".to_string()))?;

        match Frame::parse(&line)? {
            Frame::Pong { nonce: echoed, peer_id } if echoed == nonce && &peer_id == peer => Ok(()),
            Frame::Pong { peer_id, .. } if &peer_id != peer => Err(TransportError::ProtocolMismatch(
                format!("{addr} answered as {peer_id}"),
            )),
            other => Err(TransportError::ProtocolMismatch(format!(
                "unexpected reply {other:?}"
            ))),
        }
    }

    async fn exchange_with(
        &self,
        addr: SocketAddr,
        advertise: SocketAddr,
    ) -> Result<PeerList, TransportError> {
        let stream = self.connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = Frame::Peers {
            from: self.local_id.clone(),
            listen_addr: advertise,
        };
        write_half.write_all(request.encode().as_bytes()).await?;

        let mut reader = BufReader::new(read_half);
        tokio::time::timeout(self.connect_timeout, read_peer_list(&mut reader))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn open_chat(&self, addr: SocketAddr, peer: &PeerId) -> Result<TcpSessionSink, TransportError> {
        let stream = self.connect(addr).await?;
        let (_, mut writer) = stream.into_split();
        writer
            .write_all(
                Frame::Chat {
                    from: self.local_id.clone(),
                }
                .encode()
                .as_bytes(),
            )
            .await?;

        Ok(TcpSessionSink {
            peer_id: peer.clone(),
            writer,
        })
    }
}

#[async_trait]
impl ProbeTransport for TcpOverlay {
    async fn ping(&self, peer: &PeerId) -> Result<(), TransportError> {
        self.with_each_address(peer, |addr| self.ping_address(addr, peer))
            .await
    }
}

#[async_trait]
impl SessionTransport for TcpOverlay {
    async fn open_session(&self, peer: &PeerId) -> Result<Box<dyn SessionSink>, TransportError> {
        let sink = self
            .with_each_address(peer, |addr| self.open_chat(addr, peer))
            .await
            .map_err(|err| match err {
                TransportError::Unreachable(_) => err,
                other => TransportError::Unreachable(format!("{peer}: {other}")),
            })?;
        Ok(Box::new(sink))
    }
}

/// Write half of an outbound chat session.
#[derive(Debug)]
pub struct TcpSessionSink {
    peer_id: PeerId,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl SessionSink for TcpSessionSink {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        for line in message.lines() {
            if line.len() > MAX_LINE_BYTES {
                return Err(TransportError::ProtocolMismatch(format!(
                    "message line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}

/// Collect `PEER` lines up to the closing `END`.
async fn read_peer_list(reader: &mut BufReader<OwnedReadHalf>) -> Result<PeerList, TransportError> {
    let mut shared = PeerList::new();
    loop {
        let line = read_frame_line(reader)
            .await?
            .ok_or_else(|| TransportError::ProtocolMismatch("closed before END".to_string()))?;

        match Frame::parse(&line)? {
            Frame::Peer { peer_id, addr } => shared.entry(peer_id).or_default().push(addr),
            Frame::End => return Ok(shared),
            other => {
                return Err(TransportError::ProtocolMismatch(format!(
                    "unexpected reply {other:?}"
                )))
            }
        }

        if shared.len() > MAX_SHARED_PEERS {
            return Err(TransportError::ProtocolMismatch(format!(
                "more than {MAX_SHARED_PEERS} peers shared"
            )));
        }
    }
}

/// Read one line of at most [`MAX_LINE_BYTES`], without its terminator.
///
/// `Ok(None)` on a clean end of stream.
pub(crate) async fn read_frame_line<R>(reader: &mut R) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the content plus a `\r\n` terminator.
    let limit = MAX_LINE_BYTES + 2;

    let mut line = String::new();
    let read = reader.take(limit as u64).read_line(&mut line).await?;

    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && read >= limit {
        return Err(oversize());
    }

    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    if trimmed > MAX_LINE_BYTES {
        return Err(oversize());
    }
    line.truncate(trimmed);
    Ok(Some(line))
}

fn oversize() -> TransportError {
    TransportError::ProtocolMismatch(format!("line exceeds {MAX_LINE_BYTES} bytes"))
}
