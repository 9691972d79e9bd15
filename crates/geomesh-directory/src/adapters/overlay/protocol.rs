//! Line protocol spoken between overlay nodes.
//!
//! Every frame is one UTF-8 line terminated by `\n`:
//!
//! ```text
//! PING <nonce>              client -> listener
//! PONG <nonce> <peer-id>    listener -> client
//! CHAT <peer-id>            client -> listener, opens a chat session
//! <message>                 every following line is one chat message
//! PEERS <peer-id> <addr>    client -> listener, announces the client's overlay
//!                           address and asks for the peers the listener knows
//! PEER <peer-id> <addr>     listener -> client, one per known address
//! END                       listener -> client, closes the PEER list
//! ```

use std::net::SocketAddr;

use crate::domain::{PeerId, TransportError};

/// Longest accepted line, in bytes, excluding the terminator.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Most peers handed out in one `PEERS` reply.
pub const MAX_SHARED_PEERS: usize = 64;

/// A control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness request.
    Ping {
        /// Echoed back in the reply.
        nonce: u64,
    },
    /// Liveness reply.
    Pong {
        /// Nonce of the request.
        nonce: u64,
        /// Id of the answering node.
        peer_id: PeerId,
    },
    /// Opens a chat session from `from`.
    Chat {
        /// Sender of the following messages.
        from: PeerId,
    },
    /// Peer exchange request.
    Peers {
        /// Requesting node.
        from: PeerId,
        /// Where the requesting node accepts overlay connections.
        listen_addr: SocketAddr,
    },
    /// One known address in a peer exchange reply.
    Peer {
        /// Peer the address belongs to.
        peer_id: PeerId,
        /// Overlay address.
        addr: SocketAddr,
    },
    /// End of a peer exchange reply.
    End,
}

impl Frame {
    /// Render as a protocol line including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Self::Ping { nonce } => format!("PING {nonce}\n"),
            Self::Pong { nonce, peer_id } => format!("PONG {nonce} {peer_id}\n"),
            Self::Chat { from } => format!("CHAT {from}\n"),
            Self::Peers { from, listen_addr } => format!("PEERS {from} {listen_addr}\n"),
            Self::Peer { peer_id, addr } => format!("PEER {peer_id} {addr}\n"),
            Self::End => "END\n".to_string(),
        }
    }

    /// Parse one line, with or without its terminator.
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split(' ');

        let frame = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("PING"), Some(nonce), None, None) => Self::Ping {
                nonce: parse_nonce(nonce)?,
            },
            (Some("PONG"), Some(nonce), Some(id), None) if !id.is_empty() => Self::Pong {
                nonce: parse_nonce(nonce)?,
                peer_id: PeerId::new(id),
            },
            (Some("CHAT"), Some(id), None, None) if !id.is_empty() => Self::Chat {
                from: PeerId::new(id),
            },
            (Some("PEERS"), Some(id), Some(addr), None) if !id.is_empty() => Self::Peers {
                from: PeerId::new(id),
                listen_addr: parse_addr(addr)?,
            },
            (Some("PEER"), Some(id), Some(addr), None) if !id.is_empty() => Self::Peer {
                peer_id: PeerId::new(id),
                addr: parse_addr(addr)?,
            },
            (Some("END"), None, None, None) => Self::End,
            _ => return Err(TransportError::ProtocolMismatch(truncate(line))),
        };
        Ok(frame)
    }
}

fn parse_nonce(raw: &str) -> Result<u64, TransportError> {
    raw.parse()
        .map_err(|_| TransportError::ProtocolMismatch(format!("bad nonce {}", truncate(raw))))
}

fn parse_addr(raw: &str) -> Result<SocketAddr, TransportError> {
    raw.parse()
        .map_err(|_| TransportError::ProtocolMismatch(format!("bad address {}", truncate(raw))))
}

fn truncate(line: &str) -> String {
    line.chars().take(64).collect()
}
