//! # TCP Overlay
//!
//! Minimal overlay transport for miners:
//!
//! - `AddressBook` - peer id to socket addresses, fed by discovery notifications
//! - `TcpOverlay` - ping exchange, peer exchange and outbound chat sessions
//! - `OverlayListener` - answers pings and peer exchanges, receives chat sessions
//!
//! Nodes learn each other's addresses transitively: every `PEERS` request
//! records the requester in the listener's address book, and the reply hands
//! back the peers already in it. A node that knows one bootstrap peer reaches
//! every other node that knows the same one after a round or two.
//!
//! See [`protocol`] for the wire format.

mod address_book;
mod listener;
pub mod protocol;
mod transport;

pub use address_book::AddressBook;
pub use listener::{OverlayListener, DEFAULT_HANDSHAKE_TIMEOUT};
pub use protocol::Frame;
pub use transport::{TcpOverlay, TcpSessionSink, DEFAULT_CONNECT_TIMEOUT};

#[cfg(test)]
mod tests;
