use tracing::info;

use crate::domain::PeerId;
use crate::ports::ChatHandler;

/// Chat handler that writes every inbound message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingChatHandler;

impl ChatHandler for LoggingChatHandler {
    fn on_message(&self, from: &PeerId, message: &str) {
        info!(peer_id = %from, message, "Chat message received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_handler_accepts_any_message() {
        let handler = LoggingChatHandler;
        handler.on_message(&PeerId::from("miner-1"), "");
        handler.on_message(&PeerId::from("miner-1"), "hello from the edge");
    }
}
