//! Server error types.

use crate::config::ConfigError;
use relp_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("message receiver dropped")]
    ReceiverDropped,
}

impl ServerError {
    /// Returns whether the error ends only the connection it occurred on.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, ServerError::Io(_) | ServerError::Protocol(_))
    }
}

/// Errors returned by [`ServerMessage::acknowledge`](crate::ServerMessage::acknowledge).
#[derive(Debug, Error)]
pub enum AckError {
    #[error("message {0} already acknowledged")]
    AlreadyAcknowledged(u64),

    #[error("failed to send acknowledgement for txn {txn}: {source}")]
    Send {
        txn: u64,
        #[source]
        source: ProtocolError,
    },
}
