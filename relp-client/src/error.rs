//! Client error types.

use crate::client::SessionState;
use relp_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server refused offer: {0}")]
    Negotiation(String),

    #[error("response to txn {txn} was {command}: {payload}")]
    CommandMismatch {
        txn: u64,
        command: String,
        payload: String,
    },

    #[error("response txn to {expected} was {actual}")]
    TxnMismatch { expected: u64, actual: u64 },

    #[error("server rejected txn {txn}: {status}")]
    Rejected { txn: u64, status: String },

    #[error("transaction ids exhausted (max {0}), recreate the session")]
    TxnExhausted(u64),

    #[error("session is {0:?}, not ready")]
    InvalidState(SessionState),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("deadline elapsed")]
    DeadlineElapsed,
}

impl ClientError {
    /// Returns whether `Client::recreate` may get past this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::ConnectTimeout(_)
                | ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::DeadlineElapsed
                | ClientError::TxnExhausted(_)
                | ClientError::CommandMismatch { .. }
                | ClientError::TxnMismatch { .. }
        )
    }

    /// Returns whether the peer broke the request/response contract.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_)
                | ClientError::CommandMismatch { .. }
                | ClientError::TxnMismatch { .. }
        )
    }

    /// Returns whether the connection can no longer be used after this error.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::ConnectionClosed
                | ClientError::DeadlineElapsed
                | ClientError::CommandMismatch { .. }
                | ClientError::TxnMismatch { .. }
        )
    }
}
