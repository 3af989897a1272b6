//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or offer handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid {field}: {token:?} is not a decimal number")]
    InvalidNumber { field: &'static str, token: String },

    #[error("{field} token exceeds {max} bytes")]
    TokenTooLong { field: &'static str, max: usize },

    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("txn {0} out of range")]
    TxnOutOfRange(u64),

    #[error("missing space between length and payload")]
    MissingSeparator,

    #[error("expected frame trailer '\\n', got {found:#04x}")]
    MissingTrailer { found: u8 },

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the error came from the transport rather than the byte stream contents.
    pub fn is_io(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
