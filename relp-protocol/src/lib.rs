//! # relp-protocol
//!
//! Wire protocol implementation for RELP (Reliable Event Logging Protocol).
//!
//! This crate provides:
//! - Text framing: `<txn> <command> <length>[ <payload>]\n`
//! - Incremental decoding from a byte buffer and from async streams
//! - Offer construction and parsing for the `open` handshake
//! - Response status codes (`200 OK`, `500 ERR`)

pub mod codec;
pub mod error;
pub mod frame;
pub mod offer;

pub use codec::{write_frame, Decoder, FrameReader};
pub use error::ProtocolError;
pub use frame::{Command, Frame};
pub use offer::{Offer, Software, Status};

/// RELP protocol version announced in offers.
pub const RELP_VERSION: u32 = 0;

/// Software name announced in offers.
pub const SOFTWARE_NAME: &str = "relp-rs";

/// Software URL announced in offers.
pub const SOFTWARE_URL: &str = "https://github.com/relp-rs/relp";

/// Default RELP port.
pub const DEFAULT_PORT: u16 = 20514;

/// Transaction id reserved for the `open` command.
pub const OPEN_TXN: u64 = 1;

/// Largest transaction id (9 decimal digits).
pub const MAX_TXN: u64 = 999_999_999;

/// Maximum number of digits in the txn and length fields.
pub const MAX_NUMBER_DIGITS: usize = 9;

/// Maximum length of a command token.
pub const MAX_COMMAND_LEN: usize = 32;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
