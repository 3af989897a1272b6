//! # relp-client
//!
//! Client library for RELP.
//!
//! This crate provides:
//! - TCP dialing with an optional connect timeout
//! - The `open` handshake with offer negotiation
//! - Syslog sends with optional acknowledgement wait
//! - Absolute read/write deadlines, explicit close and reconnect

pub mod client;
pub mod connection;
pub mod error;
pub mod sequencer;

pub use client::{Client, SessionState};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use sequencer::TxnSequencer;
