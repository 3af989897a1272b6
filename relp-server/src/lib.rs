//! # relp-server
//!
//! RELP collector side.
//!
//! This crate provides:
//! - A TCP listener with one task per connection
//! - Frame dispatch for `open`, `syslog` and `close`
//! - Rendezvous delivery of received messages to the application
//! - Explicit or automatic acknowledgement
//! - Layered configuration for the `relpd` daemon

pub mod config;
pub mod delivery;
pub mod error;
mod handler;
pub mod message;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, OfferConfig, OutputConfig, OutputFormat};
pub use delivery::{MessageReceiver, MessageSender};
pub use error::{AckError, ServerError};
pub use message::ServerMessage;
pub use server::{Listener, ListenerConfig, ServerStats};
pub use session::{Session, SessionState};
