//! Messages delivered to the application and their acknowledgement state.

use crate::error::AckError;
use bytes::Bytes;
use relp_protocol::{write_frame, Command, Frame};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Write half of a connection, shared by its handler and the acks of its
/// messages.
pub(crate) type SharedWriter = Mutex<OwnedWriteHalf>;

/// Acknowledgement state of one received message.
///
/// The flag moves from pending to acknowledged at most once per successful
/// send. The writer is held weakly: once the handler is gone the connection
/// is too, and acknowledging becomes a no-op.
pub(crate) struct AckHandle {
    txn: u64,
    acked: AtomicBool,
    writer: Weak<SharedWriter>,
}

impl AckHandle {
    pub(crate) fn new(txn: u64, writer: Weak<SharedWriter>) -> Self {
        Self {
            txn,
            acked: AtomicBool::new(false),
            writer,
        }
    }

    pub(crate) fn is_acknowledged(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub(crate) async fn acknowledge(&self) -> Result<(), AckError> {
        if self
            .acked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AckError::AlreadyAcknowledged(self.txn));
        }

        let Some(writer) = self.writer.upgrade() else {
            tracing::debug!("Connection for txn {} is gone, nothing to acknowledge", self.txn);
            return Ok(());
        };

        let mut writer = writer.lock().await;
        if let Err(source) = write_frame(&mut *writer, &Frame::ok(self.txn)).await {
            self.acked.store(false, Ordering::Release);
            return Err(AckError::Send {
                txn: self.txn,
                source,
            });
        }
        Ok(())
    }
}

/// A `syslog` message received by the listener.
pub struct ServerMessage {
    txn: u64,
    command: Command,
    payload: Bytes,
    remote_addr: SocketAddr,
    connection_id: Uuid,
    ack: Arc<AckHandle>,
}

impl ServerMessage {
    pub(crate) fn new(
        frame: Frame,
        remote_addr: SocketAddr,
        connection_id: Uuid,
        ack: Arc<AckHandle>,
    ) -> Self {
        Self {
            txn: frame.txn,
            command: frame.command,
            payload: frame.payload,
            remote_addr,
            connection_id,
            ack,
        }
    }

    pub fn txn(&self) -> u64 {
        self.txn
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Address of the sender.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// ID of the connection the message arrived on.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn is_acknowledged(&self) -> bool {
        self.ack.is_acknowledged()
    }

    /// Sends `rsp 200 OK` for this message.
    ///
    /// A second call fails with [`AckError::AlreadyAcknowledged`] and sends
    /// nothing. If the connection is already gone this succeeds without
    /// sending. If the send fails the message stays unacknowledged.
    pub async fn acknowledge(&self) -> Result<(), AckError> {
        self.ack.acknowledge().await
    }
}

impl std::fmt::Debug for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMessage")
            .field("txn", &self.txn)
            .field("command", &self.command)
            .field("payload_len", &self.payload.len())
            .field("remote_addr", &self.remote_addr)
            .field("acknowledged", &self.is_acknowledged())
            .finish()
    }
}
