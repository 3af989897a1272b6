//! RELP client session.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::sequencer::{match_response, TxnSequencer};
use bytes::Bytes;
use relp_protocol::offer::{is_open_accepted, split_response};
use relp_protocol::{Command, Frame, Offer, MAX_TXN};
use std::net::SocketAddr;
use tokio::time::Instant;

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection yet.
    Disconnected,
    /// Dialing the server.
    Connecting,
    /// `open` sent, waiting for the server's offer.
    Negotiating,
    /// Handshake complete, ready to send.
    Ready,
    /// A send is in progress.
    Sending,
    /// `close` was sent.
    Closed,
    /// Dial, handshake or transport failed, or a response did not match its
    /// request; only `recreate` helps.
    Failed,
}

/// A RELP sender session.
///
/// All operations run in the caller's task; the session never pipelines, so
/// with acknowledgements enabled each `send` returns only after its `rsp`
/// has been read.
pub struct Client {
    config: ConnectionConfig,
    conn: Option<Connection>,
    seq: TxnSequencer,
    state: SessionState,
    server_offer: Option<Offer>,
}

impl Client {
    /// Creates a client without connecting.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            conn: None,
            seq: TxnSequencer::new(),
            state: SessionState::Disconnected,
            server_offer: None,
        }
    }

    /// Dials the server and performs the `open` handshake.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let mut client = Self::new(config);
        client.establish().await?;
        Ok(client)
    }

    async fn establish(&mut self) -> Result<(), ClientError> {
        self.state = SessionState::Connecting;
        match Connection::dial(&self.config).await {
            Ok(conn) => self.conn = Some(conn),
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        }
        self.seq.reset();
        self.open().await
    }

    /// Sends the offer (txn 1) and checks the server accepts it.
    ///
    /// Anything but a `rsp` whose payload starts with `200 OK` leaves the
    /// session `Failed`.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        self.state = SessionState::Negotiating;
        let result = self.negotiate().await;
        match result {
            Ok(()) => self.state = SessionState::Ready,
            Err(_) => {
                self.state = SessionState::Failed;
                if let Some(mut conn) = self.conn.take() {
                    conn.shutdown().await;
                }
            }
        }
        result
    }

    async fn negotiate(&mut self) -> Result<(), ClientError> {
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        conn.write_frame(&Frame::open(self.config.offer.encode()))
            .await?;
        let response = conn.read_frame().await?;

        let (status, data) = split_response(&response.payload);
        if response.command != Command::Rsp || !is_open_accepted(&response.payload) {
            let reason = format!(
                "{} {}",
                response.command,
                String::from_utf8_lossy(status)
            );
            tracing::warn!("Offer to {} refused: {}", self.config.addr(), reason);
            return Err(ClientError::Negotiation(reason));
        }

        self.server_offer = match Offer::parse(data) {
            Ok(offer) => {
                if !offer.supports("syslog") {
                    tracing::warn!("Server at {} does not list syslog", self.config.addr());
                }
                Some(offer)
            }
            Err(e) => {
                tracing::debug!("Ignoring unparsable server offer: {}", e);
                None
            }
        };
        tracing::info!("RELP session open to {}", self.config.addr());
        Ok(())
    }

    /// Sends a syslog message, waiting for its acknowledgement if the
    /// configuration says so. Returns the txn used.
    pub async fn send(&mut self, message: impl Into<Bytes>) -> Result<u64, ClientError> {
        let wait_ack = self.config.wait_ack;
        self.send_with(message, wait_ack).await
    }

    /// Sends a syslog message. With `wait_ack` the next frame read must be a
    /// `rsp` for the same txn; mismatches are returned, never retried.
    ///
    /// After a mismatch the stream position is unknown (a late ack would pair
    /// with the next send), so the session moves to `Failed`.
    pub async fn send_with(
        &mut self,
        message: impl Into<Bytes>,
        wait_ack: bool,
    ) -> Result<u64, ClientError> {
        self.ensure_ready()?;
        let frame = Frame::syslog(self.seq.next_txn()?, message);

        self.state = SessionState::Sending;
        let result = self.transact(&frame, wait_ack).await;
        self.settle(&result);
        result.map(|()| frame.txn)
    }

    /// Reads the acknowledgement for a txn sent earlier without waiting.
    pub async fn await_ack(&mut self, txn: u64) -> Result<(), ClientError> {
        self.ensure_ready()?;
        self.state = SessionState::Sending;
        let result = match self.conn.as_mut() {
            Some(conn) => match conn.read_frame().await {
                Ok(response) => match_response(txn, &response),
                Err(e) => Err(e),
            },
            None => Err(ClientError::NotConnected),
        };
        self.settle(&result);
        result
    }

    async fn transact(&mut self, frame: &Frame, wait_ack: bool) -> Result<(), ClientError> {
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        conn.write_frame(frame).await?;
        if !wait_ack {
            return Ok(());
        }
        let response = conn.read_frame().await?;
        match_response(frame.txn, &response)
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(ClientError::ConnectionClosed),
            state => Err(ClientError::InvalidState(state)),
        }
    }

    fn settle(&mut self, result: &Result<(), ClientError>) {
        self.state = match result {
            Err(e) if e.is_fatal() => {
                tracing::debug!("Session to {} failed: {}", self.config.addr(), e);
                SessionState::Failed
            }
            _ => SessionState::Ready,
        };
    }

    /// Sends `close` with the next txn and shuts the socket down.
    ///
    /// Best effort: no response is awaited.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        let Some(mut conn) = self.conn.take() else {
            self.state = SessionState::Closed;
            return Ok(());
        };

        let result = conn.write_frame(&Frame::close(self.seq.peek().min(MAX_TXN))).await;
        conn.shutdown().await;
        self.state = SessionState::Closed;
        tracing::debug!("Closed session to {}", self.config.addr());
        result
    }

    /// Drops the current connection, dials again and repeats the handshake.
    ///
    /// Txns start over at 2. Failures are returned as-is.
    pub async fn recreate(&mut self) -> Result<(), ClientError> {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown().await;
        }
        self.server_offer = None;
        tracing::info!("Recreating connection to {}", self.config.addr());
        self.establish().await
    }

    /// Sets an absolute deadline for both reads and writes (`None` clears it).
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<(), ClientError> {
        self.connection_mut()?.set_deadline(deadline);
        Ok(())
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<(), ClientError> {
        self.connection_mut()?.set_read_deadline(deadline);
        Ok(())
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<(), ClientError> {
        self.connection_mut()?.set_write_deadline(deadline);
        Ok(())
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, ClientError> {
        self.conn.as_mut().ok_or(ClientError::NotConnected)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Returns the offer the server answered `open` with.
    pub fn server_offer(&self) -> Option<&Offer> {
        self.server_offer.as_ref()
    }

    /// Returns the txn the next message will use.
    pub fn next_txn(&self) -> u64 {
        self.seq.peek()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(Connection::peer_addr)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}
