//! Connection management.

use crate::error::ClientError;
use relp_protocol::codec::DEFAULT_READ_BUFFER_SIZE;
use relp_protocol::{write_frame, Frame, FrameReader, Offer, ProtocolError, Software};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Dial timeout (`None` waits for the OS).
    pub connect_timeout: Option<Duration>,
    /// Whether `send` waits for the acknowledgement.
    pub wait_ack: bool,
    /// Offer sent with `open`.
    pub offer: Offer,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            wait_ack: true,
            offer: Offer::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_wait_ack(mut self, wait_ack: bool) -> Self {
        self.wait_ack = wait_ack;
        self
    }

    pub fn with_software(mut self, software: Software) -> Self {
        self.offer = self.offer.with_software(software);
        self
    }

    /// Appends a `name=value` line to the offer.
    pub fn with_offer_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.offer = self.offer.with_param(name, value);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Returns `host:port` for display.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for ConnectionConfig {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// A live TCP connection to a RELP server.
///
/// Only obtainable through [`Connection::dial`]; a failed dial yields an
/// error, never a connection.
pub struct Connection {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Connection {
    /// Dials the server described by `config`.
    pub async fn dial(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let result = match config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::ConnectTimeout(addr.clone())
            })?,
            None => connect.await,
        };
        let stream = result.map_err(|source| {
            tracing::debug!("Connection failed: {}", source);
            ClientError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;

        stream.set_nodelay(true).ok();
        let peer_addr = stream.peer_addr()?;
        tracing::debug!("TCP connected to {}", peer_addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::with_buffer_size(read_half, config.read_buffer_size),
            writer: write_half,
            peer_addr,
            read_deadline: None,
            write_deadline: None,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sets both the read and the write deadline.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
        self.write_deadline = deadline;
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    /// Writes one frame, honoring the write deadline.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        tracing::debug!("Sending txn={} command={}", frame.txn, frame.command);
        with_deadline(self.write_deadline, write_frame(&mut self.writer, frame)).await
    }

    /// Reads one frame, honoring the read deadline.
    pub async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        let frame = with_deadline(self.read_deadline, self.reader.read_frame())
            .await?
            .ok_or(ClientError::ConnectionClosed)?;
        tracing::debug!("Received txn={} command={}", frame.txn, frame.command);
        Ok(frame)
    }

    /// Shuts down the write side; errors are ignored.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer_addr, e);
        }
    }
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = Result<T, ProtocolError>>,
) -> Result<T, ClientError> {
    let result = match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| ClientError::DeadlineElapsed)?,
        None => fut.await,
    };
    result.map_err(|e| match e {
        ProtocolError::Io(e) => ClientError::Io(e),
        other => ClientError::Protocol(other),
    })
}
