//! TCP listener accepting RELP connections.

use crate::delivery::{self, MessageReceiver};
use crate::error::ServerError;
use crate::handler::{shutdown_signalled, ConnectionHandler, HandlerContext};
use parking_lot::Mutex;
use relp_protocol::codec::DEFAULT_READ_BUFFER_SIZE;
use relp_protocol::offer::open_response;
use relp_protocol::{Offer, Software};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Acknowledge every syslog message once the consumer took it.
    pub auto_ack: bool,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Offer sent back in answer to `open`.
    pub offer: Offer,
    /// Read buffer size per connection.
    pub read_buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], relp_protocol::DEFAULT_PORT)),
            auto_ack: true,
            max_connections: 1000,
            offer: Offer::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_software(mut self, software: Software) -> Self {
        self.offer = self.offer.with_software(software);
        self
    }

    /// Appends a `name=value` line to the server offer.
    pub fn with_offer_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.offer = self.offer.with_param(name, value);
        self
    }
}

/// Listener statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub messages_received: AtomicU64,
    pub errors_total: AtomicU64,
}

/// A running RELP listener.
///
/// Received messages come out of the [`MessageReceiver`] returned by
/// [`Listener::start`]. Dropping the listener without calling
/// [`Listener::close`] also stops it, but without waiting.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<ServerStats>,
}

impl Listener {
    /// Binds `config.bind_addr` and starts accepting connections.
    pub async fn start(config: ListenerConfig) -> Result<(Self, MessageReceiver), ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            "RELP listener on {} (auto_ack={}, max_connections={})",
            local_addr,
            config.auto_ack,
            config.max_connections
        );

        let (sender, receiver) = delivery::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ServerStats::default());

        let ctx = HandlerContext {
            sender,
            auto_ack: config.auto_ack,
            open_response: open_response(&config.offer),
            read_buffer_size: config.read_buffer_size,
            stats: stats.clone(),
            shutdown: shutdown_rx,
        };
        let accept_loop = tokio::spawn(accept_loop(listener, ctx, config.max_connections));

        Ok((
            Self {
                local_addr,
                shutdown,
                accept_loop: Mutex::new(Some(accept_loop)),
                stats,
            },
            receiver,
        ))
    }

    /// Shorthand for [`Listener::start`] with default settings.
    pub async fn bind(
        addr: SocketAddr,
        auto_ack: bool,
    ) -> Result<(Self, MessageReceiver), ServerError> {
        Self::start(ListenerConfig::new(addr).with_auto_ack(auto_ack)).await
    }

    /// Stops accepting, ends every connection and waits for the accept loop.
    ///
    /// Once this returns the port is released, and the receiver yields
    /// `None` after the last pending message. Calling it again is a no-op.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.accept_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Accept loop panicked: {}", e);
            }
            tracing::info!("RELP listener on {} closed", self.local_addr);
        }
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns whether the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.accept_loop
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns listener statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(listener: TcpListener, ctx: HandlerContext, max_connections: usize) {
    let stats = ctx.stats.clone();
    let mut shutdown = ctx.shutdown.clone();
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if stats.connections_active.load(Ordering::Relaxed) >= max_connections as u64 {
                            tracing::warn!("Connection limit reached, rejecting {}", addr);
                            stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }

                        stats.connections_total.fetch_add(1, Ordering::Relaxed);
                        stats.connections_active.fetch_add(1, Ordering::Relaxed);

                        let handler = ConnectionHandler::new(stream, addr, ctx.clone());
                        let stats = stats.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handler.run().await {
                                if e.is_connection_scoped() {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                } else {
                                    tracing::warn!("Connection {} ended: {}", addr, e);
                                }
                                stats.errors_total.fetch_add(1, Ordering::Relaxed);
                            }
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!("Accept error: {}", e);
                    }
                    Err(e) => {
                        tracing::error!("Accept failed, stopping listener: {}", e);
                        break;
                    }
                }
            }
            // Reap finished handlers so the set does not grow unbounded.
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            _ = shutdown_signalled(&mut shutdown) => {
                tracing::info!("Listener shutting down");
                break;
            }
        }
    }

    drop(listener);
    // Each handler holds a sender; the receiver closes after the last one.
    while handlers.join_next().await.is_some() {}
    drop(ctx);
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use relp_client::{Client, ClientError, ConnectionConfig};
    use relp_protocol::{write_frame, Command, Frame, FrameReader};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn test_listener(auto_ack: bool) -> (Listener, MessageReceiver) {
        Listener::bind("127.0.0.1:0".parse().unwrap(), auto_ack)
            .await
            .unwrap()
    }

    fn client_config(listener: &Listener) -> ConnectionConfig {
        ConnectionConfig::from(listener.local_addr()).with_connect_timeout(Duration::from_secs(5))
    }

    async fn wait_for_active(listener: &Listener, expected: u64) {
        for _ in 0..200 {
            if listener.stats().connections_active.load(Ordering::Relaxed) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connections_active never reached {}", expected);
    }

    #[tokio::test]
    async fn test_listener_auto_ack_end_to_end() {
        let (listener, mut receiver) = test_listener(true).await;
        let config = client_config(&listener);

        let consumer = tokio::spawn(async move {
            let mut payloads = Vec::new();
            for _ in 0..3 {
                let msg = receiver.recv().await.unwrap();
                payloads.push((msg.txn(), msg.payload_lossy().into_owned()));
            }
            payloads
        });

        let mut client = Client::connect(config).await.unwrap();
        assert!(client.server_offer().unwrap().supports("syslog"));
        for text in ["one", "two", "three"] {
            client.send(text).await.unwrap();
        }
        client.close().await.unwrap();

        let payloads = consumer.await.unwrap();
        assert_eq!(
            payloads,
            vec![
                (2, "one".to_string()),
                (3, "two".to_string()),
                (4, "three".to_string())
            ]
        );
        assert_eq!(listener.stats().messages_received.load(Ordering::Relaxed), 3);
        listener.close().await;
    }

    #[tokio::test]
    async fn test_listener_manual_ack() {
        let (listener, mut receiver) = test_listener(false).await;
        let mut client = Client::connect(client_config(&listener)).await.unwrap();

        let consumer = tokio::spawn(async move {
            let msg = receiver.recv().await.unwrap();
            msg.acknowledge().await.unwrap();
            assert!(msg.acknowledge().await.is_err());
            msg
        });

        assert_eq!(client.send("manual").await.unwrap(), 2);
        let msg = consumer.await.unwrap();
        assert!(msg.is_acknowledged());
        listener.close().await;
    }

    #[tokio::test]
    async fn test_listener_offer_params() {
        let config = ListenerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_offer_param("site", "lab");
        let (listener, _receiver) = Listener::start(config).await.unwrap();

        let client = Client::connect(client_config(&listener)).await.unwrap();
        assert_eq!(client.server_offer().unwrap().param("site"), Some("lab"));
        listener.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_does_not_affect_others() {
        let (listener, mut receiver) = test_listener(true).await;
        let config = client_config(&listener);

        let mut staying = Client::connect(config.clone()).await.unwrap();
        let leaving = Client::connect(config).await.unwrap();
        wait_for_active(&listener, 2).await;
        drop(leaving);
        wait_for_active(&listener, 1).await;

        let consumer = tokio::spawn(async move { receiver.recv().await.map(|m| m.txn()) });
        assert_eq!(staying.send("still here").await.unwrap(), 2);
        assert_eq!(consumer.await.unwrap(), Some(2));
        listener.close().await;
    }

    #[tokio::test]
    async fn test_ack_after_connection_gone() {
        let (listener, mut receiver) = test_listener(false).await;
        let mut client = Client::connect(client_config(&listener)).await.unwrap();
        client.send_with("fire and forget", false).await.unwrap();

        let msg = receiver.recv().await.unwrap();
        client.close().await.unwrap();
        wait_for_active(&listener, 0).await;

        msg.acknowledge().await.unwrap();
        listener.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let (listener, mut receiver) = test_listener(true).await;
        let addr = listener.local_addr();
        assert!(listener.is_running());

        listener.close().await;
        assert!(!listener.is_running());
        assert!(receiver.recv().await.is_none());
        assert!(TcpStream::connect(addr).await.is_err());

        // Idempotent.
        listener.close().await;
    }

    #[tokio::test]
    async fn test_close_ends_open_connections() {
        let (listener, mut receiver) = test_listener(true).await;
        let mut client = Client::connect(client_config(&listener)).await.unwrap();
        wait_for_active(&listener, 1).await;

        listener.close().await;
        assert_eq!(listener.stats().connections_active.load(Ordering::Relaxed), 0);
        assert!(receiver.recv().await.is_none());

        let err = client.send("too late").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_while_handler_blocked_on_delivery() {
        let (listener, receiver) = test_listener(true).await;
        let mut client = Client::connect(client_config(&listener)).await.unwrap();
        client.send_with("never consumed", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(5), listener.close())
            .await
            .unwrap();
        drop(receiver);
    }

    #[tokio::test]
    async fn test_close_with_peer_not_reading() {
        let (listener, _receiver) = test_listener(true).await;
        let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        wait_for_active(&listener, 1).await;

        // Every frame earns a 500 ERR that is never read, so the handler ends
        // up blocked on its write and stops draining the socket.
        let chunk = b"2 bogus 0\n".repeat(10_000);
        for _ in 0..5_000 {
            match tokio::time::timeout(Duration::from_millis(500), stream.write_all(&chunk)).await
            {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }
        assert_eq!(listener.stats().connections_active.load(Ordering::Relaxed), 1);

        tokio::time::timeout(Duration::from_secs(5), listener.close())
            .await
            .expect("close blocked by a connection that does not read");
        assert_eq!(listener.stats().connections_active.load(Ordering::Relaxed), 0);
        drop(stream);
    }

    #[tokio::test]
    async fn test_max_connections() {
        let config = ListenerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_connections(1);
        let (listener, _receiver) = Listener::start(config).await.unwrap();

        let _first = Client::connect(client_config(&listener)).await.unwrap();
        wait_for_active(&listener, 1).await;

        let second = Client::connect(client_config(&listener)).await;
        assert!(matches!(
            second,
            Err(ClientError::ConnectionClosed) | Err(ClientError::Io(_))
        ));
        assert!(second.is_err_and(|e| e.is_retryable()));
        assert_eq!(listener.stats().connections_rejected.load(Ordering::Relaxed), 1);
        listener.close().await;
    }

    #[tokio::test]
    async fn test_bogus_command_over_listener() {
        let (listener, _receiver) = test_listener(true).await;
        let stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        write_frame(&mut write_half, &Frame::new(2, Command::from("bogus"), ""))
            .await
            .unwrap();
        let rsp = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(rsp, Frame::err(2));
        listener.close().await;
    }
}
