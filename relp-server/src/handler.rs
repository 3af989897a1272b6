//! Per-connection frame dispatch.

use crate::delivery::MessageSender;
use crate::error::{AckError, ServerError};
use crate::message::{AckHandle, ServerMessage, SharedWriter};
use crate::server::ServerStats;
use crate::session::Session;
use bytes::Bytes;
use relp_protocol::{write_frame, Command, Frame, FrameReader};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

/// State shared by every handler of one listener.
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub sender: MessageSender,
    pub auto_ack: bool,
    /// Payload answering `open`: `200 OK\n` plus the server offer.
    pub open_response: Bytes,
    pub read_buffer_size: usize,
    pub stats: Arc<ServerStats>,
    pub shutdown: watch::Receiver<bool>,
}

enum Flow {
    Continue,
    Close,
}

/// Serves one accepted connection until it ends.
pub(crate) struct ConnectionHandler {
    session: Session,
    reader: FrameReader<OwnedReadHalf>,
    writer: Arc<SharedWriter>,
    ctx: HandlerContext,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, ctx: HandlerContext) -> Self {
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            session: Session::new(remote_addr),
            reader: FrameReader::with_buffer_size(read_half, ctx.read_buffer_size),
            writer: Arc::new(Mutex::new(write_half)),
            ctx,
        }
    }

    /// Runs the dispatch loop. The socket is closed when this returns.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let addr = self.session.remote_addr;
        tracing::info!("Client connected: {} (id={})", addr, self.session.id);

        let result = self.serve().await;
        self.session.close();

        tracing::info!(
            "Client disconnected: {} ({} frames, {} messages in {:.1?})",
            addr,
            self.session.frames(),
            self.session.messages(),
            self.session.age()
        );
        result
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        let addr = self.session.remote_addr;
        loop {
            let result = tokio::select! {
                result = self.reader.read_frame() => result,
                _ = shutdown_signalled(&mut self.ctx.shutdown) => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Ok(());
                }
            };

            let frame = match result {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("[{}] Connection closed by client", addr);
                    return Ok(());
                }
                Err(e) if e.is_io() => {
                    tracing::debug!("[{}] Read error: {}", addr, e);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!("[{}] Malformed frame, closing connection: {}", addr, e);
                    return Err(e.into());
                }
            };

            self.session.record_frame();
            tracing::debug!(
                "[{}] Received txn={} command={} ({} bytes)",
                addr,
                frame.txn,
                frame.command,
                frame.payload.len()
            );

            match self.dispatch(frame).await? {
                Flow::Continue => {}
                Flow::Close => return Ok(()),
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, ServerError> {
        match frame.command {
            Command::Open => {
                self.session.open(frame.payload_lossy().into_owned());
                tracing::debug!("[{}] Session open", self.session.remote_addr);
                let response = Frame::rsp(frame.txn, self.ctx.open_response.clone());
                self.respond(&response).await
            }
            Command::Syslog => self.handle_syslog(frame).await,
            Command::Close => {
                tracing::debug!("[{}] Close requested", self.session.remote_addr);
                Ok(Flow::Close)
            }
            _ => {
                tracing::warn!(
                    "[{}] Unknown command {:?} (txn={})",
                    self.session.remote_addr,
                    frame.command.as_str(),
                    frame.txn
                );
                self.respond(&Frame::err(frame.txn)).await
            }
        }
    }

    async fn handle_syslog(&mut self, frame: Frame) -> Result<Flow, ServerError> {
        let txn = frame.txn;
        let ack = Arc::new(AckHandle::new(txn, Arc::downgrade(&self.writer)));
        let message = ServerMessage::new(
            frame,
            self.session.remote_addr,
            self.session.id,
            ack.clone(),
        );

        tokio::select! {
            result = self.ctx.sender.deliver(message) => result?,
            _ = shutdown_signalled(&mut self.ctx.shutdown) => {
                tracing::debug!(
                    "[{}] Shutdown while delivering txn={}",
                    self.session.remote_addr,
                    txn
                );
                return Ok(Flow::Close);
            }
        }

        self.session.record_message();
        self.ctx.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        if self.ctx.auto_ack {
            let result = tokio::select! {
                result = ack.acknowledge() => result,
                _ = shutdown_signalled(&mut self.ctx.shutdown) => {
                    tracing::debug!(
                        "[{}] Shutdown while acknowledging txn={}",
                        self.session.remote_addr,
                        txn
                    );
                    return Ok(Flow::Close);
                }
            };
            match result {
                Ok(()) => {}
                Err(AckError::AlreadyAcknowledged(_)) => {
                    tracing::debug!(
                        "[{}] txn={} already acknowledged by consumer",
                        self.session.remote_addr,
                        txn
                    );
                }
                Err(AckError::Send { source, .. }) => return Err(source.into()),
            }
        }
        Ok(Flow::Continue)
    }

    /// Writes a response. A peer that stops reading cannot hold the handler
    /// past shutdown.
    async fn respond(&mut self, frame: &Frame) -> Result<Flow, ServerError> {
        let writer = &self.writer;
        tokio::select! {
            result = async {
                let mut writer = writer.lock().await;
                write_frame(&mut *writer, frame).await
            } => {
                result?;
                Ok(Flow::Continue)
            }
            _ = shutdown_signalled(&mut self.ctx.shutdown) => {
                tracing::debug!(
                    "[{}] Shutdown while responding to txn={}",
                    self.session.remote_addr,
                    frame.txn
                );
                Ok(Flow::Close)
            }
        }
    }
}

/// Completes once shutdown is requested or the listener is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{self, MessageReceiver};
    use relp_protocol::offer::open_response;
    use relp_protocol::Offer;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::tcp::OwnedWriteHalf;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    struct Harness {
        reader: FrameReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        receiver: MessageReceiver,
        shutdown: watch::Sender<bool>,
        handler: JoinHandle<Result<(), ServerError>>,
    }

    impl Harness {
        async fn send(&mut self, frame: Frame) {
            write_frame(&mut self.writer, &frame).await.unwrap();
        }

        async fn read(&mut self) -> Option<Frame> {
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_frame())
                .await
                .unwrap()
                .unwrap()
        }
    }

    async fn spawn_handler(auto_ack: bool) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (stream, remote_addr) = accepted.unwrap();

        let (sender, receiver) = delivery::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = HandlerContext {
            sender,
            auto_ack,
            open_response: open_response(&Offer::new()),
            read_buffer_size: 1024,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_rx,
        };
        let handler = tokio::spawn(ConnectionHandler::new(stream, remote_addr, ctx).run());

        let (read_half, write_half) = client.unwrap().into_split();
        Harness {
            reader: FrameReader::new(read_half),
            writer: write_half,
            receiver,
            shutdown,
            handler,
        }
    }

    #[tokio::test]
    async fn test_open_returns_offer() {
        let mut h = spawn_handler(true).await;
        h.send(Frame::open(Offer::new().encode())).await;

        let rsp = h.read().await.unwrap();
        assert_eq!(rsp.txn, 1);
        assert_eq!(rsp.command, Command::Rsp);
        assert!(rsp.payload.starts_with(b"200 OK\nrelp_version=0\n"));
        assert!(rsp.payload_lossy().contains("commands=syslog"));
    }

    #[tokio::test]
    async fn test_auto_ack_sends_one_ok() {
        let mut h = spawn_handler(true).await;
        h.send(Frame::syslog(2, "hello")).await;

        let msg = h.receiver.recv().await.unwrap();
        assert_eq!(msg.txn(), 2);
        assert_eq!(msg.payload_lossy(), "hello");
        assert_eq!(h.read().await.unwrap(), Frame::ok(2));

        // The consumer cannot acknowledge a second time.
        assert!(matches!(
            msg.acknowledge().await,
            Err(AckError::AlreadyAcknowledged(2))
        ));

        h.send(Frame::close(3)).await;
        assert!(h.read().await.is_none());
        h.handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_manual_ack() {
        let mut h = spawn_handler(false).await;
        h.send(Frame::syslog(2, "a")).await;
        h.send(Frame::syslog(3, "b")).await;

        let first = h.receiver.recv().await.unwrap();
        let second = h.receiver.recv().await.unwrap();
        assert_eq!((first.txn(), second.txn()), (2, 3));
        assert!(!first.is_acknowledged());

        second.acknowledge().await.unwrap();
        first.acknowledge().await.unwrap();
        assert_eq!(h.read().await.unwrap(), Frame::ok(3));
        assert_eq!(h.read().await.unwrap(), Frame::ok(2));
    }

    #[tokio::test]
    async fn test_unknown_command_gets_err() {
        let mut h = spawn_handler(true).await;
        h.send(Frame::new(4, Command::from("bogus"), "x")).await;
        assert_eq!(h.read().await.unwrap(), Frame::err(4));

        h.send(Frame::rsp(5, "200 OK")).await;
        let rsp = h.read().await.unwrap();
        assert_eq!(rsp.txn, 5);
        assert_eq!(&rsp.payload[..], b"500 ERR");
    }

    #[tokio::test]
    async fn test_close_ends_handler_without_response() {
        let mut h = spawn_handler(true).await;
        h.send(Frame::close(2)).await;
        assert!(h.read().await.is_none());
        h.handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let mut h = spawn_handler(true).await;
        h.writer.write_all(b"abc syslog 1 x\n").await.unwrap();
        assert!(h.read().await.is_none());
        assert!(matches!(
            h.handler.await.unwrap(),
            Err(ServerError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_close() {
        let h = spawn_handler(true).await;
        drop(h.writer);
        drop(h.reader);
        h.handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let h = spawn_handler(true).await;
        h.shutdown.send(true).unwrap();
        h.handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_delivering() {
        let mut h = spawn_handler(true).await;
        h.send(Frame::syslog(2, "stuck")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.handler.is_finished());

        h.shutdown.send(true).unwrap();
        h.handler.await.unwrap().unwrap();
    }

    /// Writes unanswered-command frames until the socket stops accepting them,
    /// which means the handler is blocked writing responses nobody reads.
    async fn flood_until_blocked(writer: &mut OwnedWriteHalf) {
        let chunk = b"2 bogus 0\n".repeat(10_000);
        for _ in 0..5_000 {
            match tokio::time::timeout(Duration::from_millis(500), writer.write_all(&chunk)).await
            {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return,
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_while_peer_not_reading() {
        let mut h = spawn_handler(true).await;
        flood_until_blocked(&mut h.writer).await;
        assert!(!h.handler.is_finished());

        h.shutdown.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), h.handler)
            .await
            .expect("handler stuck writing after shutdown");
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_receiver_dropped_closes_connection() {
        let mut h = spawn_handler(true).await;
        drop(h.receiver);
        write_frame(&mut h.writer, &Frame::syslog(2, "nobody listens"))
            .await
            .unwrap();
        assert!(matches!(
            h.handler.await.unwrap(),
            Err(ServerError::ReceiverDropped)
        ));
    }
}
