//! Hand-off of received messages from connection handlers to the
//! application.
//!
//! Delivery is a rendezvous: [`MessageSender::deliver`] returns only once a
//! consumer has taken the message with [`MessageReceiver::recv`], so a slow
//! consumer stalls the sending connection instead of growing a queue.

use crate::error::ServerError;
use crate::message::ServerMessage;
use tokio::sync::{mpsc, oneshot};

struct Delivery {
    message: ServerMessage,
    taken: oneshot::Sender<()>,
}

/// Creates a connected sender/receiver pair.
pub fn channel() -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (MessageSender { tx }, MessageReceiver { rx })
}

/// Sending side, one clone per handler.
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Delivery>,
}

impl MessageSender {
    /// Hands `message` to the consumer and waits until it has been taken.
    ///
    /// Fails with [`ServerError::ReceiverDropped`] if the receiver is gone,
    /// including when it is dropped while the message is still pending.
    pub async fn deliver(&self, message: ServerMessage) -> Result<(), ServerError> {
        let (taken, was_taken) = oneshot::channel();
        self.tx
            .send(Delivery { message, taken })
            .await
            .map_err(|_| ServerError::ReceiverDropped)?;
        was_taken.await.map_err(|_| ServerError::ReceiverDropped)
    }

    /// Returns whether the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming side of the channel.
pub struct MessageReceiver {
    rx: mpsc::Receiver<Delivery>,
}

impl MessageReceiver {
    /// Takes the next message, releasing the handler that delivered it.
    ///
    /// Returns `None` once every sender is gone, i.e. after the listener
    /// closed and all its handlers exited.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            let delivery = self.rx.recv().await?;
            // A handler that stopped waiting has abandoned its message.
            if delivery.taken.send(()).is_ok() {
                return Some(delivery.message);
            }
            tracing::debug!(
                "Skipping abandoned message txn={} from {}",
                delivery.message.txn(),
                delivery.message.remote_addr()
            );
        }
    }
}
