//! The bounded delivery queue between the receive loop and the application.
//!
//! Inserts never block: when the queue is full the incoming message is
//! dropped and counted, so a slow application sink cannot stall the
//! transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Default delivery queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A decrypted message handed to the application.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Decrypted payload bytes.
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("topic", &self.topic)
            .field(
                "payload",
                &format!("[{} bytes REDACTED]", self.payload.len()),
            )
            .finish()
    }
}

/// Producer side of the delivery queue.
#[derive(Clone)]
pub(crate) struct QueueSender {
    tx: mpsc::Sender<ReceivedMessage>,
    dropped: Arc<AtomicU64>,
}

impl QueueSender {
    /// Enqueue without blocking. Returns false if the message was dropped
    /// (queue full or closed).
    pub(crate) fn push(&self, message: ReceivedMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %message.topic, "delivery queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Read handle over the delivery queue.
///
/// The queue is single-consumer; clones of this handle share one receiver
/// and take turns.
#[derive(Clone)]
pub struct Messages {
    rx: Arc<Mutex<mpsc::Receiver<ReceivedMessage>>>,
    dropped: Arc<AtomicU64>,
}

impl Messages {
    /// The next message, or `None` once the node has closed and the queue
    /// has drained.
    pub async fn recv(&self) -> Option<ReceivedMessage> {
        self.rx.lock().await.recv().await
    }

    /// Messages dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) fn delivery_queue(capacity: usize) -> (QueueSender, Messages) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        QueueSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        Messages {
            rx: Arc::new(Mutex::new(rx)),
            dropped,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tag: u8) -> ReceivedMessage {
        ReceivedMessage {
            topic: "t/q".into(),
            payload: vec![tag],
        }
    }

    #[tokio::test]
    async fn preserves_insertion_order() {
        let (tx, rx) = delivery_queue(8);
        for tag in 0..5 {
            assert!(tx.push(msg(tag)));
        }
        for tag in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload, vec![tag]);
        }
    }

    #[tokio::test]
    async fn drops_newest_when_full() {
        let (tx, rx) = delivery_queue(2);
        assert!(tx.push(msg(0)));
        assert!(tx.push(msg(1)));
        // queue full: this insert is dropped, earlier messages survive
        assert!(!tx.push(msg(2)));
        assert_eq!(rx.dropped(), 1);

        assert_eq!(rx.recv().await.unwrap().payload, vec![0]);
        assert_eq!(rx.recv().await.unwrap().payload, vec![1]);
    }

    #[tokio::test]
    async fn closes_when_sender_drops() {
        let (tx, rx) = delivery_queue(2);
        tx.push(msg(7));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().payload, vec![7]);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn debug_redacts_payload_bytes() {
        let message = ReceivedMessage {
            topic: "t/q".into(),
            payload: vec![0xDE, 0xAD],
        };
        let debug = format!("{:?}", message);
        assert!(debug.contains("[2 bytes REDACTED]"));
        assert!(!debug.contains("222")); // 0xDE
    }
}
