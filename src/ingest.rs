//! Bounded FIFO decoupling socket receive from decoding.
//!
//! Grounded on the non-blocking `try_send` pattern used throughout
//! `SubscriptionManager` for command dispatch. Overflow policy is
//! drop-new-and-log: the newest frame is discarded rather than blocking
//! the venue socket's read loop, preserving liveness over completeness.

use tokio::sync::mpsc;
use tracing::warn;

pub struct IngestQueue<T> {
    tx: mpsc::Sender<T>,
    label: &'static str,
}

impl<T> Clone for IngestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            label: self.label,
        }
    }
}

impl<T> IngestQueue<T> {
    pub fn new(label: &'static str, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, label }, rx)
    }

    /// Non-blocking enqueue. Returns `false` (and logs) if the queue is
    /// full; the caller never blocks on this call.
    pub fn put(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(queue = self.label, "ingest queue full, dropping newest frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(queue = self.label, "ingest queue closed, dropping frame");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_newest_and_keeps_oldest() {
        let (queue, mut rx) = IngestQueue::new("test", 1);
        assert!(queue.put(1));
        assert!(!queue.put(2));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, 1);
    }
}
