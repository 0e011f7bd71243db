// src/domain/message.rs

//! Message envelope and its single-shot completion signal.

use bytes::Bytes;
use tokio::sync::oneshot;

/// Write side of the delivery outcome.
///
/// Holds at most one pending value; the first [`resolve`](Completion::resolve)
/// spends it and every later call is a no-op.
#[derive(Debug)]
pub struct Completion {
    // ---
    tx: Option<oneshot::Sender<bool>>,
}

impl Completion {
    /// Write the outcome. Returns `true` if this call was the one that wrote it.
    pub fn resolve(&mut self, delivered: bool) -> bool {
        // ---
        match self.tx.take() {
            // The producer may have stopped waiting; the signal still counts
            // as written.
            Some(tx) => {
                let _ = tx.send(delivered);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

/// Read side of the delivery outcome, kept by the producer.
#[derive(Debug)]
pub struct Outcome {
    // ---
    rx: oneshot::Receiver<bool>,
}

impl Outcome {
    /// Wait for the outcome.
    ///
    /// An envelope dropped without being resolved (for example during
    /// shutdown) reads as `false`.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }

    /// Non-blocking check. `None` while the outcome is still open.
    pub fn try_outcome(&mut self) -> Option<bool> {
        // ---
        match self.rx.try_recv() {
            Ok(delivered) => Some(delivered),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(false),
        }
    }
}

/// The unit of work handed to the publisher.
///
/// # Example
///
/// ```
/// # use hookrelay::Message;
/// # async fn example() {
/// let (mut msg, outcome) = Message::new("evt-1");
/// assert_eq!(msg.body().as_ref(), b"evt-1");
///
/// assert!(msg.resolve(true));
/// assert!(!msg.resolve(false)); // already written
/// assert!(outcome.wait().await);
/// # }
/// ```
#[derive(Debug)]
pub struct Message {
    // ---
    body: Bytes,
    completion: Completion,
}

impl Message {
    /// Create an envelope and the handle its producer waits on.
    pub fn new(body: impl Into<Bytes>) -> (Self, Outcome) {
        // ---
        let (tx, rx) = oneshot::channel();
        let msg = Self {
            body: body.into(),
            completion: Completion { tx: Some(tx) },
        };
        (msg, Outcome { rx })
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// See [`Completion::resolve`].
    pub fn resolve(&mut self, delivered: bool) -> bool {
        self.completion.resolve(delivered)
    }

    pub fn is_resolved(&self) -> bool {
        self.completion.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_first_resolution_wins() {
        // ---
        let (mut msg, outcome) = Message::new("a");

        assert!(!msg.is_resolved());
        assert!(msg.resolve(false));
        assert!(msg.is_resolved());
        assert!(!msg.resolve(true));

        assert!(!outcome.wait().await);
    }

    #[tokio::test]
    async fn test_dropped_envelope_reads_false() {
        // ---
        let (msg, outcome) = Message::new("a");
        drop(msg);
        assert!(!outcome.wait().await);
    }

    #[test]
    fn test_resolve_after_producer_gave_up_still_counts() {
        // ---
        let (mut msg, outcome) = Message::new("a");
        drop(outcome);
        assert!(msg.resolve(true));
        assert!(!msg.resolve(true));
    }

    #[test]
    fn test_try_outcome() {
        // ---
        let (mut msg, mut outcome) = Message::new("a");
        assert_eq!(outcome.try_outcome(), None);

        msg.resolve(true);
        assert_eq!(outcome.try_outcome(), Some(true));
    }
}
