//! Ticket queue boundary.
//!
//! The broker's wire protocol is out of scope; the worker only needs a
//! blocking-pop-with-timeout against a named queue of JSON records, with
//! at-least-once delivery semantics (duplicates are possible and handled by
//! the idempotency lock). [`InMemoryQueue`] is the provided implementation
//! for tests and single-node runs; a Redis- or AMQP-backed broker would slot
//! behind the same trait.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

/// Queue failure taxonomy. `Connection` is the transient class the intake
/// loop retries with backoff; everything else is unexpected.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection lost: {0}")]
    Connection(String),

    #[error("queue closed")]
    Closed,
}

/// At-least-once ticket queue.
#[async_trait]
pub trait TicketQueue: Send + Sync {
    /// Wait up to `timeout` for the next raw record. `Ok(None)` on timeout —
    /// the caller loops, it never busy-spins.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Push a raw record (the ingestion boundary's side of the contract).
    async fn push(&self, raw: String) -> Result<(), QueueError>;

    /// Number of records currently waiting.
    async fn depth(&self) -> Result<usize, QueueError>;
}

/// Process-local queue backed by a deque and a wakeup [`Notify`].
#[derive(Default)]
pub struct InMemoryQueue {
    records: Mutex<VecDeque<String>>,
    arrived: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self) -> Option<String> {
        self.records.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl TicketQueue for InMemoryQueue {
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for wakeup before checking, so a push between the
            // check and the await cannot be missed.
            let notified = self.arrived.notified();
            if let Some(raw) = self.try_pop() {
                return Ok(Some(raw));
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn push(&self, raw: String) -> Result<(), QueueError> {
        self.records.lock().unwrap().push_back(raw);
        self.arrived.notify_one();
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.records.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pop_returns_pushed_record_fifo() {
        let q = InMemoryQueue::new();
        q.push("a".into()).await.unwrap();
        q.push("b".into()).await.unwrap();

        assert_eq!(q.pop(Duration::from_millis(50)).await.unwrap().as_deref(), Some("a"));
        assert_eq!(q.pop(Duration::from_millis(50)).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let q = InMemoryQueue::new();
        let got = q.pop(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_concurrent_push() {
        let q = std::sync::Arc::new(InMemoryQueue::new());
        let q2 = std::sync::Arc::clone(&q);
        let popper =
            tokio::spawn(async move { q2.pop(Duration::from_secs(5)).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push("late".into()).await.unwrap();

        assert_eq!(popper.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_depth_counts_waiting_records() {
        let q = InMemoryQueue::new();
        assert_eq!(q.depth().await.unwrap(), 0);
        q.push("a".into()).await.unwrap();
        assert_eq!(q.depth().await.unwrap(), 1);
    }
}
