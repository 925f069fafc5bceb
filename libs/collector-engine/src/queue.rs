use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;
use crate::stats::{bump, WorkerStats};

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait up to the enqueue timeout, then fail with queue-full.
    #[default]
    Block,
    /// Fail with queue-full immediately.
    Reject,
    /// Discard the record and count it.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueSettings {
    pub overflow: OverflowPolicy,
    /// Upper bound for `Block`.
    pub timeout: Duration,
}

impl Default for EnqueueSettings {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::Block,
            timeout: Duration::from_millis(500),
        }
    }
}

pub(crate) type FlushAck = oneshot::Sender<Result<usize, EngineError>>;

/// Queue slot. Flush requests travel in-band so they observe every record
/// enqueued before them.
pub(crate) enum Message<R> {
    Record(R),
    Flush(FlushAck),
}

/// Producer side of a worker's bounded queue. Cheap to clone; every clone
/// feeds the same single consumer, in enqueue order.
pub struct WorkerQueue<R> {
    tx: mpsc::Sender<Message<R>>,
    kind: &'static str,
    settings: EnqueueSettings,
    stats: Arc<WorkerStats>,
}

impl<R> Clone for WorkerQueue<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            kind: self.kind,
            settings: self.settings,
            stats: self.stats.clone(),
        }
    }
}

/// Create a queue of `capacity` slots and its single receiver.
pub(crate) fn bounded<R>(
    kind: &'static str,
    capacity: usize,
    settings: EnqueueSettings,
    stats: Arc<WorkerStats>,
) -> (WorkerQueue<R>, mpsc::Receiver<Message<R>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        WorkerQueue {
            tx,
            kind,
            settings,
            stats,
        },
        rx,
    )
}

impl<R: Send> WorkerQueue<R> {
    pub async fn enqueue(&self, record: R) -> Result<(), EngineError> {
        let record = Message::Record(record);
        match self.settings.overflow {
            OverflowPolicy::Drop => match self.tx.try_send(record) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    bump(&self.stats.dropped_full, 1);
                    tracing::warn!(kind = self.kind, "queue full, dropping record");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(EngineError::QueueClosed(self.kind)),
            },
            OverflowPolicy::Reject => match self.tx.try_send(record) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(self.full()),
                Err(TrySendError::Closed(_)) => Err(EngineError::QueueClosed(self.kind)),
            },
            OverflowPolicy::Block => match self.tx.send_timeout(record, self.settings.timeout).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(self.full()),
                Err(SendTimeoutError::Closed(_)) => Err(EngineError::QueueClosed(self.kind)),
            },
        }
    }

    /// Ask the consumer to flush everything enqueued so far. Waits for a free
    /// slot regardless of the overflow policy.
    pub(crate) async fn request_flush(&self, ack: FlushAck) -> Result<(), EngineError> {
        self.tx
            .send(Message::Flush(ack))
            .await
            .map_err(|_| EngineError::QueueClosed(self.kind))
    }

    fn full(&self) -> EngineError {
        bump(&self.stats.rejected, 1);
        EngineError::QueueFull {
            kind: self.kind,
            capacity: self.capacity(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Records currently waiting for the consumer.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Rx = mpsc::Receiver<Message<u32>>;

    fn queue(capacity: usize, overflow: OverflowPolicy) -> (WorkerQueue<u32>, Rx, Arc<WorkerStats>) {
        let stats = Arc::new(WorkerStats::default());
        let settings = EnqueueSettings {
            overflow,
            timeout: Duration::from_millis(50),
        };
        let (q, rx) = bounded("test", capacity, settings, stats.clone());
        (q, rx, stats)
    }

    async fn next(rx: &mut Rx) -> Option<u32> {
        match rx.recv().await? {
            Message::Record(v) => Some(v),
            Message::Flush(_) => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn block_times_out_and_keeps_existing_entries() {
        let (q, mut rx, stats) = queue(2, OverflowPolicy::Block);
        q.enqueue(1).await.unwrap();
        q.enqueue(2).await.unwrap();

        let err = q.enqueue(3).await.unwrap_err();
        assert!(matches!(err, EngineError::QueueFull { capacity: 2, .. }));
        assert!(err.is_retryable());
        assert_eq!(stats.snapshot().rejected, 1);

        assert_eq!(next(&mut rx).await, Some(1));
        assert_eq!(next(&mut rx).await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn block_resumes_when_consumer_drains() {
        let (q, mut rx, _) = queue(1, OverflowPolicy::Block);
        q.enqueue(1).await.unwrap();
        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(2).await })
        };
        assert_eq!(next(&mut rx).await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(next(&mut rx).await, Some(2));
    }

    #[tokio::test]
    async fn reject_fails_immediately() {
        let (q, _rx, stats) = queue(1, OverflowPolicy::Reject);
        q.enqueue(1).await.unwrap();
        assert!(matches!(q.enqueue(2).await, Err(EngineError::QueueFull { .. })));
        assert_eq!(q.len(), 1);
        assert_eq!(stats.snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn drop_counts_discarded_records() {
        let (q, mut rx, stats) = queue(1, OverflowPolicy::Drop);
        q.enqueue(1).await.unwrap();
        q.enqueue(2).await.unwrap();
        assert_eq!(stats.snapshot().dropped_full, 1);
        assert_eq!(next(&mut rx).await, Some(1));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (q, rx, _) = queue(1, OverflowPolicy::Block);
        drop(rx);
        assert!(q.is_closed());
        assert!(matches!(q.enqueue(1).await, Err(EngineError::QueueClosed("test"))));
    }
}
