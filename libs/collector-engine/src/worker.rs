use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use collector_api::{DimensionCache, Entity, PersistenceDao, StorageError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::buffer::MergeBuffer;
use crate::error::EngineError;
use crate::provider::WorkerRegistration;
use crate::queue::{self, EnqueueSettings, FlushAck, Message, WorkerQueue};
use crate::stats::{bump, StatsSnapshot, WorkerStats};

/// Upper bound for the retry delay between flush attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// When and how a worker writes its buffer out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Hand the buffer to the flusher once it holds this many ids.
    pub flush_size: usize,
    /// Hand off a non-empty buffer at least this often.
    pub flush_interval: Duration,
    /// Additional attempts after a failed write.
    pub write_retries: u32,
    /// Delay before the first retry; doubles on every further one, up to 30s.
    pub retry_backoff: Duration,
    /// Bound for every `fetch_existing` and `write_batch` call.
    pub io_timeout: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            flush_size: 512,
            flush_interval: Duration::from_secs(1),
            write_retries: 3,
            retry_backoff: Duration::from_millis(100),
            io_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Accumulating,
    Flushing,
}

#[derive(Debug, Default)]
struct Progress {
    buffered: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Progress {
    fn state(&self) -> WorkerState {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            WorkerState::Flushing
        } else if self.buffered.load(Ordering::Acquire) > 0 {
            WorkerState::Accumulating
        } else {
            WorkerState::Idle
        }
    }
}

/// A drained buffer on its way to storage, plus whoever waits for it.
struct Batch<R> {
    entries: HashMap<String, R>,
    acks: Vec<FlushAck>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Producer-facing side of a running worker.
pub struct WorkerHandle<R> {
    registration: WorkerRegistration,
    kind: &'static str,
    queue: WorkerQueue<R>,
    stats: Arc<WorkerStats>,
    progress: Arc<Progress>,
}

impl<R> Clone for WorkerHandle<R> {
    fn clone(&self) -> Self {
        Self {
            registration: self.registration,
            kind: self.kind,
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<R: Entity> WorkerHandle<R> {
    /// Enqueue a record according to the worker's overflow policy.
    pub async fn submit(&self, record: R) -> Result<(), EngineError> {
        self.queue.enqueue(record).await
    }

    /// Persist everything submitted before this call. Resolves with the
    /// number of records written by the batch that carried the request.
    pub async fn flush(&self) -> Result<usize, EngineError> {
        let (ack, done) = oneshot::channel();
        self.queue.request_flush(ack).await?;
        done.await.map_err(|_| EngineError::QueueClosed(self.kind))?
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn registration(&self) -> WorkerRegistration {
        self.registration
    }

    pub fn state(&self) -> WorkerState {
        self.progress.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &WorkerQueue<R> {
        &self.queue
    }
}

/// Start the accumulator and flusher tasks for `R`.
///
/// The returned join handle completes once the worker was cancelled, drained
/// its queue and the flusher wrote the final batch.
pub(crate) fn spawn<R: Entity>(
    registration: WorkerRegistration,
    policy: FlushPolicy,
    enqueue: EnqueueSettings,
    dao: Arc<dyn PersistenceDao<R>>,
    cache: Arc<dyn DimensionCache>,
    token: CancellationToken,
) -> (WorkerHandle<R>, JoinHandle<()>) {
    let stats = Arc::new(WorkerStats::default());
    let progress = Arc::new(Progress::default());
    let (queue, rx) = queue::bounded(R::KIND, registration.queue_capacity, enqueue, stats.clone());
    let (flush_tx, flush_rx) = mpsc::channel(1);

    let flusher = Flusher {
        worker_id: registration.worker_id,
        reconcile: registration.needs_reconciliation,
        dao,
        policy,
        stats: stats.clone(),
        progress: progress.clone(),
    };
    let accumulator = Accumulator {
        worker_id: registration.worker_id,
        buffer: MergeBuffer::new(),
        waiters: Vec::new(),
        flush_due: false,
        cache,
        policy,
        stats: stats.clone(),
        progress: progress.clone(),
    };

    let task = tokio::spawn(async move {
        let flusher = tokio::spawn(flusher.run(flush_rx));
        accumulator.run(rx, flush_tx, token).await;
        if let Err(e) = flusher.await {
            tracing::error!(worker = registration.worker_id, kind = R::KIND, error = %e, "flusher task failed");
        }
        tracing::info!(worker = registration.worker_id, kind = R::KIND, "worker stopped");
    });

    tracing::info!(
        worker = registration.worker_id,
        kind = R::KIND,
        capacity = registration.queue_capacity,
        reconcile = registration.needs_reconciliation,
        "spawned worker"
    );

    let handle = WorkerHandle {
        registration,
        kind: R::KIND,
        queue,
        stats,
        progress,
    };
    (handle, task)
}

// ---------------------------------------------------------------------------
// Accumulator: queue -> merge buffer -> hand-off
// ---------------------------------------------------------------------------

struct Accumulator<R> {
    worker_id: u16,
    buffer: MergeBuffer<R>,
    /// Flush requests to attach to the next hand-off.
    waiters: Vec<FlushAck>,
    /// A trigger fired but the flusher had no free slot yet.
    flush_due: bool,
    cache: Arc<dyn DimensionCache>,
    policy: FlushPolicy,
    stats: Arc<WorkerStats>,
    progress: Arc<Progress>,
}

impl<R: Entity> Accumulator<R> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Message<R>>,
        flush_tx: mpsc::Sender<Batch<R>>,
        token: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(self.policy.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                permit = flush_tx.reserve(), if self.flush_due => match permit {
                    Ok(permit) => self.hand_off(|batch| permit.send(batch)),
                    Err(_) => {
                        tracing::error!(worker = self.worker_id, kind = R::KIND, "flusher gone, stopping");
                        break;
                    }
                },
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg, &flush_tx),
                    None => break,
                },
                _ = tick.tick() => {
                    if !self.buffer.is_empty() {
                        self.trigger(&flush_tx);
                    }
                }
            }
        }

        self.drain(rx, flush_tx).await;
    }

    fn handle(&mut self, msg: Message<R>, flush_tx: &mpsc::Sender<Batch<R>>) {
        match msg {
            Message::Record(record) => {
                self.absorb(record);
                if self.buffer.len() >= self.policy.flush_size {
                    self.trigger(flush_tx);
                }
            }
            Message::Flush(ack) => {
                self.waiters.push(ack);
                self.trigger(flush_tx);
            }
        }
    }

    fn absorb(&mut self, mut record: R) {
        bump(&self.stats.received, 1);
        record.enrich(self.cache.as_ref());
        if self.buffer.absorb(record) {
            bump(&self.stats.merged, 1);
        }
        self.progress.buffered.store(self.buffer.len(), Ordering::Release);
    }

    /// Hand off now if the flusher has a free slot, otherwise on the next
    /// loop turn that finds one.
    fn trigger(&mut self, flush_tx: &mpsc::Sender<Batch<R>>) {
        self.flush_due = true;
        if let Ok(permit) = flush_tx.try_reserve() {
            self.hand_off(|batch| permit.send(batch));
        }
    }

    fn hand_off(&mut self, send: impl FnOnce(Batch<R>)) {
        self.flush_due = false;
        if self.buffer.is_empty() && self.waiters.is_empty() {
            return;
        }
        let batch = Batch {
            entries: self.buffer.take(),
            acks: std::mem::take(&mut self.waiters),
        };
        tracing::debug!(worker = self.worker_id, kind = R::KIND, batch = batch.entries.len(), "handing off batch");
        self.progress.buffered.store(0, Ordering::Release);
        self.progress.in_flight.fetch_add(1, Ordering::AcqRel);
        send(batch);
    }

    /// Stop accepting records, fold what is still queued and hand the rest
    /// to the flusher.
    async fn drain(mut self, mut rx: mpsc::Receiver<Message<R>>, flush_tx: mpsc::Sender<Batch<R>>) {
        rx.close();
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Record(record) => self.absorb(record),
                Message::Flush(ack) => self.waiters.push(ack),
            }
        }

        match flush_tx.reserve().await {
            Ok(permit) => self.hand_off(|batch| permit.send(batch)),
            Err(_) => tracing::error!(
                worker = self.worker_id,
                kind = R::KIND,
                records = self.buffer.len(),
                "flusher gone, final batch lost"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Flusher: reconcile + write with bounded retries
// ---------------------------------------------------------------------------

struct Flusher<R> {
    worker_id: u16,
    reconcile: bool,
    dao: Arc<dyn PersistenceDao<R>>,
    policy: FlushPolicy,
    stats: Arc<WorkerStats>,
    progress: Arc<Progress>,
}

impl<R: Entity> Flusher<R> {
    async fn run(self, mut rx: mpsc::Receiver<Batch<R>>) {
        while let Some(batch) = rx.recv().await {
            self.flush(batch).await;
        }
    }

    async fn flush(&self, batch: Batch<R>) {
        let Batch { entries, acks } = batch;
        let records = entries.len();
        let result = if entries.is_empty() {
            Ok(0)
        } else {
            self.write_with_retry(&entries).await.map(|()| records)
        };
        self.progress.in_flight.fetch_sub(1, Ordering::AcqRel);
        for ack in acks {
            let outcome = result.clone().map_err(|source| EngineError::Flush {
                kind: R::KIND,
                records,
                source,
            });
            // The requester may have given up waiting.
            let _ = ack.send(outcome);
        }
    }

    async fn write_with_retry(&self, entries: &HashMap<String, R>) -> Result<(), StorageError> {
        let mut backoff = self.policy.retry_backoff.min(MAX_BACKOFF);
        let mut attempt = 0;
        loop {
            match self.attempt(entries).await {
                Ok(()) => {
                    bump(&self.stats.flushed_batches, 1);
                    bump(&self.stats.flushed_records, entries.len() as u64);
                    tracing::debug!(worker = self.worker_id, kind = R::KIND, batch = entries.len(), "batch written");
                    return Ok(());
                }
                Err(e) if attempt < self.policy.write_retries => {
                    attempt += 1;
                    bump(&self.stats.retries, 1);
                    tracing::warn!(
                        worker = self.worker_id,
                        kind = R::KIND,
                        attempt,
                        error = %e,
                        "flush failed, retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    bump(&self.stats.flush_failures, 1);
                    bump(&self.stats.dropped_records, entries.len() as u64);
                    tracing::error!(
                        worker = self.worker_id,
                        kind = R::KIND,
                        batch = entries.len(),
                        error = %e,
                        "flush failed, dropping batch"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One full attempt. Starts from the batch as handed off, so a retry
    /// never merges persisted state twice.
    async fn attempt(&self, entries: &HashMap<String, R>) -> Result<(), StorageError> {
        let mut rows = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let entry = entry.clone();
            if !self.reconcile {
                rows.push(entry);
                continue;
            }
            match self.bounded(self.dao.fetch_existing(id)).await? {
                Some(mut persisted) => {
                    persisted.merge(entry);
                    rows.push(persisted);
                }
                None => rows.push(entry),
            }
        }
        self.bounded(self.dao.write_batch(rows)).await
    }

    async fn bounded<T>(
        &self,
        io: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.policy.io_timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::timeout(format!(
                "storage did not answer within {:?}",
                self.policy.io_timeout
            ))),
        }
    }
}
