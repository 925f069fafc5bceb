use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-worker counters. Written by the queue, the accumulator and the
/// flusher; read by anyone holding a handle.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub(crate) received: AtomicU64,
    pub(crate) merged: AtomicU64,
    pub(crate) dropped_full: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) flushed_batches: AtomicU64,
    pub(crate) flushed_records: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
    pub(crate) dropped_records: AtomicU64,
    pub(crate) retries: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            merged: load(&self.merged),
            dropped_full: load(&self.dropped_full),
            rejected: load(&self.rejected),
            flushed_batches: load(&self.flushed_batches),
            flushed_records: load(&self.flushed_records),
            flush_failures: load(&self.flush_failures),
            dropped_records: load(&self.dropped_records),
            retries: load(&self.retries),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Records taken off the queue.
    pub received: u64,
    /// Records folded into an already buffered id.
    pub merged: u64,
    /// Records discarded by the `drop` overflow policy.
    pub dropped_full: u64,
    /// Enqueue calls failed with queue-full.
    pub rejected: u64,
    pub flushed_batches: u64,
    pub flushed_records: u64,
    /// Batches given up after exhausting retries.
    pub flush_failures: u64,
    /// Records lost with failed batches.
    pub dropped_records: u64,
    pub retries: u64,
}
