//! Keyed aggregation and persistence pipeline.
//!
//! Records are routed by type to one worker per entity. A worker folds
//! records sharing an id into its merge buffer, hands the buffer off as a
//! batch and writes it through the storage registry, optionally merging the
//! persisted row first.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod worker;

pub use buffer::MergeBuffer;
pub use cache::StaticCache;
pub use config::{BackendKind, CollectorConfig, StorageConfig, WorkerConfig, WorkerDefaults};
pub use dispatcher::{Dispatcher, DispatcherStats, WorkerReport, WorkerRoute};
pub use error::EngineError;
pub use provider::{Collector, WorkerProvider, WorkerRegistration, WorkerSettings, DEFAULT_QUEUE_CAPACITY};
pub use queue::{EnqueueSettings, OverflowPolicy, WorkerQueue};
pub use registry::{StorageRegistry, StorageRegistryBuilder};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker::{FlushPolicy, WorkerHandle, WorkerState};
