use std::marker::PhantomData;
use std::sync::Arc;

use collector_api::{DimensionCache, Entity};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, DispatcherStats, WorkerRoute};
use crate::error::EngineError;
use crate::queue::{EnqueueSettings, OverflowPolicy};
use crate::registry::StorageRegistry;
use crate::worker::{self, FlushPolicy, WorkerHandle};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Startup-time identity of a worker. Immutable once registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRegistration {
    /// Stable id, unique across all worker types.
    pub worker_id: u16,
    pub queue_capacity: usize,
    /// Merge persisted state into every batch before writing it.
    pub needs_reconciliation: bool,
}

impl WorkerRegistration {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            needs_reconciliation: false,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_reconciliation(mut self, reconcile: bool) -> Self {
        self.needs_reconciliation = reconcile;
        self
    }
}

/// Runtime knobs of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSettings {
    pub flush: FlushPolicy,
    pub enqueue: EnqueueSettings,
}

impl WorkerSettings {
    /// Reject values a worker cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        positive("flush_size", self.flush.flush_size == 0)?;
        positive("flush_interval", self.flush.flush_interval.is_zero())?;
        positive("io_timeout", self.flush.io_timeout.is_zero())?;
        if self.enqueue.overflow == OverflowPolicy::Block {
            positive("enqueue_timeout", self.enqueue.timeout.is_zero())?;
        }
        Ok(())
    }
}

pub(crate) fn positive(name: &str, is_zero: bool) -> Result<(), EngineError> {
    if is_zero {
        Err(EngineError::Config(format!("'{name}' must be positive")))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

trait WorkerFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn registration(&self) -> WorkerRegistration;

    /// Fail if the worker could not be started against `storage`.
    fn check(&self, storage: &StorageRegistry) -> Result<(), EngineError>;

    fn start(
        &self,
        storage: &StorageRegistry,
        cache: Arc<dyn DimensionCache>,
        token: CancellationToken,
    ) -> Result<(Arc<dyn WorkerRoute>, JoinHandle<()>), EngineError>;
}

struct EntityWorkerFactory<R> {
    registration: WorkerRegistration,
    settings: WorkerSettings,
    _entity: PhantomData<fn() -> R>,
}

impl<R: Entity> WorkerFactory for EntityWorkerFactory<R> {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    fn registration(&self) -> WorkerRegistration {
        self.registration
    }

    fn check(&self, storage: &StorageRegistry) -> Result<(), EngineError> {
        storage.lookup::<R>().map(|_| ())
    }

    fn start(
        &self,
        storage: &StorageRegistry,
        cache: Arc<dyn DimensionCache>,
        token: CancellationToken,
    ) -> Result<(Arc<dyn WorkerRoute>, JoinHandle<()>), EngineError> {
        let dao = storage.lookup::<R>()?;
        let (handle, task) = worker::spawn::<R>(
            self.registration,
            self.settings.flush,
            self.settings.enqueue,
            dao,
            cache,
            token,
        );
        Ok((Arc::new(handle), task))
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Collects worker registrations at startup and turns them into a running
/// [`Collector`].
#[derive(Default)]
pub struct WorkerProvider {
    factories: Vec<Box<dyn WorkerFactory>>,
}

impl std::fmt::Debug for WorkerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.factories.iter().map(|f| f.kind()).collect();
        f.debug_struct("WorkerProvider").field("kinds", &kinds).finish()
    }
}

impl WorkerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the worker for entity `R`.
    ///
    /// Fails on a reused worker id, on a second registration of the same
    /// entity, on a zero queue capacity and on settings rejected by
    /// [`WorkerSettings::validate`].
    pub fn register<R: Entity>(
        &mut self,
        registration: WorkerRegistration,
        settings: WorkerSettings,
    ) -> Result<&mut Self, EngineError> {
        positive("queue_capacity", registration.queue_capacity == 0)
            .and_then(|()| settings.validate())
            .map_err(|e| e.with_context(format!("worker '{}'", R::KIND)))?;
        if self.factories.iter().any(|f| f.kind() == R::KIND) {
            return Err(EngineError::DuplicateEntity(R::KIND));
        }
        if self
            .factories
            .iter()
            .any(|f| f.registration().worker_id == registration.worker_id)
        {
            return Err(EngineError::DuplicateWorker {
                worker_id: registration.worker_id,
                kind: R::KIND,
            });
        }

        tracing::debug!(worker = registration.worker_id, kind = R::KIND, "registered worker");
        self.factories.push(Box::new(EntityWorkerFactory::<R> {
            registration,
            settings,
            _entity: PhantomData,
        }));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Construct every registered worker, in worker id order.
    ///
    /// All storage lookups are checked before the first task is spawned, so
    /// a missing binding leaves nothing running.
    pub fn start(
        mut self,
        storage: &StorageRegistry,
        cache: Arc<dyn DimensionCache>,
        token: CancellationToken,
    ) -> Result<Collector, EngineError> {
        for factory in &self.factories {
            factory.check(storage)?;
        }
        self.factories.sort_by_key(|f| f.registration().worker_id);

        let mut routes = Vec::with_capacity(self.factories.len());
        let mut tasks = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            let (route, task) = factory.start(storage, cache.clone(), token.child_token())?;
            tasks.push(WorkerTask {
                worker_id: factory.registration().worker_id,
                kind: factory.kind(),
                task,
            });
            routes.push(route);
        }

        tracing::info!(backend = storage.backend(), workers = tasks.len(), "collector started");

        Ok(Collector {
            dispatcher: Arc::new(Dispatcher::new(routes)),
            tasks,
            token,
        })
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

struct WorkerTask {
    worker_id: u16,
    kind: &'static str,
    task: JoinHandle<()>,
}

/// The running pipeline: one worker per registered entity behind a shared
/// dispatcher.
pub struct Collector {
    dispatcher: Arc<Dispatcher>,
    tasks: Vec<WorkerTask>,
    token: CancellationToken,
}

impl Collector {
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// The worker registered under `worker_id`; the same instance on every call.
    pub fn provide(&self, worker_id: u16) -> Option<Arc<dyn WorkerRoute>> {
        self.dispatcher.provide(worker_id)
    }

    pub fn handle<R: Entity>(&self) -> Option<WorkerHandle<R>> {
        self.dispatcher.handle::<R>().cloned()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every worker and wait until their final batches are written.
    pub async fn shutdown(self) -> DispatcherStats {
        self.token.cancel();

        for WorkerTask { worker_id, kind, task } in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(worker = worker_id, kind, error = %e, "worker task failed");
            }
        }

        let stats = self.dispatcher.stats();
        for report in &stats.workers {
            tracing::info!(
                worker = report.worker_id,
                kind = report.kind,
                received = report.stats.received,
                flushed = report.stats.flushed_records,
                dropped = report.stats.dropped_records + report.stats.dropped_full,
                failures = report.stats.flush_failures,
                "worker summary"
            );
        }
        stats
    }
}
