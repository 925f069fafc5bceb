use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use collector_api::{Entity, Record};
use serde::Serialize;

use crate::error::EngineError;
use crate::provider::WorkerRegistration;
use crate::stats::StatsSnapshot;
use crate::worker::{WorkerHandle, WorkerState};

/// Type-erased view of a running worker, as seen by the dispatcher.
pub trait WorkerRoute: Send + Sync {
    fn kind(&self) -> &'static str;

    fn registration(&self) -> WorkerRegistration;

    /// Decode the record payload into the worker's entity and enqueue it.
    fn submit_record(
        &self,
        record: Record,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + '_>>;

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<usize, EngineError>> + Send + '_>>;

    fn state(&self) -> WorkerState;

    fn stats(&self) -> StatsSnapshot;

    fn as_any(&self) -> &dyn Any;
}

impl<R: Entity> WorkerRoute for WorkerHandle<R> {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    fn registration(&self) -> WorkerRegistration {
        WorkerHandle::registration(self)
    }

    fn submit_record(
        &self,
        record: Record,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + '_>> {
        Box::pin(async move {
            let entity = record
                .into_entity::<R>()
                .map_err(|source| EngineError::Decode { kind: R::KIND, source })?;
            self.submit(entity).await
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<usize, EngineError>> + Send + '_>> {
        Box::pin(WorkerHandle::flush(self))
    }

    fn state(&self) -> WorkerState {
        WorkerHandle::state(self)
    }

    fn stats(&self) -> StatsSnapshot {
        WorkerHandle::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-worker line of [`DispatcherStats`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: u16,
    pub kind: &'static str,
    pub state: WorkerState,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    /// Records whose type has no worker.
    pub routing_errors: u64,
    /// Records whose payload did not decode as their type.
    pub decode_errors: u64,
    pub workers: Vec<WorkerReport>,
}

/// Routes records to the queue of the worker registered for their type.
pub struct Dispatcher {
    by_kind: HashMap<&'static str, Arc<dyn WorkerRoute>>,
    by_id: BTreeMap<u16, Arc<dyn WorkerRoute>>,
    routing_errors: AtomicU64,
    decode_errors: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("kinds", &self.kinds()).finish()
    }
}

impl Dispatcher {
    /// Routes must carry distinct ids and kinds; the provider guarantees it.
    pub(crate) fn new(routes: Vec<Arc<dyn WorkerRoute>>) -> Self {
        let mut by_kind = HashMap::with_capacity(routes.len());
        let mut by_id = BTreeMap::new();
        for route in routes {
            by_kind.insert(route.kind(), route.clone());
            by_id.insert(route.registration().worker_id, route);
        }
        Self {
            by_kind,
            by_id,
            routing_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Route an untyped record. Unknown types and undecodable payloads are
    /// counted, logged and returned as errors; the record is discarded.
    pub async fn submit(&self, record: Record) -> Result<(), EngineError> {
        let Some(route) = self.by_kind.get(record.kind.as_str()) else {
            self.routing_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(kind = %record.kind, "no worker for record type, discarding");
            return Err(EngineError::Routing(record.kind));
        };
        match route.submit_record(record).await {
            Err(e @ EngineError::Decode { .. }) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "discarding record");
                Err(e)
            }
            other => other,
        }
    }

    /// Route a typed entity without the decode step.
    pub async fn submit_entity<R: Entity>(&self, entity: R) -> Result<(), EngineError> {
        match self.handle::<R>() {
            Some(handle) => handle.submit(entity).await,
            None => {
                self.routing_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = R::KIND, "no worker for record type, discarding");
                Err(EngineError::Routing(R::KIND.to_string()))
            }
        }
    }

    pub fn handle<R: Entity>(&self) -> Option<&WorkerHandle<R>> {
        self.by_kind
            .get(R::KIND)?
            .as_any()
            .downcast_ref::<WorkerHandle<R>>()
    }

    /// The worker registered under `worker_id`.
    pub fn provide(&self, worker_id: u16) -> Option<Arc<dyn WorkerRoute>> {
        self.by_id.get(&worker_id).cloned()
    }

    /// Routed kinds, in worker id order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.by_id.values().map(|r| r.kind()).collect()
    }

    /// Flush every worker. Every worker is asked even if an earlier one
    /// fails; the first failure is returned.
    pub async fn flush_all(&self) -> Result<usize, EngineError> {
        let mut written = 0;
        let mut first_err = None;
        for route in self.by_id.values() {
            match route.flush().await {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::error!(kind = route.kind(), error = %e, "flush failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            workers: self
                .by_id
                .iter()
                .map(|(id, route)| WorkerReport {
                    worker_id: *id,
                    kind: route.kind(),
                    state: route.state(),
                    stats: route.stats(),
                })
                .collect(),
        }
    }
}
