use collector_api::{Entity, StorageBackend};
use collector_engine::{
    CollectorConfig, StorageRegistry, StorageRegistryBuilder, WorkerConfig, WorkerProvider,
    WorkerRegistration, WorkerSettings,
};
use collector_model::{
    ApplicationTopology, CatalogEntry, GlobalTrace, Instance, NodeMapping, ServiceReferenceMetric,
    CATALOG,
};
use serde::Serialize;

use crate::error::ServerError;

/// One worker to start: catalog defaults with configuration applied.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub kind: &'static str,
    pub worker_id: u16,
    pub reconcile: bool,
    pub queue_capacity: usize,
    #[serde(skip)]
    pub settings: WorkerSettings,
}

impl Plan {
    fn registration(&self) -> WorkerRegistration {
        WorkerRegistration::new(self.worker_id)
            .with_queue_capacity(self.queue_capacity)
            .with_reconciliation(self.reconcile)
    }
}

/// Resolve the `[[workers]]` list against the entity catalog. An empty list
/// enables every cataloged entity with its defaults.
pub fn plan(config: &CollectorConfig) -> Result<Vec<Plan>, ServerError> {
    if config.workers.is_empty() {
        return Ok(CATALOG
            .iter()
            .map(|entry| resolve(entry, &WorkerConfig::for_entity(entry.kind), config))
            .collect());
    }

    config
        .workers
        .iter()
        .map(|worker| {
            let entry = collector_model::catalog::lookup(&worker.entity)
                .ok_or_else(|| ServerError::UnknownEntity(worker.entity.clone()))?;
            tracing::debug!(entity = entry.kind, overrides = ?worker, "resolved worker");
            Ok(resolve(entry, worker, config))
        })
        .collect()
}

fn resolve(entry: &'static CatalogEntry, worker: &WorkerConfig, config: &CollectorConfig) -> Plan {
    Plan {
        kind: entry.kind,
        worker_id: worker.id.unwrap_or(entry.worker_id),
        reconcile: worker.reconcile.unwrap_or(entry.reconcile),
        queue_capacity: config.defaults.queue_capacity(worker),
        settings: config.defaults.settings(worker),
    }
}

type Enable<B> = fn(
    StorageRegistryBuilder,
    &mut WorkerProvider,
    &B,
    &Plan,
) -> Result<StorageRegistryBuilder, ServerError>;

fn enabler<B: StorageBackend>(kind: &str) -> Option<Enable<B>> {
    let table: [(&str, Enable<B>); 5] = [
        (NodeMapping::KIND, enable::<NodeMapping, B>),
        (Instance::KIND, enable::<Instance, B>),
        (ServiceReferenceMetric::KIND, enable::<ServiceReferenceMetric, B>),
        (ApplicationTopology::KIND, enable::<ApplicationTopology, B>),
        (GlobalTrace::KIND, enable::<GlobalTrace, B>),
    ];
    table.into_iter().find(|(k, _)| *k == kind).map(|(_, f)| f)
}

fn enable<R: Entity, B: StorageBackend>(
    storage: StorageRegistryBuilder,
    provider: &mut WorkerProvider,
    backend: &B,
    plan: &Plan,
) -> Result<StorageRegistryBuilder, ServerError> {
    provider.register::<R>(plan.registration(), plan.settings)?;
    Ok(storage.bind_from::<R, B>(backend))
}

/// Register a worker and bind the backend DAO for every planned entity.
pub fn wire<B: StorageBackend>(
    backend: &B,
    plans: &[Plan],
) -> Result<(StorageRegistry, WorkerProvider), ServerError> {
    let mut storage = StorageRegistry::builder(backend.name());
    let mut provider = WorkerProvider::new();
    for plan in plans {
        let enable = enabler::<B>(plan.kind)
            .ok_or_else(|| ServerError::UnknownEntity(plan.kind.to_string()))?;
        storage = enable(storage, &mut provider, backend, plan)?;
    }
    Ok((storage.build()?, provider))
}

#[cfg(test)]
mod tests {
    use collector_engine::EngineError;
    use storage_memory::MemoryBackend;

    use super::*;

    #[test]
    fn empty_worker_list_enables_catalog() {
        let config = CollectorConfig::parse("").unwrap();
        let plans = plan(&config).unwrap();
        assert_eq!(plans.len(), CATALOG.len());
        let trace = plans.iter().find(|p| p.kind == "global_trace").unwrap();
        assert!(!trace.reconcile);

        let (storage, provider) = wire(&MemoryBackend::new(), &plans).unwrap();
        assert_eq!(storage.len(), CATALOG.len());
        assert_eq!(provider.len(), CATALOG.len());
    }

    #[test]
    fn overrides_apply() {
        let config = CollectorConfig::parse(
            "[[workers]]\nentity = \"instance\"\nid = 11\nreconcile = false\nqueue_capacity = 2",
        )
        .unwrap();
        let plans = plan(&config).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!((plans[0].worker_id, plans[0].reconcile, plans[0].queue_capacity), (11, false, 2));
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let config = CollectorConfig::parse("[[workers]]\nentity = \"segment\"").unwrap();
        assert!(matches!(plan(&config), Err(ServerError::UnknownEntity(kind)) if kind == "segment"));
    }

    #[test]
    fn clashing_ids_fail_wiring() {
        let config = CollectorConfig::parse(
            "[[workers]]\nentity = \"instance\"\nid = 0\n[[workers]]\nentity = \"node_mapping\"",
        )
        .unwrap();
        let plans = plan(&config).unwrap();
        let err = wire(&MemoryBackend::new(), &plans).err().unwrap();
        assert!(matches!(
            err,
            ServerError::Engine(EngineError::DuplicateWorker { worker_id: 0, .. })
        ));
    }
}
