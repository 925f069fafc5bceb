use collector_api::Entity;

use crate::{ApplicationTopology, GlobalTrace, Instance, NodeMapping, ServiceReferenceMetric};

/// Default worker registration of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: &'static str,
    pub worker_id: u16,
    /// Merge the flush batch with persisted rows before writing.
    pub reconcile: bool,
}

/// Every entity known to the collector, ordered by worker id.
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { kind: NodeMapping::KIND, worker_id: 0, reconcile: true },
    CatalogEntry { kind: Instance::KIND, worker_id: 1, reconcile: true },
    CatalogEntry { kind: ServiceReferenceMetric::KIND, worker_id: 2, reconcile: true },
    CatalogEntry { kind: ApplicationTopology::KIND, worker_id: 3, reconcile: true },
    // Trace rows are immutable once written; overwriting is safe.
    CatalogEntry { kind: GlobalTrace::KIND, worker_id: 4, reconcile: false },
];

pub fn lookup(kind: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.kind == kind)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn worker_ids_and_kinds_are_unique() {
        let ids: HashSet<u16> = CATALOG.iter().map(|e| e.worker_id).collect();
        let kinds: HashSet<&str> = CATALOG.iter().map(|e| e.kind).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert_eq!(kinds.len(), CATALOG.len());
    }

    #[test]
    fn lookup_by_kind() {
        let entry = lookup("global_trace").unwrap();
        assert_eq!(entry.worker_id, 4);
        assert!(!entry.reconcile);
        assert!(lookup("segment").is_none());
    }
}
