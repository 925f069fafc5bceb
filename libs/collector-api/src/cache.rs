/// Read-only dimension lookups (application codes, service names, ...).
///
/// Implementations must answer from memory; a miss returns `None` and the
/// caller carries on without the enrichment.
pub trait DimensionCache: Send + Sync {
    fn resolve(&self, namespace: &str, key: &str) -> Option<String>;
}

/// Cache that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl DimensionCache for NoCache {
    fn resolve(&self, _namespace: &str, _key: &str) -> Option<String> {
        None
    }
}
