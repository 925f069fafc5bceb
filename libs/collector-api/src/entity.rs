use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::DimensionCache;
use crate::merge::Merge;

/// A persisted telemetry entity: one logical row updated by many records.
///
/// The engine only knows the kind, the identity and the merge rule. Field
/// layout, id composition and enrichment belong to the implementation.
pub trait Entity: Merge + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Record type discriminator. Selects the owning worker.
    const KIND: &'static str;

    /// Identity of the logical entity this record updates, unique within `KIND`.
    fn id(&self) -> String;

    /// Fill optional fields from read-only dimension lookups before merging.
    ///
    /// Lookups fail open: a miss leaves the field untouched.
    fn enrich(&mut self, _cache: &dyn DimensionCache) {}
}
