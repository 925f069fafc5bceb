use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::StorageError;

/// Persistence contract for one entity type.
///
/// Backends own every wire and storage-protocol detail. The engine only
/// reads back single rows for reconciliation and writes whole batches.
pub trait PersistenceDao<R: Entity>: Send + Sync {
    /// Read the persisted row for `id`, if any.
    fn fetch_existing<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<R>, StorageError>> + Send + 'a>>;

    /// Upsert a batch. Holds at most one row per id.
    fn write_batch(
        &self,
        records: Vec<R>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>>;
}

/// A storage engine able to hand out a DAO for any entity type.
///
/// Exactly one backend is active per process; it is picked from
/// configuration at startup and bound into the engine's registry.
pub trait StorageBackend: Send + Sync {
    /// Backend name as used in configuration (`memory`, `file`, ...).
    fn name(&self) -> &'static str;

    /// Prepare the backend (directories, schemas). Called once before binding.
    fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// DAO for entity type `R`.
    fn dao<R: Entity>(&self) -> Arc<dyn PersistenceDao<R>>;
}
