use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::RwLock;

use collector_api::{Entity, PersistenceDao, StorageBackend, StorageError};

// ═══════════════════════════════════════════════════════════════
//  MemoryDao
// ═══════════════════════════════════════════════════════════════

/// One in-memory table: entity id -> latest written row.
pub struct MemoryDao<R> {
    rows: RwLock<HashMap<String, R>>,
    batches: AtomicU64,
}

impl<R> Default for MemoryDao<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            batches: AtomicU64::new(0),
        }
    }
}

impl<R: Entity> MemoryDao<R> {
    pub async fn get(&self, id: &str) -> Option<R> {
        self.rows.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// All rows, ordered by id.
    pub async fn snapshot(&self) -> Vec<R> {
        let rows = self.rows.read().await;
        let mut ids: Vec<_> = rows.keys().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| rows.get(id).cloned()).collect()
    }

    /// Store a row directly, bypassing the batch counter.
    pub async fn insert(&self, row: R) {
        self.rows.write().await.insert(row.id(), row);
    }

    /// Number of successful `write_batch` calls.
    pub fn batches_written(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl<R: Entity> PersistenceDao<R> for MemoryDao<R> {
    fn fetch_existing<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<R>, StorageError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.get(id).await) })
    }

    fn write_batch(
        &self,
        records: Vec<R>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        Box::pin(async move {
            let mut rows = self.rows.write().await;
            for record in records {
                rows.insert(record.id(), record);
            }
            self.batches.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBackend
// ═══════════════════════════════════════════════════════════════

/// Process-local backend. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TypeId, Arc<dyn Any + Send + Sync>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("memory backend table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The table of `R`, created on first use.
    pub fn table<R: Entity>(&self) -> Arc<MemoryDao<R>> {
        let mut tables = self.lock();
        let key = TypeId::of::<R>();
        if let Some(table) = tables
            .get(&key)
            .and_then(|t| t.clone().downcast::<MemoryDao<R>>().ok())
        {
            return table;
        }
        let table = Arc::new(MemoryDao::<R>::default());
        tables.insert(key, table.clone());
        table
    }

    pub fn tables(&self) -> usize {
        self.lock().len()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn dao<R: Entity>(&self) -> Arc<dyn PersistenceDao<R>> {
        self.table::<R>()
    }
}

#[cfg(test)]
mod tests {
    use collector_model::{GlobalTrace, Instance};

    use super::*;

    #[tokio::test]
    async fn write_batch_upserts_by_id() {
        let backend = MemoryBackend::new();
        let dao = backend.dao::<Instance>();
        dao.write_batch(vec![Instance::heartbeat(1, 10), Instance::heartbeat(2, 10)])
            .await
            .unwrap();
        dao.write_batch(vec![Instance::heartbeat(1, 20)]).await.unwrap();

        let table = backend.table::<Instance>();
        assert_eq!(table.len().await, 2);
        assert_eq!(table.batches_written(), 2);
        assert_eq!(
            dao.fetch_existing("1").await.unwrap().map(|i| i.heartbeat_time),
            Some(20)
        );
        assert!(dao.fetch_existing("3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tables_are_per_entity_and_shared_by_clones() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.table::<Instance>().insert(Instance::heartbeat(1, 1)).await;
        assert!(clone.table::<GlobalTrace>().is_empty().await);
        assert_eq!(clone.table::<Instance>().len().await, 1);
        assert_eq!(backend.tables(), 2);
    }
}
