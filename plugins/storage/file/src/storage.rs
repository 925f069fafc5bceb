use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::{Mutex, MutexGuard};

use collector_api::{Entity, PersistenceDao, StorageError};

// ════════════════════════════════════════════════════════════════
//  FileDao
// ════════════════════════════════════════════════════════════════

type Rows<R> = BTreeMap<String, R>;

/// Table of one entity kind stored as a single JSON object.
///
/// The parsed table is kept in memory after the first access; this DAO is
/// assumed to be the only writer of its file.
pub struct FileDao<R> {
    path: PathBuf,
    tmp_path: PathBuf,
    /// Parsed table, `None` until loaded or after a failed store.
    cached: Mutex<Option<Rows<R>>>,
    _entity: PhantomData<fn() -> R>,
}

impl<R: Entity> FileDao<R> {
    pub fn new(path: PathBuf) -> Self {
        let tmp_path = path.with_extension("json.tmp");
        Self {
            path,
            tmp_path,
            cached: Mutex::new(None),
            _entity: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole table from disk. A missing file is an empty table.
    pub async fn load(&self) -> Result<Rows<R>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_err("read", e)),
        };
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::from(e).with_context(format!("parse {}", self.path.display()))
        })
    }

    /// Lock the cached table, loading it from disk if needed.
    async fn rows(&self) -> Result<MutexGuard<'_, Option<Rows<R>>>, StorageError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = Some(self.load().await?);
        }
        Ok(cached)
    }

    async fn store(&self, rows: &Rows<R>) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(rows)?;
        tokio::fs::write(&self.tmp_path, json)
            .await
            .map_err(|e| self.io_err("write", e))?;
        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| self.io_err("rename", e))
    }

    fn io_err(&self, op: &str, e: std::io::Error) -> StorageError {
        StorageError::from(e).with_context(format!("{op} {}", self.path.display()))
    }
}

impl<R: Entity> PersistenceDao<R> for FileDao<R> {
    fn fetch_existing<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<R>, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let cached = self.rows().await?;
            Ok(cached.as_ref().and_then(|rows| rows.get(id).cloned()))
        })
    }

    fn write_batch(
        &self,
        records: Vec<R>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        Box::pin(async move {
            let mut cached = self.rows().await?;
            let Some(rows) = cached.as_mut() else {
                return Err(StorageError::logic(format!("{} is not loaded", self.path.display())));
            };
            let count = records.len();
            for record in records {
                rows.insert(record.id(), record);
            }
            let total = rows.len();
            if let Err(e) = self.store(rows).await {
                // Memory now holds rows the file does not; reload next time.
                *cached = None;
                return Err(e);
            }
            tracing::trace!(path = %self.path.display(), batch = count, rows = total, "table rewritten");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use collector_api::{ErrorKind, StorageBackend};
    use collector_model::{Instance, ServiceReferenceMetric};

    use crate::FileBackend;

    use super::*;

    #[tokio::test]
    async fn batches_upsert_into_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("data"));
        backend.init().unwrap();
        let dao = backend.dao::<Instance>();

        dao.write_batch(vec![Instance::heartbeat(1, 10), Instance::heartbeat(2, 10)])
            .await
            .unwrap();
        dao.write_batch(vec![Instance::heartbeat(2, 30)]).await.unwrap();

        let table = backend.table::<Instance>();
        assert!(table.path().ends_with("instance.json"));
        let rows = table.load().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["2"].heartbeat_time, 30);
        assert!(!table.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_table_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let dao = backend.dao::<ServiceReferenceMetric>();
        assert!(dao.fetch_existing("201801_1_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn table_is_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let dao = backend.dao::<Instance>();
        dao.write_batch(vec![Instance::heartbeat(1, 10)]).await.unwrap();

        std::fs::remove_file(dir.path().join("instance.json")).unwrap();
        let row = dao.fetch_existing("1").await.unwrap();
        assert_eq!(row.map(|i| i.heartbeat_time), Some(10));
    }

    #[tokio::test]
    async fn failed_store_is_not_kept_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("missing"));
        let dao = backend.dao::<Instance>();

        let err = dao.write_batch(vec![Instance::heartbeat(1, 10)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(dao.fetch_existing("1").await.unwrap().is_none());

        backend.init().unwrap();
        dao.write_batch(vec![Instance::heartbeat(2, 20)]).await.unwrap();
        let rows = backend.table::<Instance>().load().await.unwrap();
        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["2"]);
    }

    #[tokio::test]
    async fn corrupt_table_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("instance.json"), b"{not json").unwrap();
        let dao = FileBackend::new(dir.path()).dao::<Instance>();
        let err = dao.fetch_existing("1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("instance.json"));
    }
}
