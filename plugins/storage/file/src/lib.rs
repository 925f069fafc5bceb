//! JSON-file storage backend.
//!
//! Every entity kind lives in one document `{data_dir}/{kind}.json`
//! mapping id to row. Batches rewrite the document through a temp file and
//! a rename, so readers never see a half-written table.

mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use collector_api::{Entity, PersistenceDao, StorageBackend, StorageError};

pub use storage::FileDao;

// ════════════════════════════════════════════════════════════════
//  FileBackend
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table<R: Entity>(&self) -> FileDao<R> {
        FileDao::new(self.data_dir.join(format!("{}.json", R::KIND)))
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn init(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            StorageError::from(e).with_context(format!("create {}", self.data_dir.display()))
        })?;
        tracing::info!(data_dir = %self.data_dir.display(), "file storage ready");
        Ok(())
    }

    fn dao<R: Entity>(&self) -> Arc<dyn PersistenceDao<R>> {
        Arc::new(self.table::<R>())
    }
}
