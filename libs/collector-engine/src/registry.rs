use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use collector_api::{Entity, PersistenceDao, StorageBackend};

use crate::error::EngineError;

struct Binding {
    kind: &'static str,
    /// Always an `Arc<dyn PersistenceDao<R>>` for the entity keyed by this binding.
    dao: Box<dyn Any + Send + Sync>,
}

/// Storage Access Registry: entity type → persistence implementation of the
/// single active backend.
///
/// Built once at startup and immutable afterwards, so lookups need no
/// synchronization.
pub struct StorageRegistry {
    backend: String,
    bindings: HashMap<TypeId, Binding>,
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.bindings.values().map(|b| b.kind).collect();
        kinds.sort_unstable();
        f.debug_struct("StorageRegistry")
            .field("backend", &self.backend)
            .field("kinds", &kinds)
            .finish()
    }
}

impl StorageRegistry {
    pub fn builder(backend: impl Into<String>) -> StorageRegistryBuilder {
        StorageRegistryBuilder {
            backend: backend.into(),
            bindings: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn lookup<R: Entity>(&self) -> Result<Arc<dyn PersistenceDao<R>>, EngineError> {
        self.bindings
            .get(&TypeId::of::<R>())
            .and_then(|b| b.dao.downcast_ref::<Arc<dyn PersistenceDao<R>>>())
            .cloned()
            .ok_or_else(|| EngineError::MissingDao {
                kind: R::KIND,
                backend: self.backend.clone(),
            })
    }

    pub fn contains<R: Entity>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<R>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub struct StorageRegistryBuilder {
    backend: String,
    bindings: HashMap<TypeId, Binding>,
    duplicates: Vec<&'static str>,
}

impl StorageRegistryBuilder {
    pub fn bind<R: Entity>(mut self, dao: Arc<dyn PersistenceDao<R>>) -> Self {
        let binding = Binding {
            kind: R::KIND,
            dao: Box::new(dao),
        };
        if self.bindings.insert(TypeId::of::<R>(), binding).is_some() {
            self.duplicates.push(R::KIND);
        }
        self
    }

    /// Bind `R` to the DAO the backend hands out for it.
    pub fn bind_from<R: Entity, B: StorageBackend>(self, backend: &B) -> Self {
        let dao = backend.dao::<R>();
        self.bind::<R>(dao)
    }

    pub fn build(self) -> Result<StorageRegistry, EngineError> {
        if let Some(kind) = self.duplicates.first() {
            return Err(EngineError::Config(format!(
                "storage contract for '{kind}' is bound more than once"
            )));
        }
        tracing::debug!(backend = %self.backend, bindings = self.bindings.len(), "storage registry built");
        Ok(StorageRegistry {
            backend: self.backend,
            bindings: self.bindings,
        })
    }
}

#[cfg(test)]
mod tests {
    use collector_model::{GlobalTrace, Instance};
    use storage_memory::MemoryBackend;

    use super::*;

    #[test]
    fn lookup_returns_bound_dao() {
        let backend = MemoryBackend::new();
        let registry = StorageRegistry::builder("memory")
            .bind_from::<Instance, _>(&backend)
            .build()
            .unwrap();
        assert!(registry.lookup::<Instance>().is_ok());
        assert!(registry.contains::<Instance>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_binding_names_kind_and_backend() {
        let registry = StorageRegistry::builder("file").build().unwrap();
        match registry.lookup::<GlobalTrace>() {
            Err(EngineError::MissingDao { kind, backend }) => {
                assert_eq!(kind, "global_trace");
                assert_eq!(backend, "file");
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn double_binding_is_config_error() {
        let backend = MemoryBackend::new();
        let err = StorageRegistry::builder("memory")
            .bind_from::<Instance, _>(&backend)
            .bind_from::<Instance, _>(&backend)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("instance")));
    }
}
