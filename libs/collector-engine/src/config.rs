use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::provider::{positive, DEFAULT_QUEUE_CAPACITY, WorkerSettings};
use crate::queue::{EnqueueSettings, OverflowPolicy};
use crate::worker::FlushPolicy;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Settings every worker starts from.
    #[serde(default)]
    pub defaults: WorkerDefaults,

    /// Enabled entity workers. Empty means every known entity.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,

    /// Static dimension tables: namespace -> key -> value.
    #[serde(default)]
    pub cache: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Root directory of the file backend.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerDefaults {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_size: default_flush_size(),
            flush_interval_ms: default_flush_interval_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            overflow: OverflowPolicy::default(),
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_flush_size() -> usize {
    512
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_enqueue_timeout_ms() -> u64 {
    500
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_io_timeout_ms() -> u64 {
    5000
}

/// One enabled entity worker. Unset fields fall back to the entity's
/// catalog entry and to `[defaults]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub entity: String,
    #[serde(default)]
    pub id: Option<u16>,
    #[serde(default)]
    pub reconcile: Option<bool>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub flush_size: Option<usize>,
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
    #[serde(default)]
    pub enqueue_timeout_ms: Option<u64>,
    #[serde(default)]
    pub overflow: Option<OverflowPolicy>,
    #[serde(default)]
    pub write_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

impl WorkerConfig {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }
}

impl WorkerDefaults {
    pub fn queue_capacity(&self, worker: &WorkerConfig) -> usize {
        worker.queue_capacity.unwrap_or(self.queue_capacity)
    }

    /// Flush and enqueue settings for `worker`, overrides applied.
    pub fn settings(&self, worker: &WorkerConfig) -> WorkerSettings {
        let ms = |v: Option<u64>, default: u64| Duration::from_millis(v.unwrap_or(default));
        WorkerSettings {
            flush: FlushPolicy {
                flush_size: worker.flush_size.unwrap_or(self.flush_size),
                flush_interval: ms(worker.flush_interval_ms, self.flush_interval_ms),
                write_retries: worker.write_retries.unwrap_or(self.write_retries),
                retry_backoff: ms(worker.retry_backoff_ms, self.retry_backoff_ms),
                io_timeout: ms(worker.io_timeout_ms, self.io_timeout_ms),
            },
            enqueue: EnqueueSettings {
                overflow: worker.overflow.unwrap_or(self.overflow),
                timeout: ms(worker.enqueue_timeout_ms, self.enqueue_timeout_ms),
            },
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content).map_err(|e| e.with_context(path.display()))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.storage.backend == BackendKind::File && self.storage.data_dir.is_none() {
            return Err(EngineError::Config(
                "storage: file backend requires 'data_dir'".to_string(),
            ));
        }

        check_worker(&self.defaults, &WorkerConfig::default())
            .map_err(|e| e.with_context("defaults"))?;

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if !seen.insert(worker.entity.as_str()) {
                return Err(EngineError::Config(format!(
                    "entity '{}' is configured more than once",
                    worker.entity
                )));
            }
            check_worker(&self.defaults, worker)
                .map_err(|e| e.with_context(format!("worker '{}'", worker.entity)))?;
        }
        Ok(())
    }
}

fn check_worker(defaults: &WorkerDefaults, worker: &WorkerConfig) -> Result<(), EngineError> {
    positive("queue_capacity", defaults.queue_capacity(worker) == 0)?;
    defaults.settings(worker).validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CollectorConfig::parse("").unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert!(config.workers.is_empty());
        let settings = config.defaults.settings(&WorkerConfig::for_entity("instance"));
        assert_eq!(settings, WorkerSettings::default());
        assert_eq!(config.defaults.queue_capacity, 1024);
    }

    #[test]
    fn worker_overrides_win_over_defaults() {
        let config = CollectorConfig::parse(
            r#"
            [defaults]
            flush_size = 64
            overflow = "reject"

            [[workers]]
            entity = "instance"
            queue_capacity = 2
            flush_interval_ms = 250

            [[workers]]
            entity = "global_trace"
            reconcile = false
            overflow = "drop"

            [cache.application]
            "1" = "order-service"
            "#,
        )
        .unwrap();

        let instance = &config.workers[0];
        let settings = config.defaults.settings(instance);
        assert_eq!(config.defaults.queue_capacity(instance), 2);
        assert_eq!(settings.flush.flush_size, 64);
        assert_eq!(settings.flush.flush_interval, Duration::from_millis(250));
        assert_eq!(settings.enqueue.overflow, OverflowPolicy::Reject);

        let trace = &config.workers[1];
        assert_eq!(trace.reconcile, Some(false));
        assert_eq!(config.defaults.settings(trace).enqueue.overflow, OverflowPolicy::Drop);
        assert_eq!(config.cache["application"]["1"], "order-service");
    }

    #[test]
    fn file_backend_requires_data_dir() {
        let err = CollectorConfig::parse("[storage]\nbackend = \"file\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("data_dir")));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(CollectorConfig::parse("[storage]\nbackend = \"cassandra\"").is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = CollectorConfig::parse("[[workers]]\nentity = \"instance\"\nqueue_capacity = 0")
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("worker 'instance'")));
    }

    #[test]
    fn zero_interval_override_is_rejected() {
        let err = CollectorConfig::parse("[[workers]]\nentity = \"instance\"\nflush_interval_ms = 0")
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("flush_interval")));
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let toml = "[[workers]]\nentity = \"instance\"\n[[workers]]\nentity = \"instance\"";
        assert!(CollectorConfig::parse(toml).is_err());
    }
}
