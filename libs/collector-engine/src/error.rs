use collector_api::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("worker id {worker_id} is already registered (while registering '{kind}')")]
    DuplicateWorker { worker_id: u16, kind: &'static str },

    #[error("entity '{0}' already has a worker")]
    DuplicateEntity(&'static str),

    #[error("no '{backend}' storage binding for entity '{kind}'")]
    MissingDao { kind: &'static str, backend: String },

    #[error("no worker registered for record type '{0}'")]
    Routing(String),

    #[error("cannot decode '{kind}' record: {source}")]
    Decode { kind: &'static str, source: StorageError },

    #[error("queue of '{kind}' is full (capacity {capacity})")]
    QueueFull { kind: &'static str, capacity: usize },

    #[error("queue of '{0}' is closed")]
    QueueClosed(&'static str),

    #[error("flush of {records} '{kind}' records failed: {source}")]
    Flush {
        kind: &'static str,
        records: usize,
        source: StorageError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the producer may resubmit the same record later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::QueueFull { .. })
    }

    /// Add context to the error.
    ///
    /// For `Storage` variant, context is added to the inner `StorageError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Storage(e) => EngineError::Storage(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
