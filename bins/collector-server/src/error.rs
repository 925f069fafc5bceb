#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Engine(#[from] collector_engine::EngineError),

    #[error("storage: {0}")]
    Storage(#[from] collector_api::StorageError),

    #[error("unknown entity '{0}' in [[workers]]")]
    UnknownEntity(String),

    #[error("input: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
