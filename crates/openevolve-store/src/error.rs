use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl From<StoreError> for openevolve_core::EngineError {
    fn from(e: StoreError) -> Self {
        openevolve_core::EngineError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
