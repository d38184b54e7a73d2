use thiserror::Error;

/// PatchEngine failure categories (spec §7): each one is distinguishable so
/// the engine can tag a rejected candidate usefully.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("ambiguous search in block '{block}': expected exactly one match, found {found}")]
    AmbiguousSearch { block: String, found: usize },

    #[error("search text not found in block '{block}'")]
    SearchNotFound { block: String },

    #[error("unified diff apply failed: {0}")]
    DiffApply(String),

    #[error("revert failed: {0}")]
    Revert(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PatchError> for openevolve_core::EngineError {
    fn from(e: PatchError) -> Self {
        use openevolve_core::EngineError;
        match e {
            PatchError::Revert(s) => EngineError::PatchRevert(s),
            PatchError::Malformed(s) => EngineError::PatchParse(s),
            other => EngineError::PatchApply(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PatchError>;
