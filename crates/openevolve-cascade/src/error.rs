use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("evaluator '{0}' failed to launch: {1}")]
    Spawn(String, std::io::Error),
}

impl From<CascadeError> for openevolve_core::EngineError {
    fn from(e: CascadeError) -> Self {
        openevolve_core::EngineError::Evaluator(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
