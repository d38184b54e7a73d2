use thiserror::Error;

pub type Result<T> = std::result::Result<T, PromptError>;

#[derive(Debug, Error, PartialEq)]
pub enum PromptError {
    /// The current code alone exceeds the token budget (spec §4.3).
    #[error("prompt too large: current code alone is {current_tokens} tokens, budget is {budget_tokens}")]
    TooLarge {
        current_tokens: usize,
        budget_tokens: usize,
    },
}

impl From<PromptError> for openevolve_core::EngineError {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::TooLarge {
                current_tokens,
                budget_tokens,
            } => openevolve_core::EngineError::PromptTooLarge {
                current_tokens,
                budget_tokens,
            },
        }
    }
}
