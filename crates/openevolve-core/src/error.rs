//! Error taxonomy (spec §7). Each subsystem crate defines its own
//! `thiserror::Error` enum (the teacher's one-enum-per-crate convention);
//! `EngineError` wraps them for callers that cross subsystem boundaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type threaded through the engine. Fatal variants (`Store`,
/// `PatchRevert`) abort the generation; everything else is converted to a
/// rejected-candidate record at the slot boundary (spec §7 propagation
/// policy).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("patch parse error: {0}")]
    PatchParse(String),

    #[error("patch apply error: {0}")]
    PatchApply(String),

    #[error("patch revert error: {0} (fatal)")]
    PatchRevert(String),

    #[error("evaluator error: {0}")]
    Evaluator(String),

    #[error("evaluator timeout after {0}ms")]
    EvaluatorTimeout(u64),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("llm timeout after {0}ms")]
    LlmTimeout(u64),

    #[error("store error: {0} (fatal)")]
    Store(String),

    #[error("prompt too large: current code alone is {current_tokens} tokens, budget is {budget_tokens}")]
    PromptTooLarge {
        current_tokens: usize,
        budget_tokens: usize,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Fatal errors abort the generation (spec §7); everything else becomes
    /// a rejected candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::PatchRevert(_))
    }

    /// Short tag surfaced on rejected-candidate records (spec §7
    /// "user-visible behaviour").
    pub fn tag(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config_error",
            EngineError::PatchParse(_) => "patch_parse_error",
            EngineError::PatchApply(_) => "patch_apply_error",
            EngineError::PatchRevert(_) => "patch_revert_error",
            EngineError::Evaluator(_) => "evaluator_error",
            EngineError::EvaluatorTimeout(_) => "evaluator_timeout",
            EngineError::Llm(_) => "llm_error",
            EngineError::LlmTimeout(_) => "llm_timeout",
            EngineError::Store(_) => "store_error",
            EngineError::PromptTooLarge { .. } => "prompt_too_large",
            EngineError::Other(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_store_and_revert_only() {
        assert!(EngineError::Store("corrupt".into()).is_fatal());
        assert!(EngineError::PatchRevert("disk full".into()).is_fatal());
        assert!(!EngineError::LlmTimeout(5000).is_fatal());
        assert!(!EngineError::PatchApply("ambiguous".into()).is_fatal());
    }

    #[test]
    fn tags_are_stable_identifiers() {
        assert_eq!(EngineError::LlmTimeout(1).tag(), "llm_timeout");
        assert_eq!(
            EngineError::PromptTooLarge {
                current_tokens: 10,
                budget_tokens: 5
            }
            .tag(),
            "prompt_too_large"
        );
    }
}
