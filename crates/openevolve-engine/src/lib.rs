//! Generational orchestrator: wires the patch engine, evaluator cascade,
//! archive, meta-prompt pool, prompt sampler, and store together into the
//! engine's single public entry point, `Engine` (spec §4.7).

pub mod engine;
pub mod llm;
pub mod run_dir;

pub use engine::{Engine, GenerationReport, SlotOutcome};
pub use llm::{EchoLlmClient, LlmClient};
