//! Shared data model, error taxonomy, configuration surface, and observability
//! for the OpenEvolve engine and its subsystems.

pub mod config;
pub mod error;
pub mod observability;
pub mod types;

pub use config::Config;
pub use error::{EngineError, Result};
pub use types::{Candidate, Evaluation, MetaPrompt, Run};
