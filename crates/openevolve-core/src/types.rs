//! The data model shared by every subsystem: runs, candidates, evaluations,
//! and meta-prompts (spec §3).

use serde::{Deserialize, Serialize};

fn default_parent_ids() -> Vec<String> {
    Vec::new()
}

/// A single evolution run. Immutable after creation except for appended
/// children (candidates, meta-prompts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Frozen configuration snapshot, serialized as-is.
    pub config_json: String,
}

/// A produced program variant (spec §3 "Candidate").
///
/// The `code_snapshot` is authoritative: re-running evaluators against it
/// must be deterministic given the evaluator code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub cand_id: String,
    pub run_id: String,
    #[serde(default = "default_parent_ids")]
    pub parent_ids: Vec<String>,
    pub meta_prompt_id: String,
    pub filepath: String,
    /// The patch that produced this candidate, serialized (JSON structured
    /// edits or a unified diff body).
    pub patch: String,
    pub code_snapshot: String,
    pub generation: u64,
    #[serde(default)]
    pub novelty: f64,
    #[serde(default)]
    pub age: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Candidate {
    /// The seed candidate of a run: generation 0, no parents (invariant e).
    pub fn is_seed(&self) -> bool {
        self.generation == 0 && self.parent_ids.is_empty()
    }
}

/// One row per (candidate, metric) (spec §3 "Evaluation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub eval_id: i64,
    pub cand_id: String,
    pub metric: String,
    pub value: f64,
    pub passed: bool,
    pub cost_ms: u64,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A sentinel metric name for cascade-level synthetic rows (spec §4.4).
pub const CASCADE_METRIC: &str = "__cascade__";

/// A sentinel metric name for slot-level failures that never reach the
/// cascade at all — patch rejection or an LLM timeout (spec §5, §7).
pub const SLOT_METRIC: &str = "__slot__";

/// An instruction template that co-evolves alongside candidates (spec §3
/// "MetaPrompt").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPrompt {
    pub meta_prompt_id: String,
    pub template: String,
    #[serde(default = "default_parent_ids")]
    pub parent_ids: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub fitness: f64,
}

/// Per-metric optimization direction (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Maximize,
    Minimize,
}

/// Whether a candidate is "accepted": every evaluation row has `passed=true`
/// (spec §3 invariant c, §4.5 Archive membership gate).
pub fn is_accepted(evaluations: &[Evaluation]) -> bool {
    !evaluations.is_empty() && evaluations.iter().all(|e| e.passed)
}
