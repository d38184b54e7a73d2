//! The configuration surface the engine consumes (spec §6 "Configuration
//! surface"). Parsing this from a user-facing YAML file is the excluded
//! CLI's job; this crate only defines the shape and sane defaults, the way
//! the teacher's `ResourceLimits` defines shape/defaults for sandbox limits
//! while the CLI layer decides how they're sourced.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use crate::types::Direction;

fn default_population_size() -> usize {
    10
}
fn default_generations() -> usize {
    100
}
fn default_seed() -> u64 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub workdir: PathBuf,
    pub target_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_three")]
    pub elite: usize,
    #[serde(default = "default_three")]
    pub novel: usize,
    #[serde(default = "default_two")]
    pub young: usize,
}

fn default_three() -> usize {
    3
}
fn default_two() -> usize {
    2
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            elite: default_three(),
            novel: default_three(),
            young: default_two(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
    #[serde(default = "default_three")]
    pub elites_k: usize,
    #[serde(default = "default_three")]
    pub novel_m: usize,
    #[serde(default)]
    pub include_failures: bool,
    #[serde(default = "default_two")]
    pub fail_n: usize,
}

fn default_budget_tokens() -> usize {
    8_000
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            elites_k: default_three(),
            novel_m: default_three(),
            include_failures: true,
            fail_n: default_two(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvolutionScope {
    Blocks,
    Wholefile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default = "default_blocks_scope")]
    pub scope: EvolutionScope,
    #[serde(default = "default_true")]
    pub apply_safe_revert: bool,
}

fn default_blocks_scope() -> EvolutionScope {
    EvolutionScope::Blocks
}
fn default_true() -> bool {
    true
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            scope: default_blocks_scope(),
            apply_safe_revert: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStageConfig {
    pub name: String,
    /// Evaluator entry point: runnable as a standalone process with the
    /// target file path as its sole argument (spec §6 task module contract).
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_s: u64,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_true")]
    pub cancel_on_fail: bool,
    pub stages: Vec<CascadeStageConfig>,
}

fn default_max_parallel() -> usize {
    4
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            cancel_on_fail: true,
            stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPromptConfig {
    #[serde(default = "default_population")]
    pub population: usize,
    #[serde(default = "default_mutation_prob")]
    pub mutation_prob: f64,
    #[serde(default = "default_selection_top_k")]
    pub selection_top_k: usize,
}

fn default_population() -> usize {
    8
}
fn default_mutation_prob() -> f64 {
    0.3
}
fn default_selection_top_k() -> usize {
    4
}

impl Default for MetaPromptConfig {
    fn default() -> Self {
        Self {
            population: default_population(),
            mutation_prob: default_mutation_prob(),
            selection_top_k: default_selection_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_k_novelty")]
    pub k_novelty: usize,
    #[serde(default = "default_ageing_threshold")]
    pub ageing_threshold: u64,
}

fn default_capacity() -> usize {
    100
}
fn default_k_novelty() -> usize {
    5
}
fn default_ageing_threshold() -> u64 {
    25
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            k_novelty: default_k_novelty(),
            ageing_threshold: default_ageing_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_mode")]
    pub mode: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_mode() -> String {
    "http".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_llm_timeout_ms() -> u64 {
    60_000
}

/// The full recognised configuration surface (spec §6).
///
/// Parsing this from YAML is outside the core's scope; construct it
/// programmatically or via `serde_json`/`serde_yaml` at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub task: TaskConfig,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    pub metrics: HashMap<String, MetricConfig>,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default, rename = "meta_prompt")]
    pub meta_prompt: MetaPromptConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    pub llm: LlmConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Config {
    /// Validate cross-field constraints that a plain `Deserialize` can't
    /// express (spec §7 `ConfigError`).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.metrics.is_empty() {
            anyhow::bail!("config error: at least one metric must be declared");
        }
        if !self.task.workdir.is_dir() {
            anyhow::bail!(
                "config error: task workdir {} does not exist",
                self.task.workdir.display()
            );
        }
        if !self.task.workdir.join(&self.task.target_file).exists() {
            anyhow::bail!(
                "config error: target file {} not found under {}",
                self.task.target_file.display(),
                self.task.workdir.display()
            );
        }
        if self.cascade.stages.is_empty() {
            anyhow::bail!("config error: cascade must declare at least one evaluator stage");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_metrics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target.py"), "x = 1").unwrap();
        let cfg = Config {
            task: TaskConfig {
                workdir: dir.path().to_path_buf(),
                target_file: "target.py".into(),
            },
            population_size: 1,
            generations: 1,
            metrics: HashMap::new(),
            selection: SelectionConfig::default(),
            sampler: SamplerConfig::default(),
            evolution: EvolutionConfig::default(),
            cascade: CascadeConfig {
                stages: vec![CascadeStageConfig {
                    name: "correctness".into(),
                    command: "evaluators/correctness.py".into(),
                    args: vec![],
                    timeout_s: 10,
                    retries: 0,
                }],
                ..Default::default()
            },
            meta_prompt: MetaPromptConfig::default(),
            archive: ArchiveConfig::default(),
            llm: LlmConfig {
                mode: "echo".into(),
                model: "test".into(),
                temperature: 0.0,
                endpoint: None,
                timeout_ms: 1000,
            },
            seed: 0,
        };
        assert!(cfg.validate().is_err());
    }
}
