//! EvaluatorCascade: ordered evaluator stages, bounded parallelism, timeouts,
//! and early cancellation (spec §4.4).
//!
//! Each evaluator launches via `tokio::process::Command` wrapped in
//! `tokio::time::timeout`, the same shape as the teacher's
//! `skilllite-sandbox::runner::run_in_sandbox_with_limits_and_level` (spawn,
//! wait with a wall-clock limit, map timeout/non-zero exit to a structured
//! failure) and the Housaky DGM evaluator loop's
//! `timeout(Duration::from_secs(n), ...).await` pattern. Stage concurrency
//! across candidates is bounded by a `tokio::sync::Semaphore`, the same
//! primitive that engine uses for `evaluation_semaphore`.

pub mod error;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Semaphore;

use openevolve_core::config::{CascadeStageConfig, Direction, MetricConfig};
use openevolve_core::types::CASCADE_METRIC;

pub use error::{CascadeError, Result};

/// One raw evaluator outcome, not yet attached to a candidate (the Engine
/// fills in `cand_id` and `created_at` when persisting, spec §3
/// "Evaluation").
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub metric: String,
    pub value: f64,
    pub passed: bool,
    pub cost_ms: u64,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct EvaluatorCascade {
    stages: Vec<CascadeStageConfig>,
    cancel_on_fail: bool,
    metrics: HashMap<String, MetricConfig>,
    semaphore: Arc<Semaphore>,
}

impl EvaluatorCascade {
    pub fn new(
        stages: Vec<CascadeStageConfig>,
        cancel_on_fail: bool,
        max_parallel: usize,
        metrics: HashMap<String, MetricConfig>,
    ) -> Self {
        Self {
            stages,
            cancel_on_fail,
            metrics,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Run every stage in order against `target_path`, stopping early if
    /// `cancel_on_fail` is set and a stage fails.
    ///
    /// Each stage here models exactly one evaluator, so `semaphore` bounds
    /// how many slots' stages run at once, not how many evaluators within a
    /// single stage run concurrently — there is only ever one per stage.
    pub async fn run(&self, target_path: &Path) -> Vec<EvalResult> {
        let mut results = Vec::new();
        for stage in &self.stages {
            let stage_results = self.run_stage_with_retries(stage, target_path).await;
            let stage_failed = stage_results.iter().any(|r| !r.passed);
            results.extend(stage_results);

            if stage_failed && self.cancel_on_fail {
                tracing::warn!(stage = %stage.name, "cascade stage failed, cancelling remaining stages");
                results.push(EvalResult {
                    metric: CASCADE_METRIC.to_string(),
                    value: 0.0,
                    passed: false,
                    cost_ms: 0,
                    error: Some(format!("stage '{}' failed", stage.name)),
                });
                break;
            }
        }
        results
    }

    /// Run one stage, retrying up to `stage.retries` additional times.
    /// Spec §4.4: "only the last attempt's row is persisted, its `cost_ms`
    /// being the sum across attempts."
    async fn run_stage_with_retries(
        &self,
        stage: &CascadeStageConfig,
        target_path: &Path,
    ) -> Vec<EvalResult> {
        let mut total_cost_ms: u64 = 0;
        let mut last = Vec::new();
        for attempt in 0..=stage.retries {
            let _permit = self.semaphore.acquire().await.expect("semaphore closed");
            let (results, cost_ms) = self.run_once(stage, target_path).await;
            total_cost_ms += cost_ms;
            last = results;
            let attempt_failed = last.iter().any(|r| !r.passed);
            if !attempt_failed || attempt == stage.retries {
                break;
            }
            tracing::debug!(stage = %stage.name, attempt, "evaluator attempt failed, retrying");
        }
        for r in &mut last {
            r.cost_ms = total_cost_ms;
        }
        last
    }

    async fn run_once(&self, stage: &CascadeStageConfig, target_path: &Path) -> (Vec<EvalResult>, u64) {
        let timeout_dur = Duration::from_secs(stage.timeout_s);
        let start = Instant::now();

        let mut command = Command::new(&stage.command);
        command
            .args(&stage.args)
            .arg(target_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                let cost_ms = start.elapsed().as_millis() as u64;
                let err = CascadeError::Spawn(stage.command.display().to_string(), e);
                return (
                    vec![EvalResult {
                        metric: stage.name.clone(),
                        value: 0.0,
                        passed: false,
                        cost_ms,
                        error: Some(err.to_string()),
                    }],
                    cost_ms,
                );
            }
        };

        let pid = child.id();
        let output_fut = child.wait_with_output();

        match tokio::time::timeout(timeout_dur, output_fut).await {
            Ok(Ok(output)) => {
                let cost_ms = start.elapsed().as_millis() as u64;
                (self.parse_output(stage, &output), cost_ms)
            }
            Ok(Err(e)) => {
                let cost_ms = start.elapsed().as_millis() as u64;
                (
                    vec![EvalResult {
                        metric: stage.name.clone(),
                        value: 0.0,
                        passed: false,
                        cost_ms,
                        error: Some(format!("evaluator io error: {e}")),
                    }],
                    cost_ms,
                )
            }
            Err(_elapsed) => {
                kill_gracefully(pid).await;
                let cost_ms = timeout_dur.as_millis() as u64;
                (
                    vec![EvalResult {
                        metric: stage.name.clone(),
                        value: 0.0,
                        passed: false,
                        cost_ms,
                        error: Some("timeout".to_string()),
                    }],
                    cost_ms,
                )
            }
        }
    }

    fn parse_output(&self, stage: &CascadeStageConfig, output: &std::process::Output) -> Vec<EvalResult> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let short = stderr.lines().next().unwrap_or("non-zero exit").to_string();
            return vec![EvalResult {
                metric: stage.name.clone(),
                value: 0.0,
                passed: false,
                cost_ms: 0,
                error: Some(short),
            }];
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<HashMap<String, f64>>(&stdout) {
            Ok(metrics) if !metrics.is_empty() => metrics
                .into_iter()
                .map(|(metric, value)| {
                    let passed = self.metric_passed(&metric, value);
                    EvalResult {
                        metric,
                        value,
                        passed,
                        cost_ms: 0,
                        error: None,
                    }
                })
                .collect(),
            Ok(_) => vec![EvalResult {
                metric: stage.name.clone(),
                value: 0.0,
                passed: false,
                cost_ms: 0,
                error: Some("evaluator returned no metrics".to_string()),
            }],
            Err(e) => vec![EvalResult {
                metric: stage.name.clone(),
                value: 0.0,
                passed: false,
                cost_ms: 0,
                error: Some(format!("non-numeric evaluator output: {e}")),
            }],
        }
    }

    fn metric_passed(&self, metric: &str, value: f64) -> bool {
        match self.metrics.get(metric) {
            None => true,
            Some(MetricConfig {
                threshold: None, ..
            }) => true,
            Some(MetricConfig {
                direction,
                threshold: Some(t),
            }) => match direction {
                Direction::Maximize => value >= *t,
                Direction::Minimize => value <= *t,
            },
        }
    }
}

/// Graceful SIGTERM, then rely on `kill_on_drop` for the forceful follow-up
/// once the timed-out future is dropped (teacher's Linux sandbox signal
/// handling in `skilllite-sandbox`, generalized to a short grace window).
async fn kill_gracefully(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, command: &str, timeout_s: u64, retries: u32) -> CascadeStageConfig {
        CascadeStageConfig {
            name: name.to_string(),
            command: command.into(),
            args: vec![],
            timeout_s,
            retries,
        }
    }

    #[tokio::test]
    async fn successful_evaluator_emits_metric_rows() {
        let mut metrics = HashMap::new();
        metrics.insert(
            "correct".to_string(),
            MetricConfig {
                direction: Direction::Maximize,
                threshold: Some(0.5),
            },
        );
        // Emulate an evaluator entry point with `sh -c`.
        let mut stage0 = stage("correctness", "/bin/sh", 5, 0);
        stage0.args = vec!["-c".to_string(), "echo '{\"correct\": 1.0}'".to_string()];

        let cascade = EvaluatorCascade::new(vec![stage0], true, 2, metrics);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.py");
        std::fs::write(&path, "x = 1").unwrap();

        let results = cascade.run(&path).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metric, "correct");
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn evaluator_timeout_yields_cascade_failure_row() {
        let mut stage0 = stage("slow", "/bin/sleep", 1, 0);
        stage0.args = vec!["5".to_string()];
        let cascade = EvaluatorCascade::new(vec![stage0], true, 1, HashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.py");
        std::fs::write(&path, "x = 1").unwrap();

        let results = cascade.run(&path).await;
        assert!(results.iter().any(|r| r.error.as_deref() == Some("timeout")));
        assert!(results.iter().any(|r| r.metric == CASCADE_METRIC));
        assert!(results.iter().all(|r| !r.passed));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_without_metrics() {
        let mut stage0 = stage("broken", "/bin/sh", 5, 0);
        stage0.args = vec!["-c".to_string(), "exit 1".to_string()];
        let cascade = EvaluatorCascade::new(vec![stage0], false, 1, HashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.py");
        std::fs::write(&path, "x = 1").unwrap();

        let results = cascade.run(&path).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert!(results[0].error.is_some());
    }
}
