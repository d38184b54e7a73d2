//! Engine: orchestrates one generation as an atomic unit (spec §4.7),
//! grounded in the teacher's `skilllite-evolution::run_evolution`/
//! `run_evolution_inner` shape (snapshot scope up front, do the work, never
//! leave a half-written generation behind) and the Housaky DGM engine's
//! `evolve_generation` (per-slot timeout wrapping, concurrency bound via a
//! semaphore-like primitive).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use openevolve_archive::Archive;
use openevolve_cascade::EvaluatorCascade;
use openevolve_core::config::{Config, Direction};
use openevolve_core::error::EngineError;
use openevolve_core::types::{
    is_accepted, Candidate, Evaluation, MetaPrompt, CASCADE_METRIC, SLOT_METRIC,
};
use openevolve_core::Result;
use openevolve_metaprompt::MetaPromptPool;
use openevolve_patch::PatchEngine;
use openevolve_prompt::{Exemplar, PromptSampler};
use openevolve_store::Store;

use crate::llm::LlmClient;
use crate::run_dir;

/// Outcome of one slot: prompt → patch → evaluate (spec §4.7 step 1-6, §GLOSSARY
/// "Slot").
#[derive(Debug, Clone)]
pub struct SlotOutcome {
    pub cand_id: String,
    pub meta_prompt_id: String,
    pub accepted: bool,
    pub rejected_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub generation: u64,
    pub slots: Vec<SlotOutcome>,
}

struct EngineState {
    run_id: String,
    config: Config,
    llm: Arc<dyn LlmClient>,
    store: Store,
    patch_engine: PatchEngine,
    cascade: EvaluatorCascade,
    sampler: PromptSampler,
    target_path: PathBuf,
    runs_root: PathBuf,
    /// Serialises snapshot → apply → evaluate → commit/revert against the
    /// shared target file (spec §5 "Shared resources").
    file_lock: tokio::sync::Mutex<()>,
    /// Advisory lock preventing two `run_generation` calls on clones of the
    /// same `Engine` from racing the same run's generation counter, the same
    /// role the teacher's `try_start_evolution`/`finish_evolution` pair
    /// plays around its own evolution loop. The Store's single-writer
    /// discipline is the cross-process guarantee; this is the in-process one.
    generation_lock: tokio::sync::Mutex<()>,
    archive: tokio::sync::Mutex<Archive>,
    meta_pool: tokio::sync::Mutex<MetaPromptPool>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineState>,
}

/// `cand_id` is derived from `(run_id, slot)` rather than a random uuid:
/// spec §8 Testable Property 6 requires that a same-seed, same-run replay
/// produce identical Archive contents, and `Archive::sample`/`top_by_*` both
/// tie-break on `cand_id` — a random id would make every replay diverge at
/// the first insertion regardless of how deterministic the rest of the
/// pipeline is. A slot produces exactly one candidate, so `(generation,
/// slot_index)` is already unique within a run; the `run_id` prefix keeps
/// candidates unique across runs that share one physical store.
fn candidate_id(run_id: &str, slot: SlotId) -> String {
    match slot {
        SlotId::Seed => format!("{run_id}:seed"),
        SlotId::Generation(generation, slot_index) => {
            format!("{run_id}:g{generation}:s{slot_index}")
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotId {
    Seed,
    Generation(u64, usize),
}

fn metrics_map_from_evals(evals: &[Evaluation]) -> HashMap<String, f64> {
    evals
        .iter()
        .filter(|e| e.metric != CASCADE_METRIC && e.metric != SLOT_METRIC)
        .map(|e| (e.metric.clone(), e.value))
        .collect()
}

fn resolve_exemplars(store: &Store, ids: &[String]) -> Result<Vec<Exemplar>> {
    let mut out = Vec::new();
    for id in ids {
        if let Some(c) = store.get_candidate(id)? {
            out.push(Exemplar {
                cand_id: c.cand_id,
                code_snapshot: c.code_snapshot,
                created_at: c.created_at,
            });
        }
    }
    Ok(out)
}

impl Engine {
    /// Open a run for its first generation (creating it) or resume an
    /// existing one — the engine "refuses to re-create a run" (spec §4.7):
    /// when `run_id` already exists in the Store, state is rehydrated from
    /// persisted rows instead of reseeding.
    pub async fn bootstrap(
        run_id: impl Into<String>,
        config: Config,
        llm: Arc<dyn LlmClient>,
        store: Store,
        runs_root: PathBuf,
    ) -> Result<Engine> {
        let run_id = run_id.into();
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let target_path = config.task.workdir.join(&config.task.target_file);
        let directions: HashMap<String, Direction> = config
            .metrics
            .iter()
            .map(|(k, v)| (k.clone(), v.direction))
            .collect();

        let existing_run = store.get_run(&run_id)?;

        let (archive, meta_pool) = if existing_run.is_none() {
            let config_json =
                serde_json::to_string(&config).map_err(|e| EngineError::Config(e.to_string()))?;
            store.create_run(&run_id, &config_json)?;
            run_dir::write_config_snapshot(&runs_root, &run_id, &config_json);

            let now = Utc::now();
            let pool = MetaPromptPool::seed(&run_id, &config.meta_prompt, now);
            for m in pool.members() {
                store.insert_meta_prompt(m)?;
            }
            let seed_meta_prompt_id = pool
                .members()
                .first()
                .map(|m| m.meta_prompt_id.clone())
                .ok_or_else(|| EngineError::Config("meta-prompt pool seeded empty".to_string()))?;

            let seed_snapshot = std::fs::read_to_string(&target_path).map_err(|e| {
                EngineError::Config(format!(
                    "failed to read target file {}: {e}",
                    target_path.display()
                ))
            })?;
            let seed_candidate = Candidate {
                cand_id: candidate_id(&run_id, SlotId::Seed),
                run_id: run_id.clone(),
                parent_ids: Vec::new(),
                meta_prompt_id: seed_meta_prompt_id,
                filepath: config.task.target_file.to_string_lossy().to_string(),
                patch: String::new(),
                code_snapshot: seed_snapshot,
                generation: 0,
                novelty: 0.0,
                age: 0,
                created_at: now,
            };
            // The seed carries no evaluation rows: it is the task's given
            // starting point, not a produced candidate, so it never becomes
            // eligible for Archive membership (spec §3 invariant e).
            store.insert_candidate_with_evals(&seed_candidate, &[])?;

            let archive = Archive::new(
                config.archive.capacity,
                config.archive.k_novelty,
                config.archive.ageing_threshold,
                directions.clone(),
            );
            (archive, pool)
        } else {
            let mut archive = Archive::new(
                config.archive.capacity,
                config.archive.k_novelty,
                config.archive.ageing_threshold,
                directions.clone(),
            );
            for candidate in store.list_candidates(&run_id, None)? {
                let evals = store.list_evaluations(&candidate.cand_id)?;
                if is_accepted(&evals) {
                    archive.insert(
                        candidate.cand_id.clone(),
                        metrics_map_from_evals(&evals),
                        candidate.created_at,
                    );
                }
            }
            let members = store.list_meta_prompts(&run_id)?;
            let pool = MetaPromptPool::from_members(&run_id, &config.meta_prompt, members);
            (archive, pool)
        };

        let state = Arc::new(EngineState {
            run_id,
            cascade: EvaluatorCascade::new(
                config.cascade.stages.clone(),
                config.cascade.cancel_on_fail,
                config.cascade.max_parallel,
                config.metrics.clone(),
            ),
            patch_engine: PatchEngine::new(config.evolution.scope),
            sampler: PromptSampler::new(config.sampler.budget_tokens),
            target_path,
            runs_root,
            llm,
            store,
            file_lock: tokio::sync::Mutex::new(()),
            generation_lock: tokio::sync::Mutex::new(()),
            archive: tokio::sync::Mutex::new(archive),
            meta_pool: tokio::sync::Mutex::new(meta_pool),
            config,
        });

        Ok(Engine { inner: state })
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub async fn archive_len(&self) -> usize {
        self.inner.archive.lock().await.len()
    }

    pub async fn meta_pool_len(&self) -> usize {
        self.inner.meta_pool.lock().await.len()
    }

    /// Run one generation end to end (spec §4.7 steps 1-8). Slots proceed
    /// concurrently up to `population_size` (spec §5 "up to M slots proceed
    /// concurrently"); the generation only returns `Err` for a fatal error
    /// (`Store`/`PatchRevert`), in which case the Store holds no partial
    /// rows for the failed slot and the run remains resumable (spec §7).
    pub async fn run_generation(&self) -> Result<GenerationReport> {
        let state = Arc::clone(&self.inner);
        let _generation_guard = state.generation_lock.lock().await;
        let g = state.store.latest_generation(&state.run_id)?;
        let generation = g + 1;
        let now = Utc::now();

        let templates = {
            let mut pool = state.meta_pool.lock().await;
            if let Some(child) = pool.maybe_mutate(state.config.seed, generation, now) {
                state.store.insert_meta_prompt(&child)?;
            }
            let templates =
                pool.sample_for_generation(state.config.population_size, state.config.seed ^ generation, now);
            for t in &templates {
                state
                    .store
                    .update_meta_prompt_fitness(&t.meta_prompt_id, t.fitness, t.last_used)?;
            }
            templates
        };

        let mut join_set = tokio::task::JoinSet::new();
        for (slot_index, template) in templates.into_iter().enumerate() {
            let state = Arc::clone(&state);
            let slot_seed = state
                .config
                .seed
                .wrapping_mul(1_000_003)
                .wrapping_add(generation)
                .wrapping_add(slot_index as u64);
            join_set.spawn(async move { run_slot(state, generation, slot_index, template, slot_seed).await });
        }

        let mut slots = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => slots.push(outcome),
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(EngineError::Other(anyhow::anyhow!(
                        "slot task panicked: {join_err}"
                    )))
                }
            }
        }
        // Slot completion order is non-deterministic; persisted order is
        // stable-sorted by cand_id (spec §5 "Ordering guarantees").
        slots.sort_by(|a, b| a.cand_id.cmp(&b.cand_id));

        Ok(GenerationReport { generation, slots })
    }
}

async fn run_slot(
    state: Arc<EngineState>,
    generation: u64,
    slot_index: usize,
    template: MetaPrompt,
    seed_slot: u64,
) -> Result<SlotOutcome> {
    let sampler_cfg = state.config.sampler.clone();

    let (elite_ids, novel_ids) = {
        let archive = state.archive.lock().await;
        let elite_ids: Vec<String> = archive
            .top_by_rank(sampler_cfg.elites_k)
            .into_iter()
            .map(|m| m.cand_id.clone())
            .collect();
        let novel_ids: Vec<String> = archive
            .top_by_novelty(sampler_cfg.novel_m)
            .into_iter()
            .map(|m| m.cand_id.clone())
            .collect();
        (elite_ids, novel_ids)
    };
    let elite_exemplars = resolve_exemplars(&state.store, &elite_ids)?;
    let novel_exemplars = resolve_exemplars(&state.store, &novel_ids)?;
    let failure_exemplars = if sampler_cfg.include_failures {
        state
            .store
            .list_recent_failed_candidates(&state.run_id, sampler_cfg.fail_n)?
            .into_iter()
            .map(|c| Exemplar {
                cand_id: c.cand_id,
                code_snapshot: c.code_snapshot,
                created_at: c.created_at,
            })
            .collect()
    } else {
        Vec::new()
    };

    let current_code = std::fs::read_to_string(&state.target_path)
        .map_err(|e| EngineError::Config(format!("failed to read target file: {e}")))?;
    let task_description = format!(
        "File: {}\nEvolution scope: {:?}",
        state.config.task.target_file.display(),
        state.config.evolution.scope
    );

    let prompt = match state.sampler.assemble(
        &template.template,
        &task_description,
        &current_code,
        elite_exemplars,
        novel_exemplars,
        failure_exemplars,
    ) {
        Ok(p) => p,
        Err(e) => {
            let err: EngineError = e.into();
            return reject_slot(&state, generation, slot_index, &template, &current_code, "", err).await;
        }
    };

    let timeout_dur = Duration::from_millis(state.config.llm.timeout_ms);
    let response = match tokio::time::timeout(timeout_dur, state.llm.complete(&prompt)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            let err = EngineError::Llm(e.to_string());
            return reject_slot(&state, generation, slot_index, &template, &current_code, "", err).await;
        }
        Err(_elapsed) => {
            let err = EngineError::LlmTimeout(state.config.llm.timeout_ms);
            return reject_slot(&state, generation, slot_index, &template, &current_code, "", err).await;
        }
    };

    // snapshot → apply → evaluate → commit/revert, serialised on the
    // run-scoped file lock (spec §5).
    let guard = state.file_lock.lock().await;
    let applied = match state.patch_engine.apply_to_file(&state.target_path, &response) {
        Ok(a) => a,
        Err(e) => {
            drop(guard);
            let err: EngineError = e.into();
            return reject_slot(&state, generation, slot_index, &template, &current_code, &response, err).await;
        }
    };

    let eval_results = state.cascade.run(&state.target_path).await;
    let now = Utc::now();
    let cand_id = candidate_id(&state.run_id, SlotId::Generation(generation, slot_index));
    let evaluations: Vec<Evaluation> = eval_results
        .iter()
        .map(|r| Evaluation {
            eval_id: 0,
            cand_id: cand_id.clone(),
            metric: r.metric.clone(),
            value: r.value,
            passed: r.passed,
            cost_ms: r.cost_ms,
            error: r.error.clone(),
            created_at: now,
        })
        .collect();
    let accepted = is_accepted(&evaluations);

    if !accepted && state.config.evolution.apply_safe_revert {
        PatchEngine::revert_file(&state.target_path, &applied.original)
            .map_err(|e| -> EngineError { e.into() })?;
    }
    drop(guard);

    let snapshot = if accepted || !state.config.evolution.apply_safe_revert {
        applied.new_content.clone()
    } else {
        applied.original.clone()
    };

    let parent_ids = {
        let archive = state.archive.lock().await;
        let sel = &state.config.selection;
        archive.sample(sel.elite, sel.novel, sel.young, seed_slot)
    };

    let candidate = Candidate {
        cand_id: cand_id.clone(),
        run_id: state.run_id.clone(),
        parent_ids,
        meta_prompt_id: template.meta_prompt_id.clone(),
        filepath: state.config.task.target_file.to_string_lossy().to_string(),
        patch: response.clone(),
        code_snapshot: snapshot.clone(),
        generation,
        novelty: 0.0,
        age: 0,
        created_at: now,
    };
    state
        .store
        .insert_candidate_with_evals(&candidate, &evaluations)
        .map_err(|e| -> EngineError { e.into() })?;

    let rank_at_insertion = if accepted {
        let metrics_map = metrics_map_from_evals(&evaluations);
        let mut archive = state.archive.lock().await;
        archive.insert(cand_id.clone(), metrics_map, now);
        archive
            .members()
            .iter()
            .find(|m| m.cand_id == cand_id)
            .map(|m| m.rank)
    } else {
        None
    };

    {
        let mut pool = state.meta_pool.lock().await;
        pool.record_outcome(&template.meta_prompt_id, rank_at_insertion);
        if let Some(m) = pool
            .members()
            .iter()
            .find(|m| m.meta_prompt_id == template.meta_prompt_id)
        {
            let _ = state
                .store
                .update_meta_prompt_fitness(&m.meta_prompt_id, m.fitness, m.last_used);
        }
    }

    run_dir::write_slot_mirror(
        &state.runs_root,
        &state.run_id,
        generation,
        slot_index,
        &prompt,
        &response,
        &snapshot,
        serde_json::json!({
            "accepted": accepted,
            "evaluations": evaluations.iter().map(|e| serde_json::json!({
                "metric": e.metric, "value": e.value, "passed": e.passed,
            })).collect::<Vec<_>>(),
        }),
    );
    run_dir::slot_event(
        &state.runs_root,
        &state.run_id,
        generation,
        slot_index,
        &cand_id,
        if accepted { "accepted" } else { "rejected" },
        None,
    );

    Ok(SlotOutcome {
        cand_id,
        meta_prompt_id: template.meta_prompt_id,
        accepted,
        rejected_reason: None,
    })
}

/// Record a slot that never reached (or never passed) the cascade — a
/// `PromptTooLarge`, patch apply failure, or LLM error/timeout — as a
/// rejected candidate (spec §7 "Rejected candidates appear in inspection
/// with a short error tag"). Fatal errors are propagated unchanged to abort
/// the generation.
async fn reject_slot(
    state: &Arc<EngineState>,
    generation: u64,
    slot_index: usize,
    template: &MetaPrompt,
    code_snapshot: &str,
    patch_text: &str,
    err: EngineError,
) -> Result<SlotOutcome> {
    if err.is_fatal() {
        return Err(err);
    }

    let now = Utc::now();
    let cand_id = candidate_id(&state.run_id, SlotId::Generation(generation, slot_index));
    let tag = err.tag();
    let evaluations = vec![Evaluation {
        eval_id: 0,
        cand_id: cand_id.clone(),
        metric: SLOT_METRIC.to_string(),
        value: 0.0,
        passed: false,
        cost_ms: 0,
        error: Some(err.to_string()),
        created_at: now,
    }];
    let candidate = Candidate {
        cand_id: cand_id.clone(),
        run_id: state.run_id.clone(),
        parent_ids: Vec::new(),
        meta_prompt_id: template.meta_prompt_id.clone(),
        filepath: state.config.task.target_file.to_string_lossy().to_string(),
        patch: patch_text.to_string(),
        code_snapshot: code_snapshot.to_string(),
        generation,
        novelty: 0.0,
        age: 0,
        created_at: now,
    };
    state
        .store
        .insert_candidate_with_evals(&candidate, &evaluations)
        .map_err(|e| -> EngineError { e.into() })?;

    {
        let mut pool = state.meta_pool.lock().await;
        pool.record_outcome(&template.meta_prompt_id, None);
        if let Some(m) = pool
            .members()
            .iter()
            .find(|m| m.meta_prompt_id == template.meta_prompt_id)
        {
            let _ = state
                .store
                .update_meta_prompt_fitness(&m.meta_prompt_id, m.fitness, m.last_used);
        }
    }

    run_dir::write_slot_mirror(
        &state.runs_root,
        &state.run_id,
        generation,
        slot_index,
        "",
        patch_text,
        code_snapshot,
        serde_json::json!({"accepted": false, "error": err.to_string(), "tag": tag}),
    );
    run_dir::slot_event(
        &state.runs_root,
        &state.run_id,
        generation,
        slot_index,
        &cand_id,
        "rejected",
        Some(&err.to_string()),
    );

    Ok(SlotOutcome {
        cand_id,
        meta_prompt_id: template.meta_prompt_id.clone(),
        accepted: false,
        rejected_reason: Some(tag.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use openevolve_core::config::{
        ArchiveConfig, CascadeConfig, CascadeStageConfig, EvolutionConfig, EvolutionScope,
        LlmConfig, MetaPromptConfig, MetricConfig, SamplerConfig, SelectionConfig, TaskConfig,
    };
    use openevolve_core::types::Direction;
    use crate::llm::EchoLlmClient;

    fn base_config(workdir: &std::path::Path, target_file: &str) -> Config {
        let mut metrics = HashMap::new();
        metrics.insert(
            "correct".to_string(),
            MetricConfig {
                direction: Direction::Maximize,
                threshold: Some(0.5),
            },
        );
        Config {
            task: TaskConfig {
                workdir: workdir.to_path_buf(),
                target_file: target_file.into(),
            },
            population_size: 1,
            generations: 1,
            metrics,
            selection: SelectionConfig::default(),
            sampler: SamplerConfig {
                budget_tokens: 10_000,
                elites_k: 2,
                novel_m: 2,
                include_failures: false,
                fail_n: 1,
            },
            evolution: EvolutionConfig {
                scope: EvolutionScope::Blocks,
                apply_safe_revert: true,
            },
            cascade: CascadeConfig {
                max_parallel: 2,
                cancel_on_fail: true,
                stages: vec![CascadeStageConfig {
                    name: "correctness".to_string(),
                    command: "/bin/sh".into(),
                    args: vec!["-c".to_string(), "echo '{\"correct\": 1.0}'".to_string()],
                    timeout_s: 5,
                    retries: 0,
                }],
            },
            meta_prompt: MetaPromptConfig {
                population: 4,
                mutation_prob: 0.0,
                selection_top_k: 2,
            },
            archive: ArchiveConfig {
                capacity: 10,
                k_novelty: 2,
                ageing_threshold: 100,
            },
            llm: LlmConfig {
                mode: "echo".to_string(),
                model: "test".to_string(),
                temperature: 0.0,
                endpoint: None,
                timeout_ms: 5_000,
            },
            seed: 7,
        }
    }

    #[tokio::test]
    async fn seed_round_trip_accepts_a_noop_patch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("target.py"),
            "# EVOLVE-BLOCK-START sum\nreturn sum(v*v for v in values)\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();

        let config = base_config(dir.path(), "target.py");
        let llm = Arc::new(EchoLlmClient::new(r#"{"diffs": []}"#));
        let store = Store::open_in_memory().unwrap();
        let engine = Engine::bootstrap("run1", config, llm, store, dir.path().join("runs"))
            .await
            .unwrap();

        let report = engine.run_generation().await.unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.slots.len(), 1);
        assert!(report.slots[0].accepted);
        assert_eq!(engine.archive_len().await, 1);
    }

    #[tokio::test]
    async fn ambiguous_search_rejects_and_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("target.py");
        std::fs::write(
            &target_path,
            "# EVOLVE-BLOCK-START b\nx = 1\nx = 1\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();
        let original = std::fs::read_to_string(&target_path).unwrap();

        let config = base_config(dir.path(), "target.py");
        let patch = r#"{"diffs": [{"block": "b", "search": "x = 1", "replace": "x = 2"}]}"#;
        let llm = Arc::new(EchoLlmClient::new(patch));
        let store = Store::open_in_memory().unwrap();
        let engine = Engine::bootstrap("run1", config, llm, store, dir.path().join("runs"))
            .await
            .unwrap();

        let report = engine.run_generation().await.unwrap();
        assert_eq!(report.slots.len(), 1);
        assert!(!report.slots[0].accepted);
        assert_eq!(
            report.slots[0].rejected_reason.as_deref(),
            Some("patch_apply_error")
        );
        assert_eq!(std::fs::read_to_string(&target_path).unwrap(), original);
        assert_eq!(engine.archive_len().await, 0);
    }

    #[tokio::test]
    async fn resume_continues_from_latest_generation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("target.py"),
            "# EVOLVE-BLOCK-START sum\nreturn sum(v*v for v in values)\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();

        let store = Store::open_in_memory().unwrap();
        let config = base_config(dir.path(), "target.py");
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlmClient::new(r#"{"diffs": []}"#));

        {
            let engine = Engine::bootstrap(
                "run1",
                config.clone(),
                Arc::clone(&llm),
                store.clone(),
                dir.path().join("runs"),
            )
            .await
            .unwrap();
            let report = engine.run_generation().await.unwrap();
            assert_eq!(report.generation, 1);
        }

        let resumed = Engine::bootstrap("run1", config, llm, store, dir.path().join("runs"))
            .await
            .unwrap();
        assert_eq!(resumed.archive_len().await, 1);
        let report = resumed.run_generation().await.unwrap();
        assert_eq!(report.generation, 2);
    }

    #[tokio::test]
    async fn concurrent_run_generation_calls_never_duplicate_a_generation_number() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("target.py"),
            "# EVOLVE-BLOCK-START sum\nreturn sum(v*v for v in values)\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();

        let store = Store::open_in_memory().unwrap();
        let config = base_config(dir.path(), "target.py");
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlmClient::new(r#"{"diffs": []}"#));
        let engine = Engine::bootstrap("run1", config, llm, store, dir.path().join("runs"))
            .await
            .unwrap();

        let a = engine.clone();
        let b = engine.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.run_generation().await }),
            tokio::spawn(async move { b.run_generation().await }),
        );
        let mut gens = vec![ra.unwrap().unwrap().generation, rb.unwrap().unwrap().generation];
        gens.sort();
        assert_eq!(gens, vec![1, 2]);
    }

    /// Spec §8 Testable Property 6: same seed, same run, replayed against two
    /// independent stores, must produce identical candidate ids — not just
    /// identical metrics — since `Archive::sample`/`top_by_*` tie-break on
    /// `cand_id` and `parent_ids` reference it too.
    #[tokio::test]
    async fn same_run_id_and_seed_yields_identical_candidate_ids_across_independent_engines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("target.py"),
            "# EVOLVE-BLOCK-START sum\nreturn sum(v*v for v in values)\n# EVOLVE-BLOCK-END\n",
        )
        .unwrap();

        let config = base_config(dir.path(), "target.py");
        let llm_a: Arc<dyn LlmClient> = Arc::new(EchoLlmClient::new(r#"{"diffs": []}"#));
        let llm_b: Arc<dyn LlmClient> = Arc::new(EchoLlmClient::new(r#"{"diffs": []}"#));

        let engine_a = Engine::bootstrap(
            "run1",
            config.clone(),
            llm_a,
            Store::open_in_memory().unwrap(),
            dir.path().join("runs-a"),
        )
        .await
        .unwrap();
        let engine_b = Engine::bootstrap(
            "run1",
            config,
            llm_b,
            Store::open_in_memory().unwrap(),
            dir.path().join("runs-b"),
        )
        .await
        .unwrap();

        let report_a = engine_a.run_generation().await.unwrap();
        let report_b = engine_b.run_generation().await.unwrap();
        let ids_a: Vec<&str> = report_a.slots.iter().map(|s| s.cand_id.as_str()).collect();
        let ids_b: Vec<&str> = report_b.slots.iter().map(|s| s.cand_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
