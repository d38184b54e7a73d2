//! Run directory mirror files (spec §6 "Persisted state layout"): advisory,
//! human-inspectable copies of what the Store already holds durably. Lost
//! mirror files never affect correctness — only resumability via the Store
//! does — so every write here is best-effort, matching the teacher's
//! `log_evolution_event` dual-write (SQL row + JSONL append) where the JSONL
//! side is allowed to fail without aborting the caller.

use std::path::{Path, PathBuf};

use serde_json::json;

pub fn run_dir(runs_root: &Path, run_id: &str) -> PathBuf {
    runs_root.join(run_id)
}

pub fn gen_dir(runs_root: &Path, run_id: &str, generation: u64) -> PathBuf {
    run_dir(runs_root, run_id).join(format!("gen_{generation}"))
}

/// Write the frozen config snapshot once, at run creation.
pub fn write_config_snapshot(runs_root: &Path, run_id: &str, config_json: &str) {
    let dir = run_dir(runs_root, run_id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %e, dir = %dir.display(), "failed to create run directory");
        return;
    }
    if let Err(e) = std::fs::write(dir.join("config.json"), config_json) {
        tracing::warn!(error = %e, "failed to write config.json mirror");
    }
}

/// Mirror one slot's prompt, returned patch text, post-apply snapshot, and a
/// JSON summary of evaluator outputs into `gen_<N>/slot_<i>/`.
pub fn write_slot_mirror(
    runs_root: &Path,
    run_id: &str,
    generation: u64,
    slot_index: usize,
    prompt: &str,
    patch_text: &str,
    snapshot: &str,
    summary: serde_json::Value,
) {
    let dir = gen_dir(runs_root, run_id, generation).join(format!("slot_{slot_index}"));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %e, dir = %dir.display(), "failed to create slot mirror directory");
        return;
    }
    let writes = [
        ("prompt.txt", prompt.to_string()),
        ("patch.txt", patch_text.to_string()),
        ("snapshot.txt", snapshot.to_string()),
        (
            "summary.json",
            serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string()),
        ),
    ];
    for (name, content) in writes {
        if let Err(e) = std::fs::write(dir.join(name), content) {
            tracing::warn!(error = %e, file = name, "failed to write slot mirror file");
        }
    }
}

/// Append one structured event to `runs/<run_id>/events.jsonl`.
pub fn emit_event(runs_root: &Path, run_id: &str, event_type: &str, fields: serde_json::Value) {
    openevolve_core::observability::emit_event(&run_dir(runs_root, run_id), event_type, fields);
}

pub fn slot_event(
    runs_root: &Path,
    run_id: &str,
    generation: u64,
    slot_index: usize,
    cand_id: &str,
    outcome: &str,
    error: Option<&str>,
) {
    emit_event(
        runs_root,
        run_id,
        "slot_completed",
        json!({
            "generation": generation,
            "slot": slot_index,
            "cand_id": cand_id,
            "outcome": outcome,
            "error": error,
        }),
    );
}
