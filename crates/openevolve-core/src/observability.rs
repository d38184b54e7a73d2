//! Tracing init and the append-only JSONL event sink (spec §6 "Persisted
//! state layout": `runs/<run_id>/events.jsonl`).
//!
//! Log level: `OPENEVOLVE_LOG_LEVEL` (default `openevolve=info`).
//! JSON formatting: `OPENEVOLVE_LOG_JSON=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call once at process startup.
pub fn init_tracing() {
    let level =
        std::env::var("OPENEVOLVE_LOG_LEVEL").unwrap_or_else(|_| "openevolve=info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = std::env::var("OPENEVOLVE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
}

/// Append one structured event record to `<run_dir>/events.jsonl`.
///
/// A write failure is logged but never propagated: the event log is an
/// advisory mirror of the Store (spec §6), not the source of truth.
pub fn emit_event(run_dir: &Path, event_type: &str, fields: serde_json::Value) {
    let mut record = json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "event": event_type,
    });
    if let (Some(obj), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }

    if let Err(e) = std::fs::create_dir_all(run_dir) {
        tracing::warn!(error = %e, dir = %run_dir.display(), "failed to create run directory for event log");
        return;
    }
    let path = run_dir.join("events.jsonl");
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut f) => {
            if let Ok(line) = serde_json::to_string(&record) {
                if let Err(e) = writeln!(f, "{line}") {
                    tracing::warn!(error = %e, "failed to append event log line");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to open event log"),
    }
}
