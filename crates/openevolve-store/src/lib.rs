//! The Store: a single embedded database holding runs, candidates,
//! evaluations, and meta-prompts (spec §4.1), backed by `rusqlite` the same
//! way the teacher's `skilllite-evolution::feedback` module opens and
//! migrates its database — `PRAGMA journal_mode=WAL`, `execute_batch` for
//! `CREATE TABLE IF NOT EXISTS`.

pub mod error;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use openevolve_core::types::{Candidate, Evaluation, MetaPrompt, Run};

pub use error::{Result, StoreError};

/// Handle to the database. Cheaply `Clone`-able; every clone shares the same
/// underlying connection behind a mutex (the teacher's `SQLiteManager`
/// pattern in `oldnordic-odincode/databases::sqlite`), since rusqlite
/// connections are not `Sync`.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

fn join_ids(ids: &[String]) -> String {
    ids.join(",")
}

fn split_ids(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(|p| p.to_string()).collect()
    }
}

impl Store {
    /// Open (creating if absent) the database file at `path` and ensure the
    /// schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL is a no-op (silently ignored) on `:memory:` connections.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id      TEXT PRIMARY KEY,
                started_at  TEXT NOT NULL,
                config_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS candidates (
                cand_id       TEXT PRIMARY KEY,
                run_id        TEXT NOT NULL REFERENCES runs(run_id),
                parent_ids    TEXT NOT NULL DEFAULT '',
                meta_prompt_id TEXT NOT NULL,
                filepath      TEXT NOT NULL,
                patch         TEXT NOT NULL,
                code_snapshot TEXT NOT NULL,
                gen           INTEGER NOT NULL,
                novelty       REAL NOT NULL DEFAULT 0,
                age           INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evaluations (
                eval_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                cand_id    TEXT NOT NULL REFERENCES candidates(cand_id),
                metric     TEXT NOT NULL,
                value      REAL NOT NULL,
                passed     INTEGER NOT NULL,
                cost_ms    INTEGER NOT NULL,
                error      TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta_prompts (
                meta_prompt_id TEXT PRIMARY KEY,
                template       TEXT NOT NULL,
                parent_ids     TEXT NOT NULL DEFAULT '',
                created_at     TEXT NOT NULL,
                last_used      TEXT NOT NULL,
                fitness        REAL NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_candidates_run_gen ON candidates(run_id, gen);
            CREATE INDEX IF NOT EXISTS idx_evaluations_cand ON evaluations(cand_id);
            CREATE INDEX IF NOT EXISTS idx_meta_prompts_fitness ON meta_prompts(fitness);
            "#,
        )?;
        Ok(())
    }

    pub fn create_run(&self, run_id: &str, config_json: &str) -> Result<Run> {
        let started_at = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (run_id, started_at, config_json) VALUES (?1, ?2, ?3)",
            params![run_id, started_at.to_rfc3339(), config_json],
        )?;
        Ok(Run {
            run_id: run_id.to_string(),
            started_at,
            config_json: config_json.to_string(),
        })
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT run_id, started_at, config_json FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                let started_at: String = row.get(1)?;
                Ok(Run {
                    run_id: row.get(0)?,
                    started_at: started_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                    config_json: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Insert a candidate and all of its evaluation rows as one transaction
    /// (spec §4.1: "resumption never observes a candidate with a missing
    /// metric").
    pub fn insert_candidate_with_evals(
        &self,
        candidate: &Candidate,
        evals: &[Evaluation],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let txn = conn.transaction()?;
        txn.execute(
            "INSERT INTO candidates (cand_id, run_id, parent_ids, meta_prompt_id, filepath,
             patch, code_snapshot, gen, novelty, age, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                candidate.cand_id,
                candidate.run_id,
                join_ids(&candidate.parent_ids),
                candidate.meta_prompt_id,
                candidate.filepath,
                candidate.patch,
                candidate.code_snapshot,
                candidate.generation as i64,
                candidate.novelty,
                candidate.age as i64,
                candidate.created_at.to_rfc3339(),
            ],
        )?;
        {
            let mut stmt = txn.prepare(
                "INSERT INTO evaluations (cand_id, metric, value, passed, cost_ms, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in evals {
                stmt.execute(params![
                    e.cand_id,
                    e.metric,
                    e.value,
                    e.passed,
                    e.cost_ms as i64,
                    e.error,
                    e.created_at.to_rfc3339(),
                ])?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
        let parent_ids: String = row.get(2)?;
        let created_at: String = row.get(10)?;
        Ok(Candidate {
            cand_id: row.get(0)?,
            run_id: row.get(1)?,
            parent_ids: split_ids(&parent_ids),
            meta_prompt_id: row.get(3)?,
            filepath: row.get(4)?,
            patch: row.get(5)?,
            code_snapshot: row.get(6)?,
            generation: row.get::<_, i64>(7)? as u64,
            novelty: row.get(8)?,
            age: row.get::<_, i64>(9)? as u64,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// List candidates for a run, optionally filtered to one generation.
    /// Deterministic order: `created_at` then `cand_id` (spec §4.1).
    pub fn list_candidates(&self, run_id: &str, gen: Option<u64>) -> Result<Vec<Candidate>> {
        let conn = self.conn.lock().unwrap();
        let mut candidates = Vec::new();
        if let Some(g) = gen {
            let mut stmt = conn.prepare(
                "SELECT cand_id, run_id, parent_ids, meta_prompt_id, filepath, patch,
                 code_snapshot, gen, novelty, age, created_at
                 FROM candidates WHERE run_id = ?1 AND gen = ?2
                 ORDER BY created_at, cand_id",
            )?;
            let rows = stmt.query_map(params![run_id, g as i64], Self::row_to_candidate)?;
            for r in rows {
                candidates.push(r?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT cand_id, run_id, parent_ids, meta_prompt_id, filepath, patch,
                 code_snapshot, gen, novelty, age, created_at
                 FROM candidates WHERE run_id = ?1
                 ORDER BY created_at, cand_id",
            )?;
            let rows = stmt.query_map(params![run_id], Self::row_to_candidate)?;
            for r in rows {
                candidates.push(r?);
            }
        }
        Ok(candidates)
    }

    /// Fetch a single candidate by id, if it exists.
    pub fn get_candidate(&self, cand_id: &str) -> Result<Option<Candidate>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT cand_id, run_id, parent_ids, meta_prompt_id, filepath, patch,
             code_snapshot, gen, novelty, age, created_at
             FROM candidates WHERE cand_id = ?1",
            params![cand_id],
            Self::row_to_candidate,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Most recent candidates in `run_id` that have at least one failed
    /// evaluation row, newest first, for the PromptSampler's failure pool
    /// (spec §4.3).
    pub fn list_recent_failed_candidates(&self, run_id: &str, limit: usize) -> Result<Vec<Candidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.cand_id, c.run_id, c.parent_ids, c.meta_prompt_id, c.filepath, c.patch,
             c.code_snapshot, c.gen, c.novelty, c.age, c.created_at
             FROM candidates c
             WHERE c.run_id = ?1
               AND EXISTS (SELECT 1 FROM evaluations e WHERE e.cand_id = c.cand_id AND e.passed = 0)
             ORDER BY c.created_at DESC, c.cand_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run_id, limit as i64], Self::row_to_candidate)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn list_evaluations(&self, cand_id: &str) -> Result<Vec<Evaluation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT eval_id, cand_id, metric, value, passed, cost_ms, error, created_at
             FROM evaluations WHERE cand_id = ?1 ORDER BY eval_id",
        )?;
        let rows = stmt.query_map(params![cand_id], |row| {
            let created_at: String = row.get(7)?;
            Ok(Evaluation {
                eval_id: row.get(0)?,
                cand_id: row.get(1)?,
                metric: row.get(2)?,
                value: row.get(3)?,
                passed: row.get(4)?,
                cost_ms: row.get::<_, i64>(5)? as u64,
                error: row.get(6)?,
                created_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Highest persisted generation for a run, or 0 if none exist yet
    /// (spec §4.7: resume continues from `latest_generation + 1`).
    pub fn latest_generation(&self, run_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let gen: Option<i64> = conn
            .query_row(
                "SELECT MAX(gen) FROM candidates WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(gen.unwrap_or(0) as u64)
    }

    pub fn insert_meta_prompt(&self, mp: &MetaPrompt) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meta_prompts (meta_prompt_id, template, parent_ids, created_at,
             last_used, fitness) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                mp.meta_prompt_id,
                mp.template,
                join_ids(&mp.parent_ids),
                mp.created_at.to_rfc3339(),
                mp.last_used.to_rfc3339(),
                mp.fitness,
            ],
        )?;
        Ok(())
    }

    pub fn update_meta_prompt_fitness(
        &self,
        meta_prompt_id: &str,
        fitness: f64,
        last_used: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE meta_prompts SET fitness = ?1, last_used = ?2 WHERE meta_prompt_id = ?3",
            params![fitness, last_used.to_rfc3339(), meta_prompt_id],
        )?;
        if changed == 0 {
            return Err(StoreError::Integrity(format!(
                "update_meta_prompt_fitness: no such meta_prompt_id {meta_prompt_id}"
            )));
        }
        Ok(())
    }

    pub fn list_meta_prompts(&self, _run_id: &str) -> Result<Vec<MetaPrompt>> {
        // meta_prompts are not run-scoped in the schema (a run always owns
        // exactly one pool in this implementation); the run_id parameter is
        // accepted to match the spec's operation signature and to leave room
        // for multi-run pools without a schema migration.
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT meta_prompt_id, template, parent_ids, created_at, last_used, fitness
             FROM meta_prompts ORDER BY created_at, meta_prompt_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let parent_ids: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            let last_used: String = row.get(4)?;
            Ok(MetaPrompt {
                meta_prompt_id: row.get(0)?,
                template: row.get(1)?,
                parent_ids: split_ids(&parent_ids),
                created_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                last_used: last_used
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                fitness: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openevolve_core::types::CASCADE_METRIC;

    fn candidate(cand_id: &str, run_id: &str, gen: u64) -> Candidate {
        Candidate {
            cand_id: cand_id.to_string(),
            run_id: run_id.to_string(),
            parent_ids: vec![],
            meta_prompt_id: "mp0".to_string(),
            filepath: "target.py".to_string(),
            patch: "{}".to_string(),
            code_snapshot: "print(1)".to_string(),
            generation: gen,
            novelty: 0.0,
            age: 0,
            created_at: Utc::now(),
        }
    }

    fn eval(cand_id: &str, passed: bool) -> Evaluation {
        Evaluation {
            eval_id: 0,
            cand_id: cand_id.to_string(),
            metric: "correct".to_string(),
            value: 1.0,
            passed,
            cost_ms: 5,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transactional_insert_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        let cand = candidate("c1", "r1", 1);
        store
            .insert_candidate_with_evals(&cand, &[eval("c1", true)])
            .unwrap();

        let candidates = store.list_candidates("r1", None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].cand_id, "c1");

        let evals = store.list_evaluations("c1").unwrap();
        assert_eq!(evals.len(), 1);
        assert!(evals[0].passed);
    }

    #[test]
    fn latest_generation_tracks_insertions() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        assert_eq!(store.latest_generation("r1").unwrap(), 0);

        store
            .insert_candidate_with_evals(&candidate("c1", "r1", 1), &[eval("c1", true)])
            .unwrap();
        assert_eq!(store.latest_generation("r1").unwrap(), 1);

        store
            .insert_candidate_with_evals(&candidate("c2", "r1", 2), &[eval("c2", false)])
            .unwrap();
        assert_eq!(store.latest_generation("r1").unwrap(), 2);
    }

    #[test]
    fn cascade_failure_is_a_synthetic_metric_row() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        let mut failing = eval("c1", false);
        failing.metric = CASCADE_METRIC.to_string();
        failing.error = Some("timeout".to_string());
        store
            .insert_candidate_with_evals(&candidate("c1", "r1", 1), &[failing])
            .unwrap();

        let evals = store.list_evaluations("c1").unwrap();
        assert_eq!(evals[0].metric, CASCADE_METRIC);
        assert_eq!(evals[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn meta_prompt_fitness_update_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        let now = Utc::now();
        store
            .insert_meta_prompt(&MetaPrompt {
                meta_prompt_id: "mp0".to_string(),
                template: "Improve the function.".to_string(),
                parent_ids: vec![],
                created_at: now,
                last_used: now,
                fitness: 0.0,
            })
            .unwrap();

        store.update_meta_prompt_fitness("mp0", 0.42, now).unwrap();
        let prompts = store.list_meta_prompts("r1").unwrap();
        assert_eq!(prompts.len(), 1);
        assert!((prompts[0].fitness - 0.42).abs() < 1e-9);
    }

    #[test]
    fn get_candidate_round_trips_and_missing_returns_none() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        store
            .insert_candidate_with_evals(&candidate("c1", "r1", 1), &[eval("c1", true)])
            .unwrap();

        assert_eq!(store.get_candidate("c1").unwrap().unwrap().cand_id, "c1");
        assert!(store.get_candidate("missing").unwrap().is_none());
    }

    #[test]
    fn list_recent_failed_candidates_excludes_fully_passing_rows() {
        let store = Store::open_in_memory().unwrap();
        store.create_run("r1", "{}").unwrap();
        store
            .insert_candidate_with_evals(&candidate("pass", "r1", 1), &[eval("pass", true)])
            .unwrap();
        store
            .insert_candidate_with_evals(&candidate("fail", "r1", 1), &[eval("fail", false)])
            .unwrap();

        let failed = store.list_recent_failed_candidates("r1", 10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].cand_id, "fail");
    }

    #[test]
    fn resume_reads_highest_generation_across_process_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        {
            let store = Store::open(&db_path).unwrap();
            store.create_run("r1", "{}").unwrap();
            store
                .insert_candidate_with_evals(&candidate("c1", "r1", 1), &[eval("c1", true)])
                .unwrap();
            store
                .insert_candidate_with_evals(&candidate("c2", "r1", 2), &[eval("c2", true)])
                .unwrap();
        }
        let reopened = Store::open(&db_path).unwrap();
        assert_eq!(reopened.latest_generation("r1").unwrap(), 2);
    }
}
