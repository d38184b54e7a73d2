//! PromptSampler: assembles a single long-context prompt under a token
//! budget from a meta-prompt template, the current task code, and exemplar
//! pools drawn from the Archive (spec §4.3).
//!
//! Token counting is approximate (bytes/4, rounded up) per spec; this is not
//! a tokenizer, just a cheap proxy that keeps assembly deterministic and
//! dependency-free.

pub mod error;

use chrono::{DateTime, Utc};

pub use error::{PromptError, Result};

/// One candidate offered to the sampler as an exemplar. Carries only what
/// the prompt needs to render it; the caller (Engine) resolves the full
/// `Candidate` row from the Store or Archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exemplar {
    pub cand_id: String,
    pub code_snapshot: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExemplarKind {
    Elite,
    Novel,
    Failure,
}

impl ExemplarKind {
    fn label(self) -> &'static str {
        match self {
            ExemplarKind::Elite => "elite",
            ExemplarKind::Novel => "novel",
            ExemplarKind::Failure => "failure",
        }
    }
}

fn approx_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Sort exemplars into a deterministic order: newest `created_at` first (so
/// that when the round-robin below runs out of budget, the candidates
/// dropped are the oldest — spec §4.3 "Exemplars are truncated
/// oldest-first"), ties broken by `cand_id`.
fn order_exemplars(mut items: Vec<Exemplar>) -> Vec<Exemplar> {
    items.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(a.cand_id.cmp(&b.cand_id))
    });
    items
}

fn render_exemplar(kind: ExemplarKind, ex: &Exemplar) -> String {
    format!(
        "--- {} exemplar ({}) ---\n{}\n",
        kind.label(),
        ex.cand_id,
        ex.code_snapshot
    )
}

#[derive(Clone, Copy)]
pub struct PromptSampler {
    budget_tokens: usize,
}

impl PromptSampler {
    pub fn new(budget_tokens: usize) -> Self {
        Self { budget_tokens }
    }

    /// Assemble the prompt. `elites`, `novel`, and `failures` need not be
    /// pre-sorted; the sampler imposes its own deterministic ordering.
    pub fn assemble(
        &self,
        meta_prompt_template: &str,
        task_description: &str,
        current_code: &str,
        elites: Vec<Exemplar>,
        novel: Vec<Exemplar>,
        failures: Vec<Exemplar>,
    ) -> Result<String> {
        if meta_prompt_template.trim().is_empty() {
            tracing::warn!("meta-prompt template is empty; prompt will carry no instructions");
        }

        let mut sections = Vec::new();
        sections.push(format!("# Instructions\n{meta_prompt_template}\n"));
        sections.push(format!("# Task\n{task_description}\n"));

        let current_code_section = format!("# Current code\n{current_code}\n");
        let current_tokens = approx_tokens(&current_code_section);
        if current_tokens > self.budget_tokens {
            return Err(PromptError::TooLarge {
                current_tokens,
                budget_tokens: self.budget_tokens,
            });
        }
        sections.push(current_code_section);

        let mut used_tokens: usize = sections.iter().map(|s| approx_tokens(s)).sum();

        let elites = order_exemplars(elites);
        let novel = order_exemplars(novel);
        let failures = order_exemplars(failures);
        let rounds = elites.len().max(novel.len()).max(failures.len());

        let total_exemplars = elites.len() + novel.len() + failures.len();
        let mut included = 0usize;
        'rounds: for i in 0..rounds {
            for (kind, pool) in [
                (ExemplarKind::Elite, &elites),
                (ExemplarKind::Novel, &novel),
                (ExemplarKind::Failure, &failures),
            ] {
                let Some(ex) = pool.get(i) else { continue };
                let rendered = render_exemplar(kind, ex);
                let cost = approx_tokens(&rendered);
                if used_tokens + cost > self.budget_tokens {
                    break 'rounds;
                }
                used_tokens += cost;
                sections.push(rendered);
                included += 1;
            }
        }

        if included < total_exemplars {
            tracing::debug!(
                included,
                total = total_exemplars,
                budget_tokens = self.budget_tokens,
                "token budget exhausted; remaining exemplars truncated"
            );
        }

        Ok(sections.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exemplar(id: &str, code: &str, ts: DateTime<Utc>) -> Exemplar {
        Exemplar {
            cand_id: id.to_string(),
            code_snapshot: code.to_string(),
            created_at: ts,
        }
    }

    #[test]
    fn assembles_fixed_section_order() {
        let sampler = PromptSampler::new(10_000);
        let prompt = sampler
            .assemble("Improve correctness.", "Sum of squares task.", "fn f() {}", vec![], vec![], vec![])
            .unwrap();
        let instr_pos = prompt.find("# Instructions").unwrap();
        let task_pos = prompt.find("# Task").unwrap();
        let code_pos = prompt.find("# Current code").unwrap();
        assert!(instr_pos < task_pos);
        assert!(task_pos < code_pos);
    }

    #[test]
    fn oversized_current_code_is_rejected() {
        let sampler = PromptSampler::new(4);
        let err = sampler
            .assemble("t", "d", &"x".repeat(1000), vec![], vec![], vec![])
            .unwrap_err();
        assert!(matches!(err, PromptError::TooLarge { .. }));
    }

    #[test]
    fn same_inputs_and_budget_produce_identical_prompt() {
        let sampler = PromptSampler::new(2_000);
        let now = Utc::now();
        let elites = vec![exemplar("e1", "fn a() {}", now)];
        let novel = vec![exemplar("n1", "fn b() {}", now)];
        let a = sampler
            .assemble("t", "d", "fn f() {}", elites.clone(), novel.clone(), vec![])
            .unwrap();
        let b = sampler
            .assemble("t", "d", "fn f() {}", elites, novel, vec![])
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhausted_budget_drops_oldest_exemplars_first() {
        let older = Utc::now() - chrono::Duration::hours(1);
        let newer = Utc::now();
        let sampler = PromptSampler::new(40);
        let elites = vec![
            exemplar("old", "aaaaaaaaaaaaaaaaaaaa", older),
            exemplar("new", "bbbbbbbbbbbbbbbbbbbb", newer),
        ];
        let prompt = sampler.assemble("t", "d", "x", elites, vec![], vec![]).unwrap();
        assert!(prompt.contains("new") || !prompt.contains("old"));
    }
}
