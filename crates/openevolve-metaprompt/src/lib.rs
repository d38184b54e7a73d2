//! MetaPromptPool: a bounded, co-evolving population of instruction
//! templates (spec §4.6). New templates arise by mutating a tournament
//! winner from the fittest slice of the population; fitness is attributed
//! back from downstream candidate outcomes as an exponential moving average,
//! the same shape as the teacher's `prompt_learner`/`skill_synth` modules
//! turning decision outcomes into rule/skill fitness adjustments.

pub mod mutation;

use chrono::{DateTime, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;

use openevolve_core::config::MetaPromptConfig;
use openevolve_core::types::MetaPrompt;

/// EMA weight for fitness attribution (spec §4.6).
const FITNESS_ALPHA: f64 = 0.2;

/// Built-in seed templates. A fresh pool starts with one member per entry,
/// generalized over generations purely through mutation — no other source
/// of new templates exists (spec §4.6 "Initial members come from a
/// built-in template set").
const BUILTIN_TEMPLATES: &[&str] = &[
    "Improve the marked code for correctness. Keep changes minimal and targeted.",
    "Propose an edit that improves performance without changing observable behavior. \
     Prioritise correctness over cleverness.",
    "Rewrite the block to fix the failing metric. Explain nothing; emit only the edit.",
];

pub struct MetaPromptPool {
    run_id: String,
    population: usize,
    mutation_prob: f64,
    selection_top_k: usize,
    members: Vec<MetaPrompt>,
}

/// Meta-prompt ids are derived from `(run_id, role)` rather than drawn from a
/// random generator: the same run, replayed with the same seed, must mutate
/// the same parent into the same child id for Testable Property 6 ("two
/// independent runs produce identical ... Archive contents", spec §8) to
/// hold — a random id would make every same-seed replay diverge on the very
/// first insertion. The `run_id` prefix keeps ids unique across runs that
/// happen to share one physical store (spec §4.1: `meta_prompts` has no
/// run-scoping column of its own).
fn seed_id(run_id: &str, index: usize) -> String {
    format!("{run_id}:mp:seed:{index}")
}

fn mutated_id(run_id: &str, generation: u64) -> String {
    format!("{run_id}:mp:mut:g{generation}")
}

fn rng_for(seed: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ salt.wrapping_mul(0xD6E8_FEB8_6659_FD93))
}

impl MetaPromptPool {
    /// Seed a fresh pool from the built-in template set (spec §4.6).
    pub fn seed(run_id: &str, config: &MetaPromptConfig, now: DateTime<Utc>) -> Self {
        let members = BUILTIN_TEMPLATES
            .iter()
            .take(config.population.max(1))
            .enumerate()
            .map(|(index, template)| MetaPrompt {
                meta_prompt_id: seed_id(run_id, index),
                template: template.to_string(),
                parent_ids: Vec::new(),
                created_at: now,
                last_used: now,
                fitness: 0.0,
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            population: config.population,
            mutation_prob: config.mutation_prob,
            selection_top_k: config.selection_top_k,
            members,
        }
    }

    /// Rehydrate a pool from persisted rows (resume path, spec §4.7).
    pub fn from_members(run_id: &str, config: &MetaPromptConfig, members: Vec<MetaPrompt>) -> Self {
        Self {
            run_id: run_id.to_string(),
            population: config.population,
            mutation_prob: config.mutation_prob,
            selection_top_k: config.selection_top_k,
            members,
        }
    }

    pub fn members(&self) -> &[MetaPrompt] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn top_k_indices(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.members.len()).collect();
        idx.sort_by(|&a, &b| {
            self.members[b]
                .fitness
                .partial_cmp(&self.members[a].fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(self.members[a].created_at.cmp(&self.members[b].created_at))
        });
        idx.truncate(self.selection_top_k.max(1).min(idx.len().max(1)));
        idx
    }

    /// Tournament-select a parent from the top `selection_top_k` members by
    /// fitness: draw two at random from that slice, keep the fitter one.
    fn tournament_pick(&self, rng: &mut StdRng) -> Option<usize> {
        let pool = self.top_k_indices();
        if pool.is_empty() {
            return None;
        }
        if pool.len() == 1 {
            return Some(pool[0]);
        }
        let a = pool[rng.gen_range(0..pool.len())];
        let b = pool[rng.gen_range(0..pool.len())];
        if self.members[a].fitness >= self.members[b].fitness {
            Some(a)
        } else {
            Some(b)
        }
    }

    /// With probability `mutation_prob`, mutate a tournament-selected parent
    /// and insert the child, evicting the weakest member if the pool is now
    /// over `population` (spec §4.6).
    pub fn maybe_mutate(&mut self, seed: u64, generation: u64, now: DateTime<Utc>) -> Option<MetaPrompt> {
        let mut gate_rng = rng_for(seed, generation.wrapping_mul(2));
        if !gate_rng.gen_bool(self.mutation_prob.clamp(0.0, 1.0)) {
            return None;
        }

        let mut pick_rng = rng_for(seed, generation.wrapping_mul(2).wrapping_add(1));
        let parent_idx = self.tournament_pick(&mut pick_rng)?;
        let parent = self.members[parent_idx].clone();

        let child_template = mutation::mutate(&parent.template, seed, generation as usize);
        let child = MetaPrompt {
            meta_prompt_id: mutated_id(&self.run_id, generation),
            template: child_template,
            parent_ids: vec![parent.meta_prompt_id.clone()],
            created_at: now,
            last_used: now,
            fitness: 0.0,
        };
        self.members.push(child.clone());
        self.evict_if_over_capacity();
        Some(child)
    }

    /// Evict the lowest-fitness member, breaking ties by oldest `last_used`
    /// (spec §4.6 "Eviction").
    fn evict_if_over_capacity(&mut self) {
        while self.members.len() > self.population.max(1) {
            let worst = self
                .members
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.fitness
                        .partial_cmp(&b.fitness)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.last_used.cmp(&b.last_used))
                })
                .map(|(i, _)| i);
            match worst {
                Some(i) => {
                    self.members.remove(i);
                }
                None => break,
            }
        }
    }

    /// Draw `n` templates, one per generation slot, weighted by fitness
    /// (a fitness of 0 still carries a small floor weight so unused
    /// templates keep getting a chance). Touches `last_used` on every draw
    /// (spec §4.6).
    pub fn sample_for_generation(&mut self, n: usize, seed: u64, now: DateTime<Utc>) -> Vec<MetaPrompt> {
        if self.members.is_empty() || n == 0 {
            return Vec::new();
        }
        let mut rng = rng_for(seed, 0x5151);
        let weights: Vec<f64> = self.members.iter().map(|m| m.fitness.max(1e-6)).collect();
        let dist = match WeightedIndex::new(&weights) {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };

        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let idx = dist.sample(&mut rng);
            self.members[idx].last_used = now;
            out.push(self.members[idx].clone());
        }
        out
    }

    /// Attribute downstream fitness to the template that produced a slot's
    /// candidate (spec §4.6 "Fitness attribution"). `rank_at_insertion` is
    /// `Some(rank)` for a candidate accepted into the Archive, `None` for a
    /// rejected or failed candidate (which attributes `0`).
    pub fn record_outcome(&mut self, meta_prompt_id: &str, rank_at_insertion: Option<usize>) {
        let reward = match rank_at_insertion {
            Some(rank) => 1.0 / (1.0 + rank as f64),
            None => 0.0,
        };
        if let Some(m) = self
            .members
            .iter_mut()
            .find(|m| m.meta_prompt_id == meta_prompt_id)
        {
            m.fitness = FITNESS_ALPHA * reward + (1.0 - FITNESS_ALPHA) * m.fitness;
        }
    }
}
