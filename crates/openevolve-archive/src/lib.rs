//! Archive: Pareto ranking, novelty scoring, ageing, eviction, and mixture
//! sampling over accepted candidates (spec §4.5).
//!
//! Weighted sampling without replacement uses `rand` with a seeded
//! `StdRng` (`rand::rngs::StdRng::seed_from_u64`), grounded in
//! `oldnordic-odincode`'s and the Housaky DGM engine's use of `rand` for
//! selection — this is what makes identical-seed runs reproduce identical
//! candidate sequences.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;

use openevolve_core::config::Direction;

/// One accepted candidate tracked by the Archive. The Store remains the
/// source of truth; this is the in-memory behavioural-descriptor view (spec
/// §3: "age and novelty are recomputed views maintained in-memory by the
/// Archive, persisted opportunistically").
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub cand_id: String,
    pub metrics: HashMap<String, f64>,
    pub rank: usize,
    pub novelty: f64,
    pub age: u64,
    pub created_at: DateTime<Utc>,
    insertion_order: u64,
}

pub struct Archive {
    capacity: usize,
    k_novelty: usize,
    ageing_threshold: u64,
    directions: HashMap<String, Direction>,
    members: Vec<ArchiveMember>,
    next_insertion_order: u64,
}

/// Outcome of inserting a candidate: `None` if the archive had room, or the
/// `cand_id` evicted to make room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub evicted: Option<String>,
}

impl Archive {
    pub fn new(
        capacity: usize,
        k_novelty: usize,
        ageing_threshold: u64,
        directions: HashMap<String, Direction>,
    ) -> Self {
        Self {
            capacity,
            k_novelty,
            ageing_threshold,
            directions,
            members: Vec::new(),
            next_insertion_order: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    /// Insert an accepted candidate, ageing all existing members first,
    /// recomputing ranks/novelty, and evicting if the archive is over
    /// capacity afterwards.
    pub fn insert(
        &mut self,
        cand_id: String,
        metrics: HashMap<String, f64>,
        created_at: DateTime<Utc>,
    ) -> InsertOutcome {
        for m in &mut self.members {
            m.age += 1;
        }

        self.members.push(ArchiveMember {
            cand_id,
            metrics,
            rank: 0,
            novelty: 0.0,
            age: 0,
            created_at,
            insertion_order: self.next_insertion_order,
        });
        self.next_insertion_order += 1;

        self.recompute_rank();
        self.recompute_novelty();

        if self.members.len() > self.capacity {
            let idx = self.select_eviction_index();
            let evicted = self.members.remove(idx);
            InsertOutcome {
                evicted: Some(evicted.cand_id),
            }
        } else {
            InsertOutcome { evicted: None }
        }
    }

    fn recompute_rank(&mut self) {
        let n = self.members.len();
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut ranks = vec![0usize; n];
        let mut current_rank = 0usize;

        while !remaining.is_empty() {
            let front: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| {
                    !remaining.iter().any(|&j| {
                        j != i && dominates(&self.members[j].metrics, &self.members[i].metrics, &self.directions)
                    })
                })
                .collect();
            for &i in &front {
                ranks[i] = current_rank;
            }
            remaining.retain(|i| !front.contains(i));
            current_rank += 1;
        }

        for (i, m) in self.members.iter_mut().enumerate() {
            m.rank = ranks[i];
        }
    }

    fn recompute_novelty(&mut self) {
        let n = self.members.len();
        if n == 0 {
            return;
        }
        let normalized = self.normalized_vectors();
        let mut novelty = vec![0.0f64; n];

        for i in 0..n {
            let mut dists: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| euclidean(&normalized[i], &normalized[j]))
                .collect();
            dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let take = self.k_novelty.min(dists.len());
            novelty[i] = if take == 0 {
                0.0
            } else {
                dists[..take].iter().sum::<f64>() / take as f64
            };
        }

        for (i, m) in self.members.iter_mut().enumerate() {
            m.novelty = novelty[i];
        }
    }

    fn normalized_vectors(&self) -> Vec<HashMap<String, f64>> {
        let mut min: HashMap<String, f64> = HashMap::new();
        let mut max: HashMap<String, f64> = HashMap::new();
        for m in &self.members {
            for (k, v) in &m.metrics {
                min.entry(k.clone())
                    .and_modify(|cur| *cur = cur.min(*v))
                    .or_insert(*v);
                max.entry(k.clone())
                    .and_modify(|cur| *cur = cur.max(*v))
                    .or_insert(*v);
            }
        }
        self.members
            .iter()
            .map(|m| {
                m.metrics
                    .iter()
                    .map(|(k, v)| {
                        let lo = min[k];
                        let hi = max[k];
                        let normalized = if hi > lo { (v - lo) / (hi - lo) } else { 0.0 };
                        (k.clone(), normalized)
                    })
                    .collect()
            })
            .collect()
    }

    fn select_eviction_index(&self) -> usize {
        let max_rank = self.members.iter().map(|m| m.rank).max().unwrap_or(0);

        let group: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.rank == max_rank)
            .map(|(i, _)| i)
            .collect();

        // Prefer members that are past the ageing threshold (spec §4.5
        // "Ageing"), falling back to the whole worst-rank group otherwise.
        let aged: Vec<usize> = group
            .iter()
            .copied()
            .filter(|&i| self.members[i].age > self.ageing_threshold)
            .collect();
        let pool = if aged.is_empty() { &group } else { &aged };

        *pool
            .iter()
            .min_by(|&&a, &&b| {
                self.members[a]
                    .novelty
                    .partial_cmp(&self.members[b].novelty)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(self.members[a].created_at.cmp(&self.members[b].created_at))
            })
            .expect("archive must be non-empty to select an eviction candidate")
    }

    /// The `k` lowest-rank members, deterministically ordered (spec §4.3
    /// "elites_k by Pareto rank"). Ties broken by insertion order then
    /// `cand_id`.
    pub fn top_by_rank(&self, k: usize) -> Vec<&ArchiveMember> {
        let mut idx: Vec<usize> = (0..self.members.len()).collect();
        idx.sort_by(|&a, &b| {
            self.members[a]
                .rank
                .cmp(&self.members[b].rank)
                .then(self.members[a].insertion_order.cmp(&self.members[b].insertion_order))
                .then(self.members[a].cand_id.cmp(&self.members[b].cand_id))
        });
        idx.into_iter().take(k).map(|i| &self.members[i]).collect()
    }

    /// The `m` highest-novelty members, deterministically ordered (spec §4.3
    /// "novel_m by novelty"). Ties broken by insertion order then `cand_id`.
    pub fn top_by_novelty(&self, m: usize) -> Vec<&ArchiveMember> {
        let mut idx: Vec<usize> = (0..self.members.len()).collect();
        idx.sort_by(|&a, &b| {
            self.members[b]
                .novelty
                .partial_cmp(&self.members[a].novelty)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(self.members[a].insertion_order.cmp(&self.members[b].insertion_order))
                .then(self.members[a].cand_id.cmp(&self.members[b].cand_id))
        });
        idx.into_iter().take(m).map(|i| &self.members[i]).collect()
    }

    /// Draw a mixture of `elite` (lowest rank), `novel` (highest novelty),
    /// and `young` (lowest age) members: weighted random without
    /// replacement per category, deduplicated preserving first-appearance
    /// order (spec §4.5 "Sampling for next generation").
    pub fn sample(&self, elite: usize, novel: usize, young: usize, seed: u64) -> Vec<String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        let elite_weights: Vec<f64> = self.members.iter().map(|m| 1.0 / (1.0 + m.rank as f64)).collect();
        let novel_weights: Vec<f64> = self.members.iter().map(|m| m.novelty.max(1e-9)).collect();
        let young_weights: Vec<f64> = self.members.iter().map(|m| 1.0 / (1.0 + m.age as f64)).collect();

        for idx in weighted_sample_without_replacement(&elite_weights, elite, &mut rng) {
            let id = &self.members[idx].cand_id;
            if seen.insert(id.clone()) {
                out.push(id.clone());
            }
        }
        for idx in weighted_sample_without_replacement(&novel_weights, novel, &mut rng) {
            let id = &self.members[idx].cand_id;
            if seen.insert(id.clone()) {
                out.push(id.clone());
            }
        }
        for idx in weighted_sample_without_replacement(&young_weights, young, &mut rng) {
            let id = &self.members[idx].cand_id;
            if seen.insert(id.clone()) {
                out.push(id.clone());
            }
        }

        out
    }
}

fn weighted_sample_without_replacement(weights: &[f64], count: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut available: Vec<usize> = (0..weights.len()).collect();
    let mut picked = Vec::new();

    for _ in 0..count.min(weights.len()) {
        let pool_weights: Vec<f64> = available.iter().map(|&i| weights[i].max(1e-9)).collect();
        let dist = match WeightedIndex::new(&pool_weights) {
            Ok(d) => d,
            Err(_) => break,
        };
        let chosen_pos = dist.sample(rng);
        let chosen = available.remove(chosen_pos);
        picked.push(chosen);
    }

    picked
}

fn dominates(a: &HashMap<String, f64>, b: &HashMap<String, f64>, directions: &HashMap<String, Direction>) -> bool {
    let mut strictly_better = false;
    for (metric, dir) in directions {
        let (Some(&av), Some(&bv)) = (a.get(metric), b.get(metric)) else {
            continue;
        };
        let (no_worse, better) = match dir {
            Direction::Maximize => (av >= bv, av > bv),
            Direction::Minimize => (av <= bv, av < bv),
        };
        if !no_worse {
            return false;
        }
        if better {
            strictly_better = true;
        }
    }
    strictly_better
}

fn euclidean(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let sum: f64 = a
        .iter()
        .map(|(k, v)| {
            let other = b.get(k).copied().unwrap_or(0.0);
            (v - other).powi(2)
        })
        .sum();
    sum.sqrt()
}
