//! Surface mutation operators (spec §4.6). Each is a pure function of
//! `(parent_template, seed, mutation_index)` — no hidden global RNG state —
//! so two runs with the same seed produce the same mutated template, per the
//! determinism invariant (spec §8).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EMPHASIS_CLOSERS: [&str; 3] = [
    "Prioritise correctness over cleverness.",
    "Keep changes minimal and targeted.",
    "Explain nothing; emit only the edit.",
];

fn rng_for(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(0x9E3779B97F4A7C15))
}

fn sentences(template: &str) -> Vec<&str> {
    template
        .split_terminator('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Append one of a fixed set of emphasis sentences.
fn insert_sentence(template: &str, seed: u64, index: usize) -> String {
    let mut rng = rng_for(seed, index);
    let choice = EMPHASIS_CLOSERS[rng.gen_range(0..EMPHASIS_CLOSERS.len())];
    format!("{} {choice}", template.trim_end())
}

/// Drop the last sentence, if more than one remains.
fn delete_sentence(template: &str) -> String {
    let parts = sentences(template);
    if parts.len() <= 1 {
        return template.to_string();
    }
    let kept = &parts[..parts.len() - 1];
    format!("{}.", kept.join(". "))
}

/// Upper-case the first sentence to emphasise it.
fn reword_emphasis(template: &str) -> String {
    let parts = sentences(template);
    if parts.is_empty() {
        return template.to_string();
    }
    let mut out = parts[0].to_uppercase();
    out.push('.');
    for s in &parts[1..] {
        out.push(' ');
        out.push_str(s);
        out.push('.');
    }
    out
}

/// Apply a deterministic mutation chosen by `(seed, index)` to `parent`.
pub fn mutate(parent: &str, seed: u64, index: usize) -> String {
    let mut rng = rng_for(seed, index.wrapping_add(1));
    match rng.gen_range(0..3u8) {
        0 => insert_sentence(parent, seed, index),
        1 => delete_sentence(parent),
        _ => reword_emphasis(parent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_is_deterministic_given_seed_and_index() {
        let parent = "Improve the function. Keep it simple.";
        let a = mutate(parent, 7, 3);
        let b = mutate(parent, 7, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn different_indices_can_diverge() {
        let parent = "Improve the function. Keep it simple. Avoid side effects.";
        let variants: Vec<String> = (0..8).map(|i| mutate(parent, 1, i)).collect();
        assert!(variants.iter().any(|v| v != &variants[0]));
    }
}
