//! EVOLVE-BLOCK marker parsing (spec §4.2 "Block markers").
//!
//! The marker syntax is a literal substring match on the trimmed line, not
//! tied to any particular comment character — a task file can use `#`, `//`,
//! or whatever its own language prefers.

use std::collections::HashMap;

use crate::error::PatchError;

const START_MARKER: &str = "EVOLVE-BLOCK-START";
const END_MARKER: &str = "EVOLVE-BLOCK-END";

/// Line range `[start, end)` (into `content.lines()`) spanning a block's body,
/// exclusive of the marker lines themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub start: usize,
    pub end: usize,
}

/// Parse all named blocks in `content`. Rejects files whose markers do not
/// form a well-matched, non-nested sequence.
pub fn parse_blocks(content: &str) -> Result<HashMap<String, BlockSpan>, PatchError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut blocks = HashMap::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(idx) = trimmed.find(START_MARKER) {
            let name = trimmed[idx + START_MARKER.len()..].trim().to_string();
            if name.is_empty() {
                return Err(PatchError::Malformed(format!(
                    "line {}: EVOLVE-BLOCK-START without a name",
                    i + 1
                )));
            }
            if let Some((open, _)) = stack.last() {
                return Err(PatchError::Malformed(format!(
                    "line {}: block '{}' nested inside '{}' — nesting is not permitted",
                    i + 1,
                    name,
                    open
                )));
            }
            stack.push((name, i + 1));
        } else if trimmed.contains(END_MARKER) {
            match stack.pop() {
                None => {
                    return Err(PatchError::Malformed(format!(
                        "line {}: EVOLVE-BLOCK-END with no matching start",
                        i + 1
                    )))
                }
                Some((name, start)) => {
                    blocks.insert(name, BlockSpan { start, end: i });
                }
            }
        }
    }

    if let Some((name, _)) = stack.pop() {
        return Err(PatchError::Malformed(format!(
            "unterminated block '{name}'"
        )));
    }

    Ok(blocks)
}
