//! PatchEngine: parses the two patch wire formats (spec §6) and applies them
//! to a task's target file under the "blocks" or "wholefile" scope (spec
//! §4.2). Atomic file replacement follows the teacher's `atomic_write`
//! (`skilllite-evolution::atomic_write`: write to `.tmp`, then `rename`) so a
//! crash mid-write never corrupts the target file.

pub mod blocks;
pub mod error;

use std::path::Path;

use serde::{Deserialize, Serialize};

use openevolve_core::config::EvolutionScope;

pub use error::{PatchError, Result};

pub const WHOLE_FILE_BLOCK: &str = "__whole__";

/// One structured edit (spec §6 "Patch wire format"): a verbatim substring
/// currently present in the target region, and its replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredEdit {
    pub block: String,
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Deserialize)]
struct StructuredPatchBody {
    diffs: Vec<StructuredEdit>,
}

/// A patch after format classification (spec §4.7 step 4: "JSON structured
/// edits if the body parses as a mapping with a `diffs` key, otherwise treat
/// as unified diff").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPatch {
    Structured(Vec<StructuredEdit>),
    UnifiedDiff(String),
}

impl ParsedPatch {
    pub fn from_text(text: &str) -> Self {
        if let Ok(body) = serde_json::from_str::<StructuredPatchBody>(text) {
            return ParsedPatch::Structured(body.diffs);
        }
        ParsedPatch::UnifiedDiff(text.to_string())
    }
}

/// The result of a successful `apply_to_file`: both versions are kept so the
/// caller can `revert_file` if downstream evaluation rejects the candidate.
pub struct AppliedPatch {
    pub original: String,
    pub new_content: String,
}

#[derive(Clone, Copy)]
pub struct PatchEngine {
    scope: EvolutionScope,
}

impl PatchEngine {
    pub fn new(scope: EvolutionScope) -> Self {
        Self { scope }
    }

    /// Apply an already-classified patch to in-memory file content. Pure:
    /// touches no filesystem state.
    pub fn apply(&self, content: &str, patch: &ParsedPatch) -> Result<String> {
        match patch {
            ParsedPatch::Structured(edits) => self.apply_structured(content, edits),
            ParsedPatch::UnifiedDiff(diff_text) => apply_unified_diff(content, diff_text),
        }
    }

    fn apply_structured(&self, content: &str, edits: &[StructuredEdit]) -> Result<String> {
        let mut current = content.to_string();
        for edit in edits {
            if self.scope == EvolutionScope::Wholefile && edit.block != WHOLE_FILE_BLOCK {
                return Err(PatchError::Malformed(format!(
                    "evolution scope is wholefile; block '{}' not permitted",
                    edit.block
                )));
            }
            current = apply_single_edit(&current, edit)?;
        }
        Ok(current)
    }

    /// Snapshot the target file, apply `patch_text`, and atomically write the
    /// result. The caller decides whether to keep or `revert_file` based on
    /// downstream evaluation (spec §4.2 "safe apply").
    pub fn apply_to_file(&self, path: &Path, patch_text: &str) -> Result<AppliedPatch> {
        let original = std::fs::read_to_string(path)?;
        let parsed = ParsedPatch::from_text(patch_text);
        let new_content = self.apply(&original, &parsed)?;
        atomic_write(path, &new_content)?;
        Ok(AppliedPatch {
            original,
            new_content,
        })
    }

    /// Restore `path` to its pre-patch bytes. A failure here is fatal for the
    /// run (spec §7 `PatchRevertError`).
    pub fn revert_file(path: &Path, original: &str) -> Result<()> {
        atomic_write(path, original).map_err(|e| PatchError::Revert(e.to_string()))
    }
}

fn apply_single_edit(content: &str, edit: &StructuredEdit) -> Result<String> {
    if edit.block == WHOLE_FILE_BLOCK {
        replace_exactly_once(content, &edit.search, &edit.replace, WHOLE_FILE_BLOCK)
    } else {
        let spans = blocks::parse_blocks(content)?;
        let span = spans
            .get(&edit.block)
            .ok_or_else(|| PatchError::BlockNotFound(edit.block.clone()))?;
        let lines: Vec<&str> = content.lines().collect();
        let body = lines[span.start..span.end].join("\n");
        let new_body = replace_exactly_once(&body, &edit.search, &edit.replace, &edit.block)?;

        let mut out: Vec<&str> = Vec::with_capacity(lines.len());
        out.extend_from_slice(&lines[..span.start]);
        let new_body_lines: Vec<&str> = new_body.lines().collect();
        out.extend_from_slice(&new_body_lines);
        out.extend_from_slice(&lines[span.end..]);
        Ok(out.join("\n"))
    }
}

fn replace_exactly_once(haystack: &str, search: &str, replace: &str, block: &str) -> Result<String> {
    let found = haystack.matches(search).count();
    if found == 0 {
        return Err(PatchError::SearchNotFound {
            block: block.to_string(),
        });
    }
    if found > 1 {
        return Err(PatchError::AmbiguousSearch {
            block: block.to_string(),
            found,
        });
    }
    Ok(haystack.replacen(search, replace, 1))
}

fn apply_unified_diff(content: &str, diff_text: &str) -> Result<String> {
    let patch =
        diffy::Patch::from_str(diff_text).map_err(|e| PatchError::Malformed(e.to_string()))?;
    diffy::apply(content, &patch).map_err(|e| PatchError::DiffApply(e.to_string()))
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_engine() -> PatchEngine {
        PatchEngine::new(EvolutionScope::Blocks)
    }

    #[test]
    fn structured_edit_round_trips_on_block() {
        let content = "header\n# EVOLVE-BLOCK-START sum\nreturn a + b\n# EVOLVE-BLOCK-END\nfooter\n";
        let edits = vec![StructuredEdit {
            block: "sum".to_string(),
            search: "return a + b".to_string(),
            replace: "return a * b".to_string(),
        }];
        let out = blocks_engine()
            .apply(content, &ParsedPatch::Structured(edits))
            .unwrap();
        assert!(out.contains("return a * b"));
        assert!(out.contains("header"));
        assert!(out.contains("footer"));
    }

    #[test]
    fn ambiguous_search_is_rejected() {
        let content = "# EVOLVE-BLOCK-START b\nx = 1\nx = 1\n# EVOLVE-BLOCK-END\n";
        let edits = vec![StructuredEdit {
            block: "b".to_string(),
            search: "x = 1".to_string(),
            replace: "x = 2".to_string(),
        }];
        let err = blocks_engine()
            .apply(content, &ParsedPatch::Structured(edits))
            .unwrap_err();
        assert!(matches!(err, PatchError::AmbiguousSearch { found: 2, .. }));
    }

    #[test]
    fn missing_search_is_rejected() {
        let content = "# EVOLVE-BLOCK-START b\nx = 1\n# EVOLVE-BLOCK-END\n";
        let edits = vec![StructuredEdit {
            block: "b".to_string(),
            search: "not present".to_string(),
            replace: "y".to_string(),
        }];
        let err = blocks_engine()
            .apply(content, &ParsedPatch::Structured(edits))
            .unwrap_err();
        assert!(matches!(err, PatchError::SearchNotFound { .. }));
    }

    #[test]
    fn unknown_block_is_rejected() {
        let content = "# EVOLVE-BLOCK-START b\nx = 1\n# EVOLVE-BLOCK-END\n";
        let edits = vec![StructuredEdit {
            block: "missing".to_string(),
            search: "x".to_string(),
            replace: "y".to_string(),
        }];
        let err = blocks_engine()
            .apply(content, &ParsedPatch::Structured(edits))
            .unwrap_err();
        assert!(matches!(err, PatchError::BlockNotFound(_)));
    }

    #[test]
    fn wholefile_scope_rejects_named_blocks() {
        let engine = PatchEngine::new(EvolutionScope::Wholefile);
        let content = "x = 1\n";
        let edits = vec![StructuredEdit {
            block: "named".to_string(),
            search: "x".to_string(),
            replace: "y".to_string(),
        }];
        let err = engine
            .apply(content, &ParsedPatch::Structured(edits))
            .unwrap_err();
        assert!(matches!(err, PatchError::Malformed(_)));
    }

    #[test]
    fn unified_diff_applies_via_diffy() {
        let original = "a\nb\nc\n";
        let modified = "a\nB\nc\n";
        let diff_text = diffy::create_patch(original, modified).to_string();
        let out = blocks_engine()
            .apply(original, &ParsedPatch::UnifiedDiff(diff_text))
            .unwrap();
        assert_eq!(out, modified);
    }

    #[test]
    fn parse_classifies_structured_vs_unified_diff() {
        let structured = r#"{"diffs": [{"block": "__whole__", "search": "a", "replace": "b"}]}"#;
        assert!(matches!(
            ParsedPatch::from_text(structured),
            ParsedPatch::Structured(_)
        ));

        let diff_text = diffy::create_patch("a\n", "b\n").to_string();
        assert!(matches!(
            ParsedPatch::from_text(&diff_text),
            ParsedPatch::UnifiedDiff(_)
        ));
    }

    #[test]
    fn apply_to_file_then_revert_restores_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.py");
        std::fs::write(&path, "# EVOLVE-BLOCK-START sum\nreturn a + b\n# EVOLVE-BLOCK-END\n")
            .unwrap();

        let patch_text = r#"{"diffs": [{"block": "sum", "search": "return a + b", "replace": "return a * b"}]}"#;
        let applied = blocks_engine().apply_to_file(&path, patch_text).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("return a * b"));

        PatchEngine::revert_file(&path, &applied.original).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), applied.original);
    }
}
