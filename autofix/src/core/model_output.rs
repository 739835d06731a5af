//! Typed parsing of model repair responses.
//!
//! Two output shapes are accepted, never both in one response:
//!
//! - **Diff**: exactly one fenced block tagged `diff` holding a unified diff.
//! - **Full files**: one or more blocks of the form
//!   `=== FILE: <path> ===` / content / `=== END ===`.
//!
//! Parsing only produces data. Whether a path may be written is decided by
//! the workspace before anything touches the disk.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::diff::{FilePatch, parse_unified_diff};
use crate::error::FixError;

const FILE_START_MARKER: &str = "=== FILE:";

static FILE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^=== FILE:[ \t]*(?P<path>[^\r\n]+?)[ \t]*===[ \t]*\r?\n(?P<body>.*?)^=== END ===[ \t]*$")
        .expect("file block regex should be valid")
});

static DIFF_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```diff[ \t]*\r?\n(?P<body>.*?)^[ \t]*```[ \t]*$")
        .expect("diff fence regex should be valid")
});

/// A complete replacement for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

/// A parsed model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelPatch {
    FullFiles(Vec<FileBlock>),
    Diff(Vec<FilePatch>),
}

impl ModelPatch {
    /// Target paths in response order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            ModelPatch::FullFiles(blocks) => blocks.iter().map(|b| b.path.as_str()).collect(),
            ModelPatch::Diff(patches) => patches.iter().map(|p| p.path.as_str()).collect(),
        }
    }
}

/// Parse `raw` into a [`ModelPatch`].
///
/// Fails with [`FixError::Parse`] (carrying the full response) when no shape
/// is present, when both shapes are present, when a file block is left
/// unterminated, or when more than one diff block is present.
pub fn parse_model_output(raw: &str) -> Result<ModelPatch, FixError> {
    let blocks: Vec<FileBlock> = FILE_BLOCK_RE
        .captures_iter(raw)
        .map(|caps| FileBlock {
            path: caps["path"].trim().to_string(),
            content: caps["body"].to_string(),
        })
        .collect();
    let start_markers = raw
        .lines()
        .filter(|line| line.starts_with(FILE_START_MARKER))
        .count();
    let diffs: Vec<&str> = DIFF_FENCE_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.name("body").map(|m| m.as_str()))
        .collect();

    let has_files = !blocks.is_empty() || start_markers > 0;
    match (has_files, diffs.len()) {
        (false, 0) => Err(FixError::parse(
            "response contains neither a ```diff block nor === FILE: blocks",
            raw,
        )),
        (true, n) if n > 0 => Err(FixError::parse(
            "response mixes a ```diff block with === FILE: blocks",
            raw,
        )),
        (true, _) => {
            if start_markers != blocks.len() {
                return Err(FixError::parse(
                    format!(
                        "found {start_markers} === FILE: marker(s) but only {} terminated block(s)",
                        blocks.len()
                    ),
                    raw,
                ));
            }
            if let Some(empty) = blocks.iter().find(|b| b.path.is_empty()) {
                return Err(FixError::parse(
                    format!("file block with empty path (content starts {:?})", preview(&empty.content)),
                    raw,
                ));
            }
            Ok(ModelPatch::FullFiles(blocks))
        }
        (false, 1) => {
            let patches = parse_unified_diff(diffs[0])
                .map_err(|err| FixError::parse(format!("invalid diff: {err}"), raw))?;
            Ok(ModelPatch::Diff(patches))
        }
        (false, n) => Err(FixError::parse(
            format!("expected a single ```diff block, found {n}"),
            raw,
        )),
    }
}

fn preview(content: &str) -> String {
    content.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_file_blocks() {
        let raw = "=== FILE: src/math.js ===\nexport function add(a, b) {\n  return a + b;\n}\n=== END ===\n\n=== FILE: src/util.js ===\nexport const id = (x) => x;\n=== END ===\n";
        let ModelPatch::FullFiles(blocks) = parse_model_output(raw).expect("parse") else {
            panic!("expected full files");
        };
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].path, "src/math.js");
        assert_eq!(
            blocks[0].content,
            "export function add(a, b) {\n  return a + b;\n}\n"
        );
        assert_eq!(blocks[1].path, "src/util.js");
        assert_eq!(blocks[1].content, "export const id = (x) => x;\n");
    }

    #[test]
    fn parses_single_diff_fence() {
        let raw = "```diff\n--- a/src/math.js\n+++ b/src/math.js\n@@ -2 +2 @@\n-  return a - b;\n+  return a + b;\n```\n";
        let patch = parse_model_output(raw).expect("parse");
        assert_eq!(patch.paths(), vec!["src/math.js"]);
        assert!(matches!(patch, ModelPatch::Diff(_)));
    }

    #[test]
    fn prose_only_response_is_a_parse_error_with_raw_text() {
        let raw = "I think the bug is in add(), you should use + instead of -.";
        let err = parse_model_output(raw).unwrap_err();
        let FixError::Parse { raw: surfaced, .. } = err else {
            panic!("expected parse error");
        };
        assert_eq!(surfaced, raw);
    }

    #[test]
    fn mixed_shapes_are_rejected() {
        let raw = "=== FILE: a.js ===\nx\n=== END ===\n```diff\n--- a/a.js\n+++ b/a.js\n@@ -1 +1 @@\n-x\n+y\n```\n";
        assert!(matches!(
            parse_model_output(raw),
            Err(FixError::Parse { .. })
        ));
    }

    #[test]
    fn unterminated_file_block_is_rejected() {
        let raw = "=== FILE: a.js ===\nx\n=== END ===\n=== FILE: b.js ===\ny\n";
        let err = parse_model_output(raw).unwrap_err();
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn two_diff_fences_are_rejected() {
        let fence = "```diff\n--- a/a.js\n+++ b/a.js\n@@ -1 +1 @@\n-x\n+y\n```\n";
        let raw = format!("{fence}{fence}");
        let err = parse_model_output(&raw).unwrap_err();
        assert!(err.to_string().contains("single"));
    }

    #[test]
    fn other_fence_languages_are_not_diffs() {
        let raw = "```js\nexport function add(a, b) { return a + b; }\n```\n";
        assert!(parse_model_output(raw).is_err());
    }
}
