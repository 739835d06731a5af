//! Unified diff parsing and all-or-nothing application.
//!
//! Application never writes anything itself: it turns original content plus
//! hunks into new content in memory, and fails on the first hunk whose
//! context does not match. Callers write only after every file in a patch
//! has been computed.

use thiserror::Error;

/// A single line in a diff hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A hunk in a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the hunk expects to find in the original (context + removals).
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Lines the hunk leaves in place of the old ones (context + additions).
    fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// All hunks targeting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Target path relative to the repository root (`a/`/`b/` prefixes removed).
    pub path: String,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("diff contains no file headers")]
    NoFiles,
    #[error("diff for {path} contains no hunks")]
    NoHunks { path: String },
    #[error("invalid hunk header '{header}'")]
    BadHeader { header: String },
    #[error("diff {action} {path}, which is not supported")]
    Unsupported { path: String, action: &'static str },
    #[error("hunk {index} does not match the current content near line {line}")]
    HunkMismatch { index: usize, line: usize },
}

/// Parse a (possibly multi-file) unified diff.
pub fn parse_unified_diff(diff: &str) -> Result<Vec<FilePatch>, DiffError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_file_header(&lines, i) {
            let old_path = header_path(&line[4..], "a/");
            let new_path = header_path(&lines[i + 1][4..], "b/");
            if new_path == "/dev/null" {
                return Err(DiffError::Unsupported {
                    path: old_path,
                    action: "deletes",
                });
            }
            if old_path == "/dev/null" {
                return Err(DiffError::Unsupported {
                    path: new_path,
                    action: "creates",
                });
            }
            if old_path != new_path {
                return Err(DiffError::Unsupported {
                    path: old_path,
                    action: "renames",
                });
            }
            patches.push(FilePatch {
                path: new_path,
                hunks: Vec::new(),
            });
            i += 2;
        } else if line.starts_with("@@ ") {
            let hunk = parse_hunk(&lines, &mut i)?;
            match patches.last_mut() {
                Some(patch) => patch.hunks.push(hunk),
                None => return Err(DiffError::NoFiles),
            }
        } else {
            // `diff --git`, `index ...`, and any stray prose between files.
            i += 1;
        }
    }

    if patches.is_empty() {
        return Err(DiffError::NoFiles);
    }
    if let Some(empty) = patches.iter().find(|p| p.hunks.is_empty()) {
        return Err(DiffError::NoHunks {
            path: empty.path.clone(),
        });
    }
    Ok(patches)
}

/// `--- ` immediately followed by `+++ ` starts a file; a lone `---` is a removed line.
fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
}

fn header_path(raw: &str, prefix: &str) -> String {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    raw.strip_prefix(prefix).unwrap_or(raw).to_string()
}

fn parse_hunk(lines: &[&str], idx: &mut usize) -> Result<Hunk, DiffError> {
    let header = lines[*idx];
    let bad_header = || DiffError::BadHeader {
        header: header.to_string(),
    };

    // @@ -old_start,old_count +new_start,new_count @@ optional section
    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() < 4 || parts[0] != "@@" || parts[3] != "@@" {
        return Err(bad_header());
    }
    let old = parts[1].strip_prefix('-').ok_or_else(bad_header)?;
    let new = parts[2].strip_prefix('+').ok_or_else(bad_header)?;
    let (old_start, old_count) = parse_range(old).ok_or_else(bad_header)?;
    let (new_start, new_count) = parse_range(new).ok_or_else(bad_header)?;

    *idx += 1;
    let mut hunk_lines = Vec::new();
    while *idx < lines.len() {
        let line = lines[*idx];
        if line.starts_with("@@ ") || line.starts_with("diff ") || is_file_header(lines, *idx) {
            break;
        }
        if let Some(rest) = line.strip_prefix('+') {
            hunk_lines.push(HunkLine::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk_lines.push(HunkLine::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk_lines.push(HunkLine::Context(rest.to_string()));
        } else if line.is_empty() {
            // Models and editors often strip the single space of blank context lines.
            hunk_lines.push(HunkLine::Context(String::new()));
        }
        // "\ No newline at end of file" and anything else is skipped.
        *idx += 1;
    }

    // Trailing blank "context" lines produced by the fence or the model are not part of the hunk.
    while matches!(hunk_lines.last(), Some(HunkLine::Context(s)) if s.is_empty())
        && hunk_context_overflows(&hunk_lines, old_count, new_count)
    {
        hunk_lines.pop();
    }

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: hunk_lines,
    })
}

fn hunk_context_overflows(lines: &[HunkLine], old_count: usize, new_count: usize) -> bool {
    let old = lines
        .iter()
        .filter(|l| !matches!(l, HunkLine::Add(_)))
        .count();
    let new = lines
        .iter()
        .filter(|l| !matches!(l, HunkLine::Remove(_)))
        .count();
    old > old_count || new > new_count
}

/// Parse a range like "10,5" or "10" into (start, count).
fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Apply every hunk to `original`, or none of them.
///
/// Each hunk is located at its declared position (shifted by earlier hunks)
/// or, failing that, at the nearest position after the previous hunk where
/// its context and removed lines match. Comparison ignores trailing
/// whitespace. The original line ending style and final newline are kept.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, DiffError> {
    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = original.ends_with('\n') || original.is_empty();
    let lines: Vec<&str> = original.lines().collect();

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;
    let mut offset: isize = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let old = hunk.old_lines();
        // A pure insertion (`-N,0`) goes after line N, so N is already the
        // zero-based index of the first line that follows it.
        let declared = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (declared as isize + offset).max(0) as usize;
        let position = locate(&lines, &old, cursor, expected).ok_or(DiffError::HunkMismatch {
            index: index + 1,
            line: hunk.old_start,
        })?;

        out.extend_from_slice(&lines[cursor..position]);
        out.extend(hunk.new_lines());
        cursor = position + old.len();
        // Old-side line numbers refer to the original, so only carry the drift
        // between where a hunk claimed to be and where it was found.
        offset = position as isize - declared as isize;
    }
    out.extend_from_slice(&lines[cursor..]);

    let mut result = out.join(eol);
    if trailing_newline && !result.is_empty() {
        result.push_str(eol);
    }
    Ok(result)
}

fn locate(lines: &[&str], old: &[&str], cursor: usize, expected: usize) -> Option<usize> {
    if cursor > lines.len() || old.len() > lines.len() - cursor {
        return None;
    }
    let last = lines.len() - old.len();
    let matches_at = |pos: usize| {
        old.iter()
            .zip(&lines[pos..pos + old.len()])
            .all(|(want, have)| want.trim_end() == have.trim_end())
    };

    let expected = expected.clamp(cursor, last);
    if matches_at(expected) {
        return Some(expected);
    }
    (cursor..=last)
        .filter(|&pos| matches_at(pos))
        .min_by_key(|&pos| pos.abs_diff(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "function add(a, b) {\n  return a - b;\n}\n\nfunction mul(a, b) {\n  return a + b;\n}\n";

    #[test]
    fn parses_git_style_multi_file_diff() {
        let diff = "diff --git a/src/a.js b/src/a.js\nindex 1..2 100644\n--- a/src/a.js\n+++ b/src/a.js\n@@ -1,2 +1,2 @@\n-x\n+y\n z\ndiff --git a/src/b.js b/src/b.js\n--- a/src/b.js\n+++ b/src/b.js\n@@ -3 +3 @@\n-old\n+new\n";
        let patches = parse_unified_diff(diff).expect("parse");
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].path, "src/a.js");
        assert_eq!(patches[1].path, "src/b.js");
        assert_eq!(patches[1].hunks[0].old_start, 3);
        assert_eq!(patches[1].hunks[0].old_count, 1);
    }

    #[test]
    fn rejects_file_creation() {
        let diff = "--- /dev/null\n+++ b/src/new.js\n@@ -0,0 +1 @@\n+hi\n";
        let err = parse_unified_diff(diff).unwrap_err();
        assert!(matches!(err, DiffError::Unsupported { action: "creates", .. }));
    }

    #[test]
    fn rejects_diff_without_hunks() {
        let diff = "--- a/src/a.js\n+++ b/src/a.js\n";
        assert!(matches!(
            parse_unified_diff(diff),
            Err(DiffError::NoHunks { .. })
        ));
    }

    #[test]
    fn removed_line_starting_with_dashes_is_not_a_header() {
        let diff = "--- a/q.sql\n+++ b/q.sql\n@@ -1,2 +1,1 @@\n--- comment\n select 1;\n";
        let patches = parse_unified_diff(diff).expect("parse");
        assert_eq!(
            patches[0].hunks[0].lines[0],
            HunkLine::Remove("-- comment".to_string())
        );
    }

    #[test]
    fn applies_hunks_at_declared_positions() {
        let diff = "--- a/m.js\n+++ b/m.js\n@@ -1,3 +1,3 @@\n function add(a, b) {\n-  return a - b;\n+  return a + b;\n }\n@@ -5,3 +5,3 @@\n function mul(a, b) {\n-  return a + b;\n+  return a * b;\n }\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let updated = apply_hunks(ORIGINAL, &patches[0].hunks).expect("apply");
        assert_eq!(
            updated,
            "function add(a, b) {\n  return a + b;\n}\n\nfunction mul(a, b) {\n  return a * b;\n}\n"
        );
    }

    #[test]
    fn finds_hunk_when_line_numbers_are_off() {
        let diff = "--- a/m.js\n+++ b/m.js\n@@ -40,3 +40,3 @@\n function mul(a, b) {\n-  return a + b;\n+  return a * b;\n }\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let updated = apply_hunks(ORIGINAL, &patches[0].hunks).expect("apply");
        assert!(updated.contains("return a * b;"));
        assert!(updated.contains("return a - b;"));
    }

    #[test]
    fn mismatched_context_fails_without_partial_result() {
        let diff = "--- a/m.js\n+++ b/m.js\n@@ -1,3 +1,3 @@\n function add(a, b) {\n-  return a - b;\n+  return a + b;\n }\n@@ -5,3 +5,3 @@\n function div(a, b) {\n-  return a + b;\n+  return a / b;\n }\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let err = apply_hunks(ORIGINAL, &patches[0].hunks).unwrap_err();
        assert_eq!(err, DiffError::HunkMismatch { index: 2, line: 5 });
    }

    #[test]
    fn pure_insertion_goes_after_the_named_line() {
        let diff = "--- a/f\n+++ b/f\n@@ -2,0 +3 @@\n+X\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let updated = apply_hunks("a\nb\nc\n", &patches[0].hunks).expect("apply");
        assert_eq!(updated, "a\nb\nX\nc\n");

        let diff = "--- a/f\n+++ b/f\n@@ -0,0 +1 @@\n+top\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let updated = apply_hunks("a\nb\n", &patches[0].hunks).expect("apply");
        assert_eq!(updated, "top\na\nb\n");
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let original = "a\r\nb\r\nc\r\n";
        let diff = "--- a/f\n+++ b/f\n@@ -2 +2 @@\n-b\n+B\n";
        let patches = parse_unified_diff(diff).expect("parse");
        let updated = apply_hunks(original, &patches[0].hunks).expect("apply");
        assert_eq!(updated, "a\r\nB\r\nc\r\n");
    }
}
