//! Bounded repository snapshot for model prompts.
//!
//! Files are rendered in the same `=== FILE: <path> ===` shape the model is
//! asked to answer with. Files named in the issue come first; the rest follow
//! in path order. Files that do not fit the byte budget are listed by path
//! only.

use tracing::debug;

const TRUNCATION_NOTICE: &str = "[... earlier output truncated ...]\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    pub included: Vec<String>,
    pub omitted: Vec<String>,
}

/// Build a snapshot of `files` (path, content) within `budget_bytes`.
pub fn build_snapshot(files: &[(String, String)], issue_text: &str, budget_bytes: usize) -> Snapshot {
    let mut ordered: Vec<&(String, String)> = files.iter().collect();
    ordered.sort_by(|a, b| {
        let a_key = (!is_mentioned(&a.0, issue_text), &a.0);
        let b_key = (!is_mentioned(&b.0, issue_text), &b.0);
        a_key.cmp(&b_key)
    });

    let mut text = String::new();
    let mut included = Vec::new();
    let mut omitted = Vec::new();

    for (path, content) in ordered {
        let block = render_block(path, content);
        if text.len() + block.len() <= budget_bytes {
            text.push_str(&block);
            included.push(path.clone());
        } else {
            omitted.push(path.clone());
        }
    }

    if !omitted.is_empty() {
        debug!(
            included = included.len(),
            omitted = omitted.len(),
            budget_bytes,
            "snapshot over budget, listing remaining files by path"
        );
        text.push_str("Other files in the repository (content not shown):\n");
        for path in &omitted {
            text.push_str("- ");
            text.push_str(path);
            text.push('\n');
        }
    }

    Snapshot {
        text,
        included,
        omitted,
    }
}

fn render_block(path: &str, content: &str) -> String {
    let mut block = format!("=== FILE: {path} ===\n{content}");
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str("=== END ===\n\n");
    block
}

/// True when the issue text names the file by path or by file name.
fn is_mentioned(path: &str, issue_text: &str) -> bool {
    if issue_text.contains(path) {
        return true;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name.len() >= 3 && issue_text.contains(file_name)
}

/// Keep the last `budget_bytes` of `text` (test runners put the summary last).
pub fn truncate_tail(text: &str, budget_bytes: usize) -> String {
    if text.len() <= budget_bytes {
        return text.to_string();
    }
    let mut start = text.len() - budget_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("{TRUNCATION_NOTICE}{}", &text[start..])
}
