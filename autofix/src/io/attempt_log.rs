//! Per-attempt diagnostic artifacts under `.autofix/runs/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{Attempt, IssueId, StrategyKind, TestOutcome};

const STATE_DIR: &str = ".autofix";

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta<'a> {
    pub issue: &'a str,
    pub ordinal: u32,
    pub strategy: StrategyKind,
    pub outcome: TestOutcome,
    pub changed_paths: Vec<&'a str>,
    pub error: Option<&'a str>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub test_log_path: PathBuf,
    pub response_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(root: &Path, issue: &IssueId, ordinal: u32) -> Self {
        let dir = root
            .join(STATE_DIR)
            .join("runs")
            .join(issue.as_str())
            .join(ordinal.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            test_log_path: dir.join("test.log"),
            response_path: dir.join("response.txt"),
            dir,
        }
    }
}

/// Writes attempt artifacts for one issue.
pub trait AttemptLogger {
    fn record(
        &self,
        attempt: &Attempt,
        test_log: &str,
        response: Option<&str>,
        duration_ms: u64,
    ) -> Result<()>;
}

/// Logger writing to `<root>/.autofix/runs/<issue>/<ordinal>/`.
#[derive(Debug, Clone)]
pub struct DiskAttemptLog {
    root: PathBuf,
    issue: IssueId,
}

impl DiskAttemptLog {
    /// Create the state directory (with its `.gitignore`) and clear artifacts
    /// of a previous run for the same issue.
    pub fn open(root: &Path, issue: &IssueId) -> Result<Self> {
        ensure_state_dir(root)?;
        let issue_dir = root.join(STATE_DIR).join("runs").join(issue.as_str());
        if issue_dir.exists() {
            fs::remove_dir_all(&issue_dir)
                .with_context(|| format!("clear {}", issue_dir.display()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            issue: issue.clone(),
        })
    }
}

impl AttemptLogger for DiskAttemptLog {
    fn record(
        &self,
        attempt: &Attempt,
        test_log: &str,
        response: Option<&str>,
        duration_ms: u64,
    ) -> Result<()> {
        let paths = AttemptPaths::new(&self.root, &self.issue, attempt.ordinal);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

        let meta = AttemptMeta {
            issue: self.issue.as_str(),
            ordinal: attempt.ordinal,
            strategy: attempt.strategy,
            outcome: attempt.outcome,
            changed_paths: attempt.changed_paths(),
            error: attempt.error.as_deref(),
            duration_ms,
        };
        write_json(&paths.meta_path, &meta)?;
        write_text(&paths.test_log_path, test_log)?;
        if let Some(response) = response {
            write_text(&paths.response_path, response)?;
        }
        Ok(())
    }
}

/// Create `.autofix/` with a `.gitignore` that keeps it out of commits.
pub fn ensure_state_dir(root: &Path) -> Result<()> {
    let dir = root.join(STATE_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        write_text(&gitignore, "*\n")?;
    }
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn failed_attempt() -> Attempt {
        let mut changes = BTreeMap::new();
        changes.insert("src/math.js".to_string(), "x".to_string());
        Attempt {
            ordinal: 2,
            strategy: StrategyKind::Model,
            changes,
            outcome: TestOutcome::Fail,
            failure_output: Some("1 failing".to_string()),
            error: None,
        }
    }

    #[test]
    fn attempt_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let issue = IssueId::parse("42").expect("id");
        let paths = AttemptPaths::new(temp.path(), &issue, 3);
        assert!(paths.dir.ends_with(Path::new(".autofix/runs/42/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.test_log_path.ends_with("test.log"));
        assert!(paths.response_path.ends_with("response.txt"));
    }

    #[test]
    fn records_meta_log_and_response() {
        let temp = tempfile::tempdir().expect("tempdir");
        let issue = IssueId::parse("42").expect("id");
        let log = DiskAttemptLog::open(temp.path(), &issue).expect("open");
        log.record(&failed_attempt(), "1 failing", Some("=== FILE: ..."), 12)
            .expect("record");

        let paths = AttemptPaths::new(temp.path(), &issue, 2);
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta"))
                .expect("json");
        assert_eq!(meta["strategy"], "model");
        assert_eq!(meta["outcome"], "fail");
        assert_eq!(meta["changed_paths"][0], "src/math.js");
        assert_eq!(
            fs::read_to_string(&paths.test_log_path).expect("log"),
            "1 failing"
        );
        assert!(paths.response_path.exists());
        assert_eq!(
            fs::read_to_string(temp.path().join(".autofix/.gitignore")).expect("gitignore"),
            "*\n"
        );
    }

    #[test]
    fn reopening_clears_previous_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let issue = IssueId::parse("42").expect("id");
        let log = DiskAttemptLog::open(temp.path(), &issue).expect("open");
        log.record(&failed_attempt(), "old", None, 1).expect("record");

        DiskAttemptLog::open(temp.path(), &issue).expect("reopen");
        assert!(!AttemptPaths::new(temp.path(), &issue, 2).dir.exists());
    }
}
