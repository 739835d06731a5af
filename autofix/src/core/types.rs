//! Shared types for one repair invocation.
//!
//! An [`Issue`] is fetched once and never mutated. Each iteration of the
//! repair loop produces one [`Attempt`], which is likewise immutable once
//! recorded and lives only for the duration of the run.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Issue tracker identifier (e.g. `42`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    /// Parse an identifier. Allowed: ASCII alphanumerics, `-`, `_`.
    ///
    /// The id ends up in branch names and log directories, so anything that
    /// could escape those is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches('#');
        if trimmed.is_empty() {
            return Err(anyhow!("issue id must not be empty"));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!(
                "issue id '{raw}' may only contain ASCII letters, digits, '-' and '_'"
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The issue being repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub body: Option<String>,
}

impl Issue {
    /// Title and body joined for prompts and path matching.
    pub fn text(&self) -> String {
        match self.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(body) => format!("{}\n\n{}", self.title.trim(), body),
            None => self.title.trim().to_string(),
        }
    }
}

/// Which kind of strategy produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Heuristic,
    Model,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Heuristic => "heuristic",
            StrategyKind::Model => "model",
        }
    }
}

/// Result of running the test suite after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
}

/// One completed iteration of the repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// 1-based position in the strategy plan.
    pub ordinal: u32,
    pub strategy: StrategyKind,
    /// Files rewritten by this attempt (relative path -> full new content).
    /// Empty when the strategy reported no change or failed.
    #[serde(skip)]
    pub changes: BTreeMap<String, String>,
    pub outcome: TestOutcome,
    /// Captured test output, present only when the tests failed.
    pub failure_output: Option<String>,
    /// Parse/apply failure that aborted the patch step of this attempt.
    pub error: Option<String>,
}

impl Attempt {
    pub fn changed_paths(&self) -> Vec<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    pub fn passed(&self) -> bool {
        self.outcome == TestOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_id_strips_hash_prefix() {
        let id = IssueId::parse("#42").expect("parse");
        assert_eq!(id.as_str(), "42");
    }

    #[test]
    fn issue_id_rejects_path_characters() {
        assert!(IssueId::parse("../42").is_err());
        assert!(IssueId::parse("4 2").is_err());
        assert!(IssueId::parse("  ").is_err());
    }

    #[test]
    fn issue_text_omits_blank_body() {
        let issue = Issue {
            id: IssueId::parse("7").expect("id"),
            title: "add() subtracts".to_string(),
            body: Some("   ".to_string()),
        };
        assert_eq!(issue.text(), "add() subtracts");
    }

    #[test]
    fn issue_text_joins_title_and_body() {
        let issue = Issue {
            id: IssueId::parse("7").expect("id"),
            title: "add() subtracts".to_string(),
            body: Some("see src/math.js".to_string()),
        };
        assert_eq!(issue.text(), "add() subtracts\n\nsee src/math.js");
    }
}
