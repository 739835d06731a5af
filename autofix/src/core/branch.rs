//! Deterministic branch naming.

use crate::core::types::IssueId;

/// Branch used for an issue: `<prefix><id>`.
///
/// Reruns for the same issue always map to the same branch, so a second
/// invocation updates the existing branch and PR instead of creating new ones.
pub fn branch_name(prefix: &str, issue: &IssueId) -> String {
    format!("{prefix}{issue}")
}
