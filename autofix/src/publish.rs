//! Publish a passing repair: branch, commit, lease-protected push, pull
//! request.
//!
//! Safe to rerun. The branch name depends only on the issue, an empty commit
//! is skipped, and an open pull request for the branch is reused instead of
//! opening a second one.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::{Attempt, Issue};
use crate::io::git::VersionControl;
use crate::io::github::{PrRequest, PullRequest, PullRequests};

#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub issue: &'a Issue,
    pub branch: String,
    pub base_branch: &'a str,
    pub remote: &'a str,
    pub attempts: &'a [Attempt],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrStatus {
    Created(PullRequest),
    /// An open pull request for the branch already existed.
    Existing(PullRequest),
}

impl PrStatus {
    pub fn pull_request(&self) -> &PullRequest {
        match self {
            PrStatus::Created(pr) | PrStatus::Existing(pr) => pr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub branch: String,
    /// Paths staged for the fix commit.
    pub staged: Vec<String>,
    /// False when the working tree had nothing to commit.
    pub committed: bool,
    pub pr: PrStatus,
}

pub fn commit_message(issue: &Issue) -> String {
    format!("fix: resolve #{} {}", issue.id, issue.title.trim())
}

pub fn pr_title(issue: &Issue) -> String {
    format!("Fix #{}: {}", issue.id, issue.title.trim())
}

/// Pull request body: closing keyword plus one table row per attempt.
pub fn pr_body(issue: &Issue, attempts: &[Attempt]) -> String {
    let mut body = format!(
        "Closes #{}\n\nAutomated fix generated by autofix.\n\n| Attempt | Strategy | Tests | Files |\n|---|---|---|---|\n",
        issue.id
    );
    for attempt in attempts {
        let files = attempt.changed_paths();
        let files = if files.is_empty() {
            "-".to_string()
        } else {
            files
                .iter()
                .map(|f| format!("`{f}`"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let tests = if attempt.passed() { "pass" } else { "fail" };
        body.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            attempt.ordinal,
            attempt.strategy.as_str(),
            tests,
            files
        ));
    }
    body
}

#[instrument(skip_all, fields(issue = %request.issue.id, branch = %request.branch))]
pub fn publish(
    vcs: &dyn VersionControl,
    prs: &dyn PullRequests,
    request: &PublishRequest<'_>,
) -> Result<PublishOutcome> {
    vcs.reset_branch(&request.branch)
        .with_context(|| format!("prepare branch {}", request.branch))?;
    let staged = vcs.stage_all().context("stage changes")?;
    info!(files = ?staged, "staged changes");
    let committed = vcs
        .commit(&commit_message(request.issue))
        .context("commit changes")?;
    if committed {
        info!("committed fix");
    } else {
        info!("nothing to commit, publishing the branch as is");
    }
    vcs.push_with_lease(request.remote, &request.branch)?;

    let pr = match prs
        .find_for_branch(&request.branch)
        .context("look up existing pull request")?
    {
        Some(existing) => {
            info!(
                number = existing.number,
                url = %existing.url,
                "pull request already open, skipping creation"
            );
            PrStatus::Existing(existing)
        }
        None => {
            let created = prs
                .create(&PrRequest {
                    head: request.branch.clone(),
                    base: request.base_branch.to_string(),
                    title: pr_title(request.issue),
                    body: pr_body(request.issue, request.attempts),
                })
                .context("create pull request")?;
            PrStatus::Created(created)
        }
    };

    Ok(PublishOutcome {
        branch: request.branch.clone(),
        staged,
        committed,
        pr,
    })
}
