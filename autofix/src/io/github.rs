//! Issue tracker and pull request adapter over the `gh` CLI.
//!
//! Authentication is whatever `gh` is configured with (`GH_TOKEN` or a prior
//! `gh auth login`). JSON output is requested for every query so parsing
//! does not depend on human-readable formatting.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::core::types::{Issue, IssueId};

/// Issue lookup.
pub trait IssueTracker {
    fn fetch_issue(&self, id: &IssueId) -> Result<Issue>;

    /// Open issues carrying `label`, in tracker order.
    fn open_issues_with_label(&self, label: &str) -> Result<Vec<IssueId>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Pull request lookup and creation.
pub trait PullRequests {
    /// The open pull request whose head is `branch`, if any.
    fn find_for_branch(&self, branch: &str) -> Result<Option<PullRequest>>;

    fn create(&self, request: &PrRequest) -> Result<PullRequest>;
}

/// `gh` invoked in the repository checkout.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.join(" ")))
    }
}

impl IssueTracker for GhCli {
    #[instrument(skip_all, fields(issue = %id))]
    fn fetch_issue(&self, id: &IssueId) -> Result<Issue> {
        let out = self.run_capture(&["issue", "view", id.as_str(), "--json", "number,title,body"])?;
        parse_issue_view(&out).with_context(|| format!("parse issue {id}"))
    }

    #[instrument(skip_all, fields(label = %label))]
    fn open_issues_with_label(&self, label: &str) -> Result<Vec<IssueId>> {
        let out = self.run_capture(&[
            "issue", "list", "--label", label, "--state", "open", "--json", "number",
        ])?;
        let ids = parse_issue_list(&out).context("parse issue list")?;
        debug!(count = ids.len(), "labelled issues");
        Ok(ids)
    }
}

impl PullRequests for GhCli {
    #[instrument(skip_all, fields(branch = %branch))]
    fn find_for_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        let out = self.run_capture(&[
            "pr", "list", "--head", branch, "--state", "open", "--json", "number,url",
        ])?;
        parse_pr_list(&out).context("parse pull request list")
    }

    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create(&self, request: &PrRequest) -> Result<PullRequest> {
        let out = self.run_capture(&[
            "pr",
            "create",
            "--head",
            &request.head,
            "--base",
            &request.base,
            "--title",
            &request.title,
            "--body",
            &request.body,
        ])?;
        let url = out
            .lines()
            .map(str::trim)
            .rfind(|line| line.starts_with("http"))
            .ok_or_else(|| anyhow!("gh pr create printed no URL: {}", out.trim()))?;
        let pr = pull_request_from_url(url)?;
        info!(number = pr.number, url = %pr.url, "pull request created");
        Ok(pr)
    }
}

#[derive(Debug, Deserialize)]
struct IssueView {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueNumber {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PrEntry {
    number: u64,
    url: String,
}

fn parse_issue_view(json: &str) -> Result<Issue> {
    let view: IssueView = serde_json::from_str(json)?;
    Ok(Issue {
        id: IssueId::parse(&view.number.to_string())?,
        title: view.title,
        body: view.body.filter(|b| !b.trim().is_empty()),
    })
}

fn parse_issue_list(json: &str) -> Result<Vec<IssueId>> {
    let entries: Vec<IssueNumber> = serde_json::from_str(json)?;
    entries
        .iter()
        .map(|e| IssueId::parse(&e.number.to_string()))
        .collect()
}

fn parse_pr_list(json: &str) -> Result<Option<PullRequest>> {
    let entries: Vec<PrEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().next().map(|e| PullRequest {
        number: e.number,
        url: e.url,
    }))
}

fn pull_request_from_url(url: &str) -> Result<PullRequest> {
    let number = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| anyhow!("pull request URL has no number: {url}"))?;
    Ok(PullRequest {
        number,
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_view_with_empty_body_has_none() {
        let issue = parse_issue_view(r#"{"number": 7, "title": "add() subtracts", "body": ""}"#)
            .expect("parse");
        assert_eq!(issue.id.as_str(), "7");
        assert_eq!(issue.title, "add() subtracts");
        assert_eq!(issue.body, None);
    }

    #[test]
    fn issue_list_keeps_tracker_order() {
        let ids = parse_issue_list(r#"[{"number": 12}, {"number": 3}]"#).expect("parse");
        let ids: Vec<&str> = ids.iter().map(IssueId::as_str).collect();
        assert_eq!(ids, vec!["12", "3"]);
    }

    #[test]
    fn empty_pr_list_is_none() {
        assert_eq!(parse_pr_list("[]").expect("parse"), None);
        let pr = parse_pr_list(r#"[{"number": 5, "url": "https://github.com/o/r/pull/5"}]"#)
            .expect("parse")
            .expect("pr");
        assert_eq!(pr.number, 5);
    }

    #[test]
    fn number_is_read_from_pr_url() {
        let pr = pull_request_from_url("https://github.com/o/r/pull/42").expect("parse");
        assert_eq!(pr.number, 42);
        assert!(pull_request_from_url("https://github.com/o/r/pulls").is_err());
    }
}
