//! One invocation end to end: pick an issue, scaffold tests, repair, publish.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::branch::branch_name;
use crate::core::machine::RepairMachine;
use crate::core::types::IssueId;
use crate::io::attempt_log::DiskAttemptLog;
use crate::io::config::AutofixConfig;
use crate::io::git::VersionControl;
use crate::io::github::{IssueTracker, PullRequests};
use crate::io::llm::TextGenerator;
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::io::workspace::Workspace;
use crate::publish::{PublishOutcome, PublishRequest, publish};
use crate::repair::RepairLoop;
use crate::scaffold::{ScaffoldReport, scaffold_tests};
use crate::strategy::default_plan;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit issue; otherwise the first open issue with the label.
    pub issue: Option<IssueId>,
    /// Overrides `trigger_label`.
    pub label: Option<String>,
    /// Scaffold and repair, but do not publish.
    pub dry_run: bool,
}

/// External services one run talks to.
pub struct Services<'a> {
    pub issues: &'a dyn IssueTracker,
    pub prs: &'a dyn PullRequests,
    pub vcs: &'a dyn VersionControl,
    pub tests: &'a dyn TestRunner,
    pub generator: Option<&'a dyn TextGenerator>,
}

/// How a run ended when it did not fail.
///
/// An exhausted repair loop is an error ([`crate::error::FixError::Exhausted`]),
/// not an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded {
        issue: IssueId,
        passing_attempt: u32,
        attempts: usize,
        /// `None` on a dry run.
        publish: Option<PublishOutcome>,
    },
    NoIssuesFound {
        label: String,
    },
}

#[instrument(skip_all, fields(root = %root.display(), dry_run = options.dry_run))]
pub fn run_issue(
    root: &Path,
    cfg: &AutofixConfig,
    options: &RunOptions,
    services: &Services<'_>,
) -> Result<RunOutcome> {
    let label = options
        .label
        .clone()
        .unwrap_or_else(|| cfg.trigger_label.clone());
    let id = match &options.issue {
        Some(id) => id.clone(),
        None => {
            let open = services
                .issues
                .open_issues_with_label(&label)
                .with_context(|| format!("list open issues labelled {label}"))?;
            match open.into_iter().next() {
                Some(id) => id,
                None => {
                    info!(%label, "no open issues carry the trigger label");
                    return Ok(RunOutcome::NoIssuesFound { label });
                }
            }
        }
    };

    let issue = services
        .issues
        .fetch_issue(&id)
        .with_context(|| format!("fetch issue {id}"))?;
    info!(issue = %issue.id, title = %issue.title, "selected issue");

    let plan = default_plan(cfg);
    let mut machine = RepairMachine::new(cfg.attempt_budget);
    let mut ws = Workspace::open(root, &cfg.snapshot)?;

    let scaffold = scaffold_tests(
        &mut ws,
        Some(&issue),
        &cfg.scaffold,
        &cfg.model,
        services.generator,
    )
    .context("scaffold tests")?;
    info!(
        written = scaffold.written.len(),
        skipped = scaffold.skipped.len(),
        "scaffolding finished"
    );
    machine.scaffolded()?;

    let log = DiskAttemptLog::open(root, &issue.id)?;
    let test_request = TestRequest::from_config(root, &cfg.tests);
    let repair = RepairLoop {
        plan: &plan,
        tests: services.tests,
        test_request: &test_request,
        generator: services.generator,
        log: &log,
    };
    let success = repair.run(&mut machine, &mut ws, &issue)?;

    let branch = branch_name(&cfg.branch_prefix, &issue.id);
    let publish_outcome = if options.dry_run {
        info!(%branch, "dry run, not publishing");
        None
    } else {
        let outcome = publish(
            services.vcs,
            services.prs,
            &PublishRequest {
                issue: &issue,
                branch,
                base_branch: &cfg.base_branch,
                remote: &cfg.remote,
                attempts: &success.attempts,
            },
        )?;
        machine.published()?;
        Some(outcome)
    };

    Ok(RunOutcome::Succeeded {
        issue: issue.id,
        passing_attempt: success.passing,
        attempts: success.attempts.len(),
        publish: publish_outcome,
    })
}

/// Scaffold tests without an issue (the `scaffold` command).
pub fn run_scaffold(
    root: &Path,
    cfg: &AutofixConfig,
    generator: Option<&dyn TextGenerator>,
) -> Result<ScaffoldReport> {
    let mut ws = Workspace::open(root, &cfg.snapshot)?;
    scaffold_tests(&mut ws, None, &cfg.scaffold, &cfg.model, generator)
}
