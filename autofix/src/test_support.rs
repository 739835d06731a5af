//! Scripted fakes and temp workspaces for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{Attempt, Issue, IssueId};
use crate::io::attempt_log::AttemptLogger;
use crate::io::config::SnapshotConfig;
use crate::io::git::VersionControl;
use crate::io::github::{IssueTracker, PrRequest, PullRequest, PullRequests};
use crate::io::llm::{GenerationRequest, TextGenerator};
use crate::io::test_runner::{TestReport, TestRequest, TestRunner};
use crate::io::workspace::Workspace;

/// A temporary checkout populated with files.
pub struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = Self { dir };
        for (rel, content) in files {
            ws.write(rel, content);
        }
        ws
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Open a [`Workspace`] over the current files with default scan settings.
    pub fn open(&self) -> Workspace {
        Workspace::open(self.root(), &SnapshotConfig::default()).expect("open workspace")
    }

    /// A request for a command that is never spawned by the fakes.
    pub fn test_request(&self) -> TestRequest {
        TestRequest {
            workdir: self.root().to_path_buf(),
            command: vec!["true".to_string()],
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }
}

/// Returns queued pass/fail results in order and counts calls.
pub struct ScriptedTestRunner {
    outcomes: RefCell<VecDeque<(bool, String)>>,
    calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn new<S: Into<String>>(outcomes: Vec<(bool, S)>) -> Self {
        Self {
            outcomes: RefCell::new(
                outcomes
                    .into_iter()
                    .map(|(passed, output)| (passed, output.into()))
                    .collect(),
            ),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestReport> {
        self.calls.set(self.calls.get() + 1);
        let (passed, output) = self
            .outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted test outcome left"))?;
        Ok(TestReport {
            passed,
            output,
            timed_out: false,
        })
    }
}

/// Passes when a workspace file contains a marker, like a test suite
/// asserting on the code under test.
pub struct ContentTestRunner {
    file: PathBuf,
    marker: String,
    failure: String,
    calls: Cell<usize>,
}

impl ContentTestRunner {
    pub fn new(root: &Path, rel: &str, marker: &str, failure: &str) -> Self {
        Self {
            file: root.join(rel),
            marker: marker.to_string(),
            failure: failure.to_string(),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ContentTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestReport> {
        self.calls.set(self.calls.get() + 1);
        let content = fs::read_to_string(&self.file)?;
        let passed = content.contains(&self.marker);
        Ok(TestReport {
            passed,
            output: if passed {
                "# pass 1\n# fail 0\n".to_string()
            } else {
                self.failure.clone()
            },
            timed_out: false,
        })
    }
}

/// Returns queued responses and records every request.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted model response left"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    ResetBranch(String),
    StageAll,
    Commit(String),
    Push { remote: String, branch: String },
}

/// Records version control calls without touching git.
pub struct RecordingRepo {
    has_changes: bool,
    staged: Vec<String>,
    calls: RefCell<Vec<RepoCall>>,
}

impl RecordingRepo {
    /// `has_changes` decides whether `commit` reports a new commit.
    pub fn new(has_changes: bool) -> Self {
        Self {
            has_changes,
            staged: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Paths `stage_all` reports.
    pub fn with_staged(mut self, paths: &[&str]) -> Self {
        self.staged = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.calls.borrow().clone()
    }

    pub fn pushes(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, RepoCall::Push { .. }))
            .count()
    }

    pub fn commits(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, RepoCall::Commit(_)))
            .count()
    }
}

impl VersionControl for RecordingRepo {
    fn reset_branch(&self, branch: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(RepoCall::ResetBranch(branch.to_string()));
        Ok(())
    }

    fn stage_all(&self) -> Result<Vec<String>> {
        self.calls.borrow_mut().push(RepoCall::StageAll);
        Ok(self.staged.clone())
    }

    fn commit(&self, message: &str) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(RepoCall::Commit(message.to_string()));
        Ok(self.has_changes)
    }

    fn push_with_lease(&self, remote: &str, branch: &str) -> Result<()> {
        self.calls.borrow_mut().push(RepoCall::Push {
            remote: remote.to_string(),
            branch: branch.to_string(),
        });
        Ok(())
    }
}

/// In-memory pull requests keyed by head branch.
pub struct RecordingPulls {
    open: RefCell<Vec<(String, PullRequest)>>,
    created: RefCell<Vec<PrRequest>>,
    lookups: Cell<usize>,
}

impl RecordingPulls {
    /// `existing` is treated as open for any branch.
    pub fn new(existing: Option<PullRequest>) -> Self {
        Self {
            open: RefCell::new(
                existing
                    .into_iter()
                    .map(|pr| (String::new(), pr))
                    .collect(),
            ),
            created: RefCell::new(Vec::new()),
            lookups: Cell::new(0),
        }
    }

    pub fn created(&self) -> Vec<PrRequest> {
        self.created.borrow().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }
}

impl PullRequests for RecordingPulls {
    fn find_for_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        self.lookups.set(self.lookups.get() + 1);
        Ok(self
            .open
            .borrow()
            .iter()
            .find(|(head, _)| head.is_empty() || head == branch)
            .map(|(_, pr)| pr.clone()))
    }

    fn create(&self, request: &PrRequest) -> Result<PullRequest> {
        let number = self.created.borrow().len() as u64 + 100;
        let pr = PullRequest {
            number,
            url: format!("https://github.com/example/repo/pull/{number}"),
        };
        self.created.borrow_mut().push(request.clone());
        self.open
            .borrow_mut()
            .push((request.head.clone(), pr.clone()));
        Ok(pr)
    }
}

/// Issues served from memory. Every issue counts as carrying the label.
pub struct StaticIssues {
    issues: Vec<Issue>,
}

impl StaticIssues {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }
}

impl IssueTracker for StaticIssues {
    fn fetch_issue(&self, id: &IssueId) -> Result<Issue> {
        self.issues
            .iter()
            .find(|issue| &issue.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("issue {id} not found"))
    }

    fn open_issues_with_label(&self, _label: &str) -> Result<Vec<IssueId>> {
        Ok(self.issues.iter().map(|issue| issue.id.clone()).collect())
    }
}

/// Discards attempt artifacts.
pub struct NullAttemptLog;

impl AttemptLogger for NullAttemptLog {
    fn record(
        &self,
        _attempt: &Attempt,
        _test_log: &str,
        _response: Option<&str>,
        _duration_ms: u64,
    ) -> Result<()> {
        Ok(())
    }
}

/// Build an issue with a numeric id.
pub fn issue(id: &str, title: &str, body: Option<&str>) -> Issue {
    Issue {
        id: IssueId::parse(id).expect("issue id"),
        title: title.to_string(),
        body: body.map(str::to_string),
    }
}
