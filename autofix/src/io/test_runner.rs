//! Test suite execution.
//!
//! The test command always runs in capture mode: a failing run is an expected
//! outcome whose output becomes input for the next repair attempt.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::TestOutcome;
use crate::io::config::TestsConfig;
use crate::io::process::run_captured;

/// Parameters for one test run.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl TestRequest {
    pub fn from_config(workdir: impl Into<PathBuf>, cfg: &TestsConfig) -> Self {
        Self {
            workdir: workdir.into(),
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

/// Result of one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    /// Combined stdout/stderr.
    pub output: String,
    pub timed_out: bool,
}

impl TestReport {
    pub fn outcome(&self) -> TestOutcome {
        if self.passed {
            TestOutcome::Pass
        } else {
            TestOutcome::Fail
        }
    }
}

/// Runs the project's test suite.
///
/// An `Err` means the suite could not be run at all (e.g. the command is
/// missing); failing tests are an `Ok` report with `passed: false`.
pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestReport>;
}

/// Runs the configured test command as a subprocess.
#[derive(Debug, Default, Clone)]
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(command = ?request.command))]
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = run_captured(cmd, request.timeout, request.output_limit_bytes)?;
        let report = TestReport {
            passed: output.success(),
            output: output.combined("tests"),
            timed_out: output.timed_out,
        };
        debug!(passed = report.passed, timed_out = report.timed_out, "test run finished");
        Ok(report)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(script: &str) -> TestRequest {
        let temp = std::env::temp_dir();
        TestRequest {
            workdir: temp,
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn passing_command_reports_pass() {
        let report = CommandTestRunner.run(&request("echo ok")).expect("run");
        assert!(report.passed);
        assert_eq!(report.outcome(), TestOutcome::Pass);
    }

    #[test]
    fn failing_command_keeps_output() {
        let report = CommandTestRunner
            .run(&request("echo 'expected 3, got -1' >&2; exit 1"))
            .expect("run");
        assert!(!report.passed);
        assert!(report.output.contains("expected 3, got -1"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut req = request("");
        req.command = vec!["autofix-definitely-missing-binary".to_string()];
        assert!(CommandTestRunner.run(&req).is_err());
    }
}
