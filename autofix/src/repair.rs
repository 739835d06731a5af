//! The repair loop: ordered attempts, a test run after each, stop at the
//! first pass.
//!
//! Every attempt, including one whose strategy changed nothing or failed to
//! produce a usable patch, is followed by a test run. The newest failing
//! output is what the next attempt sees. Configuration errors and a test
//! suite that cannot be started end the run; everything else a strategy
//! reports is recorded on the attempt and the loop moves on.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, instrument, warn};

use crate::core::machine::{RepairMachine, RepairState};
use crate::core::types::{Attempt, Issue};
use crate::error::FixError;
use crate::io::attempt_log::AttemptLogger;
use crate::io::llm::TextGenerator;
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::io::workspace::Workspace;
use crate::strategy::{AttemptContext, PatchReport, PatchStrategy};

/// Attempts up to and including the passing one.
#[derive(Debug, Clone)]
pub struct RepairSuccess {
    pub attempts: Vec<Attempt>,
    /// Ordinal of the attempt whose tests passed.
    pub passing: u32,
}

/// Collaborators for one repair loop.
pub struct RepairLoop<'a> {
    pub plan: &'a [PatchStrategy],
    pub tests: &'a dyn TestRunner,
    pub test_request: &'a TestRequest,
    pub generator: Option<&'a dyn TextGenerator>,
    pub log: &'a dyn AttemptLogger,
}

impl RepairLoop<'_> {
    /// Drive `machine` from `Scaffolded` to `Passed` or `Exhausted`.
    ///
    /// Exhaustion is returned as [`FixError::Exhausted`] carrying the last
    /// test output.
    #[instrument(skip_all, fields(issue = %issue.id, budget = self.plan.len()))]
    pub fn run(
        &self,
        machine: &mut RepairMachine,
        ws: &mut Workspace,
        issue: &Issue,
    ) -> Result<RepairSuccess> {
        if machine.budget() as usize != self.plan.len() {
            bail!(
                "attempt budget {} does not match {} planned strategies",
                machine.budget(),
                self.plan.len()
            );
        }
        machine.begin()?;

        let mut attempts = Vec::new();
        let mut last_failure: Option<String> = None;
        let mut errors: Vec<String> = Vec::new();

        loop {
            let RepairState::Attempt(ordinal) = machine.state() else {
                return Err(anyhow!("repair loop in unexpected state {:?}", machine.state()));
            };
            let strategy = &self.plan[(ordinal - 1) as usize];
            info!(attempt = ordinal, strategy = strategy.kind().as_str(), "starting attempt");
            let started = Instant::now();

            let ctx = AttemptContext {
                issue,
                ordinal,
                budget: machine.budget(),
                last_failure: last_failure.as_deref(),
                prior_errors: &errors,
            };
            let output = strategy.apply(&ctx, ws, self.generator);
            let (changes, attempt_error) = match output.result {
                Ok(PatchReport::Changed(changes)) => (changes, None),
                Ok(PatchReport::Unchanged) => (BTreeMap::new(), None),
                Err(err) => {
                    if matches!(err.downcast_ref::<FixError>(), Some(FixError::Config { .. })) {
                        return Err(err);
                    }
                    let message = format!("{err:#}");
                    warn!(attempt = ordinal, error = %message, "attempt produced no usable patch");
                    (BTreeMap::new(), Some(message))
                }
            };
            if let Some(message) = &attempt_error {
                errors.push(format!("attempt {ordinal}: {message}"));
            }

            let report = self
                .tests
                .run(self.test_request)
                .with_context(|| format!("run tests after attempt {ordinal}"))?;
            let attempt = Attempt {
                ordinal,
                strategy: strategy.kind(),
                changes,
                outcome: report.outcome(),
                failure_output: (!report.passed).then(|| report.output.clone()),
                error: attempt_error,
            };
            info!(
                attempt = ordinal,
                passed = report.passed,
                timed_out = report.timed_out,
                "tests finished"
            );

            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            if let Err(err) = self.log.record(
                &attempt,
                &report.output,
                output.response.as_deref(),
                duration_ms,
            ) {
                warn!(
                    attempt = ordinal,
                    error = %format!("{err:#}"),
                    "failed to write attempt log"
                );
            }

            let next = machine.observe(attempt.outcome)?;
            if !report.passed {
                last_failure = Some(report.output);
            }
            attempts.push(attempt);

            match next {
                RepairState::Passed(passing) => {
                    info!(attempt = passing, "tests pass");
                    return Ok(RepairSuccess { attempts, passing });
                }
                RepairState::Attempt(_) => {}
                RepairState::Exhausted => {
                    error!(attempts = ordinal, "attempt budget exhausted");
                    return Err(FixError::Exhausted {
                        attempts: ordinal,
                        last_output: last_failure.unwrap_or_default(),
                    }
                    .into());
                }
                other => bail!("repair loop reached unexpected state {other:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IssueId, StrategyKind};
    use crate::io::config::AutofixConfig;
    use crate::strategy::default_plan;
    use crate::test_support::{
        NullAttemptLog, ScriptedGenerator, ScriptedTestRunner, TempWorkspace,
    };

    fn issue() -> Issue {
        Issue {
            id: IssueId::parse("3").expect("id"),
            title: "totals are off".to_string(),
            body: None,
        }
    }

    fn scaffolded(budget: u32) -> RepairMachine {
        let mut machine = RepairMachine::new(budget);
        machine.scaffolded().expect("scaffold");
        machine
    }

    #[test]
    fn errored_attempt_is_recorded_and_loop_continues() {
        let temp =
            TempWorkspace::with_files(&[("src/math.js", "export const add = (a, b) => a - b;\n")]);
        let mut ws = temp.open();
        let plan = default_plan(&AutofixConfig::default());
        let tests = ScriptedTestRunner::new(vec![
            (false, "expected 5, got -1"),
            (false, "expected 5, got -1"),
            (true, "ok"),
        ]);
        let generator = ScriptedGenerator::new(vec![
            "I believe the problem is the minus sign.",
            "=== FILE: src/math.js ===\nexport const add = (a, b) => a + b;\n=== END ===\n",
        ]);
        let request = temp.test_request();
        let repair = RepairLoop {
            plan: &plan,
            tests: &tests,
            test_request: &request,
            generator: Some(&generator),
            log: &NullAttemptLog,
        };

        let mut machine = scaffolded(3);
        let success = repair.run(&mut machine, &mut ws, &issue()).expect("repair");
        assert_eq!(success.passing, 3);
        assert_eq!(success.attempts[0].strategy, StrategyKind::Heuristic);
        assert!(success.attempts[1].error.as_deref().is_some_and(|e| e.contains("parse")));
        assert_eq!(success.attempts[2].changed_paths(), vec!["src/math.js"]);

        let requests = generator.requests();
        assert!(requests[1].turns[0].content.contains("attempt 2: "));
        assert_eq!(machine.state(), RepairState::Passed(3));
    }

    #[test]
    fn missing_model_client_is_fatal() {
        let temp = TempWorkspace::with_files(&[("src/math.js", "x\n")]);
        let mut ws = temp.open();
        let plan = default_plan(&AutofixConfig::default());
        let tests = ScriptedTestRunner::new(vec![(false, "fail"), (false, "fail")]);
        let request = temp.test_request();
        let repair = RepairLoop {
            plan: &plan,
            tests: &tests,
            test_request: &request,
            generator: None,
            log: &NullAttemptLog,
        };

        let err = repair
            .run(&mut scaffolded(3), &mut ws, &issue())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FixError>(),
            Some(FixError::Config { .. })
        ));
        assert_eq!(tests.calls(), 1);
    }

    #[test]
    fn budget_must_match_plan() {
        let temp = TempWorkspace::with_files(&[("src/math.js", "x\n")]);
        let mut ws = temp.open();
        let plan = default_plan(&AutofixConfig::default());
        let tests = ScriptedTestRunner::new(Vec::<(bool, &str)>::new());
        let request = temp.test_request();
        let repair = RepairLoop {
            plan: &plan,
            tests: &tests,
            test_request: &request,
            generator: None,
            log: &NullAttemptLog,
        };
        assert!(repair.run(&mut scaffolded(2), &mut ws, &issue()).is_err());
    }
}
