//! Typed failures that callers need to tell apart.
//!
//! Everything else travels as plain `anyhow::Error` with context. These
//! variants are wrapped in `anyhow::Error` too and recovered with
//! `downcast_ref` where the distinction matters (attempt handling in the
//! repair loop, exit codes in `main`).

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum FixError {
    /// Missing credential, missing expected file, or invalid configuration.
    /// Never retried.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A model response contained no accepted output shape.
    #[error("could not parse model response: {reason}")]
    Parse { reason: String, raw: String },

    /// A patch could not be applied in full; nothing was written.
    #[error("could not apply patch to {}: {reason}", path.display())]
    Apply { path: PathBuf, reason: String },

    /// Every attempt in the budget finished with failing tests.
    #[error("repair loop exhausted after {attempts} attempt(s) without passing tests")]
    Exhausted { attempts: u32, last_output: String },
}

impl FixError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn apply(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Apply {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// What `main` prints for a failed command, and the exit code it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub exit_code: i32,
    /// Full error chain.
    pub message: String,
    /// Last test output for exhaustion, raw response for a parse failure.
    pub detail: Option<String>,
}

impl FailureReport {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        match err.downcast_ref::<FixError>() {
            Some(FixError::Exhausted { last_output, .. }) => Self {
                exit_code: exit_codes::EXHAUSTED,
                message,
                detail: Some(format!(
                    "--- last test output ---\n{}",
                    last_output.trim_end()
                )),
            },
            Some(FixError::Parse { raw, .. }) => Self {
                exit_code: exit_codes::INVALID,
                message,
                detail: Some(format!("--- raw model response ---\n{}", raw.trim_end())),
            },
            _ => Self {
                exit_code: exit_codes::INVALID,
                message,
                detail: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn exhaustion_exits_with_two_and_shows_last_output() {
        let err = anyhow::Error::new(FixError::Exhausted {
            attempts: 3,
            last_output: "not ok 1 - add\n".to_string(),
        })
        .context("repair issue #7");
        let report = FailureReport::from_error(&err);
        assert_eq!(report.exit_code, exit_codes::EXHAUSTED);
        assert_eq!(
            report.detail.as_deref(),
            Some("--- last test output ---\nnot ok 1 - add")
        );
    }

    #[test]
    fn parse_failure_shows_raw_response_through_context() {
        let err = Err::<(), _>(FixError::parse("no code", "I cannot help with that."))
            .context("scaffold tests")
            .unwrap_err();
        let report = FailureReport::from_error(&err);
        assert_eq!(report.exit_code, exit_codes::INVALID);
        assert!(report.message.starts_with("scaffold tests: "));
        assert_eq!(
            report.detail.as_deref(),
            Some("--- raw model response ---\nI cannot help with that.")
        );
    }

    #[test]
    fn other_errors_exit_with_one() {
        let report = FailureReport::from_error(&anyhow::anyhow!("gh issue view failed"));
        assert_eq!(report.exit_code, exit_codes::INVALID);
        assert_eq!(report.detail, None);
    }

    #[test]
    fn exhausted_is_recoverable_from_anyhow() {
        let err = anyhow::Error::new(FixError::Exhausted {
            attempts: 3,
            last_output: "1 failing".to_string(),
        });
        let recovered = err.downcast_ref::<FixError>().expect("downcast");
        assert!(matches!(recovered, FixError::Exhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn apply_message_names_the_path() {
        let err = FixError::apply("src/math.js", "hunk 2 did not match");
        assert_eq!(
            err.to_string(),
            "could not apply patch to src/math.js: hunk 2 did not match"
        );
    }
}
