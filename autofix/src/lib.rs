//! Single-issue repair pipeline: fetch an issue, make sure tests exist, try
//! to patch the code until the test suite passes, then open a pull request.
//!
//! The crate keeps the same split as a deterministic agent runner:
//!
//! - **[`core`]**: Pure logic (heuristic rewrite, diff application, model
//!   output parsing, the repair state machine). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, git, `gh`, the model
//!   API, the workspace on disk). Each sits behind a trait so tests can
//!   substitute scripted fakes.
//!
//! Orchestration modules ([`scaffold`], [`strategy`], [`repair`], [`publish`],
//! [`run`]) wire core logic to the adapters.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod publish;
pub mod repair;
pub mod run;
pub mod scaffold;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
