//! Repair loop state machine.
//!
//! ```text
//! Init -> Scaffolded -> Attempt(1) -> { Passed, Attempt(2) } -> ... -> { Published, Exhausted }
//! ```
//!
//! A pass at any attempt goes straight to `Passed`; a failure advances to the
//! next attempt until the budget is used, then to `Exhausted`. `Published`
//! is only reachable from `Passed`.

use thiserror::Error;

use crate::core::types::TestOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    /// Issue fetched, nothing else done.
    Init,
    /// Test scaffolding ran. Required before the first attempt.
    Scaffolded,
    /// Attempt `k` (1-based) is in progress.
    Attempt(u32),
    /// Attempt `k` passed the tests.
    Passed(u32),
    /// Changes pushed and a pull request exists.
    Published,
    /// All attempts failed.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repair transition: {event} while {from:?}")]
pub struct InvalidTransition {
    pub from: RepairState,
    pub event: &'static str,
}

/// Tracks the current [`RepairState`] for a fixed attempt budget.
#[derive(Debug, Clone)]
pub struct RepairMachine {
    budget: u32,
    state: RepairState,
}

impl RepairMachine {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            state: RepairState::Init,
        }
    }

    pub fn state(&self) -> RepairState {
        self.state
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// `Init -> Scaffolded`.
    pub fn scaffolded(&mut self) -> Result<RepairState, InvalidTransition> {
        self.transition("scaffolded", |state| match state {
            RepairState::Init => Some(RepairState::Scaffolded),
            _ => None,
        })
    }

    /// `Scaffolded -> Attempt(1)`. Fails when the budget is zero.
    pub fn begin(&mut self) -> Result<RepairState, InvalidTransition> {
        let budget = self.budget;
        self.transition("begin", |state| match state {
            RepairState::Scaffolded if budget > 0 => Some(RepairState::Attempt(1)),
            _ => None,
        })
    }

    /// Record the test outcome of the current attempt.
    ///
    /// `Attempt(k)` + pass -> `Passed(k)`; + fail -> `Attempt(k + 1)` while
    /// `k < budget`, otherwise `Exhausted`.
    pub fn observe(&mut self, outcome: TestOutcome) -> Result<RepairState, InvalidTransition> {
        let budget = self.budget;
        self.transition("observe", |state| match (state, outcome) {
            (RepairState::Attempt(k), TestOutcome::Pass) => Some(RepairState::Passed(k)),
            (RepairState::Attempt(k), TestOutcome::Fail) if k < budget => {
                Some(RepairState::Attempt(k + 1))
            }
            (RepairState::Attempt(_), TestOutcome::Fail) => Some(RepairState::Exhausted),
            _ => None,
        })
    }

    /// `Passed -> Published`.
    pub fn published(&mut self) -> Result<RepairState, InvalidTransition> {
        self.transition("published", |state| match state {
            RepairState::Passed(_) => Some(RepairState::Published),
            _ => None,
        })
    }

    fn transition(
        &mut self,
        event: &'static str,
        next: impl FnOnce(RepairState) -> Option<RepairState>,
    ) -> Result<RepairState, InvalidTransition> {
        let from = self.state;
        let to = next(from).ok_or(InvalidTransition { from, event })?;
        self.state = to;
        Ok(to)
    }
}
