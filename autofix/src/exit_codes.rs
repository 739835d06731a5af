//! Stable exit codes for `autofix` commands.

/// Command succeeded, or no issue carried the trigger label.
pub const OK: i32 = 0;
/// Invalid configuration, missing credential, or any other error.
pub const INVALID: i32 = 1;
/// The repair loop used its whole attempt budget without passing tests.
pub const EXHAUSTED: i32 = 2;
