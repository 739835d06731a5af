//! Side-effecting adapters: filesystem, subprocesses, network.

pub mod attempt_log;
pub mod config;
pub mod git;
pub mod github;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod test_runner;
pub mod workspace;
