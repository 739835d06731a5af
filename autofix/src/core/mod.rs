//! Deterministic, pure logic shared by the repair pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and return deterministic outputs suitable for tests.

pub mod branch;
pub mod diff;
pub mod heuristic;
pub mod machine;
pub mod model_output;
pub mod snapshot;
pub mod types;
