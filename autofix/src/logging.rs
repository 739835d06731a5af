//! Tracing setup for diagnostics.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. Attempt
//! artifacts under `.autofix/runs/` are written independently of it (see
//! [`crate::io::attempt_log`]).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "autofix=info,warn";
const VERBOSE_FILTER: &str = "autofix=debug,warn";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` when set; otherwise uses `autofix=info` (or
/// `autofix=debug` when `verbose`). Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=autofix=trace autofix run --issue 42
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
