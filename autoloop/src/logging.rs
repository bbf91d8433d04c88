//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Not persisted and not part of a run's record.
//!
//! - **Run artifacts (`io/progress_log`, `io/session_log`)**: `progress.md`
//!   and `.autoloop/sessions/<n>/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`.
///
/// # Example
/// ```bash
/// RUST_LOG=autoloop=debug autoloop run --max-sessions 1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
