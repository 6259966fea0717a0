//! Structured logging for the controller.
//!
//! Log lines and the ledger document are the two things a caller observes.
//! Logs go to stderr so `conductor status` and `conductor rank` output stays
//! clean on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `conductor=info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor run --once
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conductor=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
