//! Process-wide tracing setup for the CLI.
//!
//! Diagnostics go to stderr so stdout stays reserved for command output
//! (result JSON, thread ids). Core logic never depends on a subscriber being
//! installed.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `fixloop=info,warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=fixloop=debug fixloop run "print the first ten primes"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fixloop=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
