//! Diagnostic tracing for engine runs.
//!
//! Events go to stderr so that stdout stays reserved for emitted skill
//! invocations. Verbosity comes from `RUST_LOG`:
//!
//! - `warn` (default): failed deliberation attempts.
//! - `info`: summaries, rejected updates, emitted skills.
//! - `debug`: every decision, commit, and deliberator call.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "warn";

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "olthad=info" } else { DEFAULT_DIRECTIVE })
    })
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=olthad=debug olthad run --task "Acquire iron"
/// ```
pub fn init(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
