//! Diagnostic tracing for `pnp`.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate
//! from the run's product output (`events.jsonl`, `changes.log` and the
//! error envelope under the log directory), which is always written.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=pnp=debug pnp run --push
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .init();
}
