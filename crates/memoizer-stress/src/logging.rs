use std::panic;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Logs to stderr, filtered by `RUST_LOG` and defaulting to warnings only.
///
/// Workloads panic on purpose, so panics are logged at `trace` instead of being printed.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    panic::set_hook(Box::new(|info| {
        tracing::trace!(panic = %info, "Workload panicked");
    }));
}
