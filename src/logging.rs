//! Structured logging for the provider process.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host reads.
//! `RUST_LOG` selects what is shown, e.g.
//!
//! ```bash
//! RUST_LOG=hemmer_provider_squadcast=debug hemmer-provider-squadcast
//! ```

use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter from `RUST_LOG`, or `default_level` when unset or unparsable.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(env_filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the global subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different default level.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}
