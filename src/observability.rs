//! Logging setup for both subcommands.
//!
//! Events go to stderr so that `reviewgate token` can print the credential
//! alone on stdout. `RUST_LOG` overrides the default `info` filter.
//! Initialization is guarded by `OnceLock` so repeated calls are harmless.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGING_INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// Returns `false` if another subscriber was installed first, in which case
/// events go there instead.
#[must_use]
pub fn init_logging() -> bool {
    *LOGGING_INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    })
}
