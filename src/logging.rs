//! Logging bootstrap for the command-line front-end.
//!
//! Library modules log through the `log` facade; this installs a
//! tracing subscriber that captures those records and filters them via
//! the `SCT_LOG` environment variable (`error`, `warn`, `info`,
//! `debug`, `trace`, or any tracing directive string).

use std::sync::Once;

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "SCT_LOG";

static INIT: Once = Once::new();

/// Install the subscriber once; later calls are no-ops, so embedding
/// applications that bring their own subscriber can skip this.
pub fn init_logging() {
    INIT.call_once(|| {
        // The library logs through the `log` facade; route those
        // records into tracing. Fails only when another global logger
        // is already installed, in which case that one wins.
        let _ = LogTracer::init();

        let filter =
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    });
}
