//! Diagnostic logging.
//!
//! User-facing progress goes to stdout through localized, colored messages;
//! diagnostics (readiness polling, state transitions, best-effort failures)
//! are `tracing` events written to stderr.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init_logging(verbose: bool) {
    LOGGING.get_or_init(|| {
        let default_directive = if verbose {
            "xmpp_e2e_matrix=debug"
        } else {
            "xmpp_e2e_matrix=warn"
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        // Another subscriber may already be installed by an embedding program.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
