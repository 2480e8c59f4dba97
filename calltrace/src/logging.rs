//! Diagnostic logging setup.
//!
//! The tracer reports swallowed failures and exports through `tracing`. A
//! library never installs a subscriber on its own; binaries and tests that
//! want to see those messages call [`init_tracing`].

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `error,calltrace=info`. Safe to call more than once, and a no-op when the
/// program already installed a subscriber.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => match EnvFilter::try_new("error,calltrace=info") {
                Ok(filter) => filter,
                Err(_) => EnvFilter::new("error"),
            },
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
