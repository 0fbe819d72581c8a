//! Logging bootstrap.
//!
//! Every crate in the workspace logs through `tracing`. Binaries and tests
//! that want to see the output install a subscriber once with
//! [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`]. Returns `false` if a global subscriber was already
/// installed, so calling it more than once is harmless.
pub fn init_tracing() -> bool {
    init_tracing_with(DEFAULT_FILTER)
}

/// Like [`init_tracing`] with a custom fallback filter such as
/// `"strata_engine=debug"`.
pub fn init_tracing_with(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
