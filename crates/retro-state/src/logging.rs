//! Log output setup

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Returns false when
/// a subscriber was already installed.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
