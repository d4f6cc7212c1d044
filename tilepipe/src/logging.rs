//! Logging initialization helper.
//!
//! The pipeline logs through `tracing` and works under whatever subscriber
//! the embedding application installs. This helper offers a reasonable
//! default for applications that have none: a compact fmt layer filtered
//! by `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the default subscriber.
///
/// Returns `false` when a global subscriber is already set, in which case
/// nothing changes; calling this is always safe.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
