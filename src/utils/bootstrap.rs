//! Bootstrap utilities for herald binaries and embedding applications.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_ENV_VAR;

/// Filter from the HERALD_LOG environment variable, "info" when unset or invalid.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing with HERALD_LOG environment variable.
///
/// Defaults to "info" level if HERALD_LOG is not set. Panics if a global
/// subscriber is already installed.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like `init_tracing`, but fails instead of panicking when a global
/// subscriber is already installed.
pub fn try_init_tracing() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
