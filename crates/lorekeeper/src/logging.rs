//! Tracing subscriber setup for hosting applications

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{MemoryError, Result};

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info,lorekeeper=debug";

/// Install a formatted subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already installed.
pub fn try_init() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| MemoryError::Config(format!("Failed to install tracing subscriber: {e}")))
}
