//! Tracing subscriber setup.
//!
//! `RUST_LOG` controls the filter (default `info`). The output format comes
//! from [`LoggingSettings::format`]: `"json"` emits one JSON object per event,
//! anything else uses the human-readable formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{AppError, Result};

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if settings.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    installed.map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {}", e)))?;

    tracing::info!(format = %settings.format, "Tracing initialized");
    Ok(())
}
