//! Tracing infrastructure.
//!
//! Structured, async-aware logging via `tracing` and `tracing-subscriber`.
//! The filter is taken from `RUST_LOG` when set, otherwise from the
//! configured log level, so an operator can always crank verbosity without
//! editing the settings document.

use crate::config::Settings;
use crate::error::{GradError, GradResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber from settings.
///
/// Returns an error if a subscriber is already installed.
pub fn init(settings: &Settings) -> GradResult<()> {
    init_with_level(&settings.application.log_level)
}

/// Initialize the global tracing subscriber with an explicit default level.
pub fn init_with_level(level: &str) -> GradResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| GradError::Logging(e.to_string()))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| GradError::Logging(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        // An invalid directive should surface as a logging error, not a panic.
        let result = init_with_level("=");
        assert!(matches!(result, Err(GradError::Logging(_))));
    }
}
