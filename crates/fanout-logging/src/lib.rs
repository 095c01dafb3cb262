//! # fanout-logging
//!
//! Structured logging for fanout workers, built on `tracing`.
//!
//! - [`init_subscriber`] / [`try_init_subscriber`] install the global
//!   subscriber: an `EnvFilter` (`RUST_LOG` wins over the configured level)
//!   and a compact or JSON `fmt` layer on stderr.
//! - [`capture_logs`] installs a thread-local capturing subscriber so tests
//!   can assert on emitted events.

#![deny(unsafe_code)]

pub mod test_utils;

use fanout_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Fallback directive when the configured level does not parse.
const FALLBACK_LEVEL: &str = "info";

/// Build the event filter: `RUST_LOG` if set, else the configured level.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_subscriber(settings: &LoggingSettings) {
    // set_global_default is a no-op if already set
    let _ = try_init_subscriber(settings);
}

/// Initialize the global tracing subscriber, reporting whether one was
/// already installed.
pub fn try_init_subscriber(settings: &LoggingSettings) -> Result<(), TryInitError> {
    let filter = build_filter(&settings.level);

    let json_layer = settings.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!settings.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        // Multiple calls should be safe (no-op after first)
        init_subscriber(&LoggingSettings::default());
        init_subscriber(&LoggingSettings {
            level: "debug".to_string(),
            json: true,
        });
    }

    #[test]
    fn second_try_init_reports_error() {
        init_subscriber(&LoggingSettings::default());
        assert!(try_init_subscriber(&LoggingSettings::default()).is_err());
    }

    #[test]
    fn invalid_level_falls_back() {
        let filter = build_filter("not a [valid directive");
        // RUST_LOG may be set in the environment running the tests
        assert!(!filter.to_string().is_empty());
    }
}
