//! Utilities for collecting and reporting telemetry data.

use tracing::{subscriber::SetGlobalDefaultError, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Registry};

/// Install a global `tracing` subscriber that logs at `level` (or whatever
/// `RUST_LOG` overrides it with).
///
/// Logs are written as JSON when `json` is set and in the human readable
/// format otherwise. Returns an error if a global subscriber already exists.
pub fn init(level: Level, json: bool) -> Result<(), SetGlobalDefaultError> {
    // Create a filter layer that defaults to the requested level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    // Create fmt layers for logging (only one is active)
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_line_number(true)
            .with_file(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    // Set the global subscriber
    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);
    tracing::subscriber::set_global_default(subscriber)
}
