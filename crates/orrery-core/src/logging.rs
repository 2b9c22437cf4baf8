/*!
 * Logging functionality for Orrery.
 *
 * This module provides tracing setup and span helpers used by the INDI
 * client, the Alpaca bridge and the event hub.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "orrery_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system from a [`LoggingConfig`]
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.json_format {
        return init_with_filter(&config.level);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for a device task (reader, refresher)
///
/// # Arguments
///
/// * `task` - The kind of task
/// * `device` - The device or connection the task serves
pub fn device_span(task: &str, device: &str) -> Span {
    tracing::info_span!("device", task = %task, device = %device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // A second global subscriber in the same process is rejected, which is fine here
        let _ = init();
        assert!(init().is_err());
    }

    #[test]
    fn test_component_span() {
        let span = component_span("indi-client", Some("localhost:7624"));
        let _guard = span.enter();

        let span = component_span("hub", None);
        let _guard = span.enter();
    }

    #[test]
    fn test_device_span() {
        let span = device_span("refresher", "ZWO EAF");
        let _guard = span.enter();
    }
}
