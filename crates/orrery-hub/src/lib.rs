/*!
 * Orrery Hub
 *
 * This crate sits between the device clients and their consumers. It
 * forwards device events downstream, coalescing property updates so each
 * listened-to device produces at most one update per throttle period.
 */

#![warn(missing_docs)]

// Re-export core types
pub use orrery_core::prelude;

pub mod error;
pub mod hub;

pub use error::{Error, Result};
pub use hub::EventHub;

use orrery_core::config::SharedConfig;

/// Orrery hub crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the hub
pub fn init() -> Result<()> {
    tracing::info!("Orrery Hub {} initialized", VERSION);
    Ok(())
}

/// Initialize logging from a loaded configuration, then the hub
pub fn init_with_config(config: &SharedConfig) -> Result<()> {
    orrery_core::init_with_config(config.get())?;
    init()
}
