/*!
 * Prelude module for Orrery Core.
 *
 * Re-exports the types most crates in the workspace import together.
 */

pub use crate::error::{Error, Result};

pub use crate::config::{
    AlpacaConfig, Config, ConfigBuilder, DiscoveryConfig, HubConfig, IndiConfig, LoggingConfig,
    SharedConfig,
};

pub use crate::utils::{
    duration_to_millis, lock, millis_to_duration, read_lock, spawn_and_log, with_timeout,
    write_lock,
};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
