/*!
 * Orrery Devices
 *
 * This crate provides the protocol side of the Orrery runtime: the INDI
 * message model and XML codec, the transports that carry it, typed INDI and
 * ASCOM Alpaca devices behind one [`Device`] model, and Alpaca UDP discovery.
 */

#![warn(missing_docs)]

// Re-export core types
pub use orrery_core::prelude;

pub mod error;
pub mod protocol;
pub mod transport;
pub mod device;
pub mod indi;
pub mod discovery;
pub mod alpaca;

pub use device::{Device, DeviceEvent, DeviceEventHandler, DeviceRef, DeviceType, DriverInfo};
pub use error::{DeviceError, ProtocolError, Result};
pub use indi::IndiClient;
pub use alpaca::AlpacaClient;
pub use discovery::{AlpacaDiscovery, DiscoveredServer, DiscoveryListener};

/// Orrery devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<()> {
    tracing::info!("Orrery Devices {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        tokio_test::assert_ok!(init());
        assert!(!VERSION.is_empty());
    }
}
