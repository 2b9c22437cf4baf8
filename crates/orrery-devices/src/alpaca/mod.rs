/*!
 * ASCOM Alpaca bridge.
 *
 * Alpaca servers are polled rather than pushing updates. Each attached
 * device runs a refresher task that compares every polled value with its
 * cache and raises the same [`DeviceEvent`](crate::device::DeviceEvent)s
 * an INDI device would.
 */

#[macro_use]
pub mod device;
pub mod camera;
pub mod client;
pub mod filter_wheel;
pub mod focuser;
pub mod mount;
pub mod service;

pub use camera::AlpacaCamera;
pub use client::AlpacaClient;
pub use device::AscomCore;
pub use filter_wheel::AlpacaFilterWheel;
pub use focuser::AlpacaFocuser;
pub use mount::AlpacaMount;
pub use service::{AlpacaResponse, AlpacaService, ConfiguredDevice};
