/*!
 * INDI devices and the client that owns them.
 *
 * Every INDI device is built around an [`IndiDeviceCore`] holding the
 * property map, connection flag and message log. Typed devices add a
 * table from vector name to handler; the `indi_device!` macro wires a
 * typed device into the [`Device`] and [`IndiDevice`] traits.
 */
use std::sync::Arc;

use crate::device::{Device, DeviceChange, DeviceRef, DeviceType};
use crate::protocol::IndiMessage;

#[macro_use]
pub mod base;
pub mod camera;
pub mod client;
pub mod dust_cap;
pub mod filter_wheel;
pub mod focuser;
pub mod generic;
pub mod gps;
pub mod light_box;
pub mod mount;
pub mod rotator;

pub use base::IndiDeviceCore;
pub use camera::IndiCamera;
pub use client::IndiClient;
pub use dust_cap::IndiDustCap;
pub use filter_wheel::IndiFilterWheel;
pub use focuser::IndiFocuser;
pub use generic::IndiGenericDevice;
pub use gps::IndiGps;
pub use light_box::IndiLightBox;
pub use mount::IndiMount;
pub use rotator::IndiRotator;

/// A device fed by an INDI message stream
pub trait IndiDevice: Device {
    /// Shared state
    fn core(&self) -> &IndiDeviceCore;

    /// Apply one frame addressed to this device and report what changed
    fn handle_message(&self, message: &IndiMessage) -> Vec<DeviceChange>;
}

/// Build the typed device for `device_type`
///
/// Types without a dedicated INDI implementation become an
/// [`IndiGenericDevice`].
pub fn create_device(
    device_type: DeviceType,
    core: IndiDeviceCore,
) -> (DeviceRef, Arc<dyn IndiDevice>) {
    fn share<T: IndiDevice + 'static>(device: T) -> (DeviceRef, Arc<dyn IndiDevice>) {
        let device = Arc::new(device);
        (device.clone(), device)
    }

    match device_type {
        DeviceType::Camera => share(IndiCamera::new(core)),
        DeviceType::Mount => share(IndiMount::new(core)),
        DeviceType::Focuser => share(IndiFocuser::new(core)),
        DeviceType::FilterWheel => share(IndiFilterWheel::new(core)),
        DeviceType::Rotator => share(IndiRotator::new(core)),
        DeviceType::Gps => share(IndiGps::new(core)),
        DeviceType::DustCap => share(IndiDustCap::new(core)),
        DeviceType::LightBox => share(IndiLightBox::new(core)),
        DeviceType::Thermometer | DeviceType::Generic => share(IndiGenericDevice::new(core)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indi::base::tests::core;

    #[test]
    fn test_create_device_types() {
        for device_type in [
            DeviceType::Camera,
            DeviceType::Mount,
            DeviceType::Focuser,
            DeviceType::FilterWheel,
            DeviceType::Rotator,
            DeviceType::Gps,
            DeviceType::DustCap,
            DeviceType::LightBox,
            DeviceType::Generic,
        ] {
            let (core, _rx) = core("Device");
            let (device, indi) = create_device(device_type, core);
            assert_eq!(device.device_type(), device_type);
            assert_eq!(device.id(), indi.core().id());
        }

        let (core, _rx) = core("Sensor");
        let (device, _) = create_device(DeviceType::Thermometer, core);
        assert_eq!(device.device_type(), DeviceType::Generic);
    }

    #[test]
    fn test_capabilities_match_type() {
        let (wheel_core, _wheel_rx) = core("Wheel");
        let (device, _) = create_device(DeviceType::FilterWheel, wheel_core);
        assert!(device.as_filter_wheel().is_some());
        assert!(device.as_camera().is_none());

        let (mount_core, _mount_rx) = core("Telescope");
        let (device, _) = create_device(DeviceType::Mount, mount_core);
        assert!(device.as_mount().is_some());
        assert!(device.as_gps().is_some());
    }
}
