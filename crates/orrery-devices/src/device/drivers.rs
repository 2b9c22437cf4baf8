/*!
 * Driver table: which device type an INDI driver provides.
 */
use std::collections::HashMap;

use tracing::warn;

use crate::device::{DeviceType, DriverInfo};

/// INDI `DRIVER_INTERFACE` bits
pub mod interface {
    /// Telescope
    pub const TELESCOPE: u32 = 1 << 0;
    /// CCD
    pub const CCD: u32 = 1 << 1;
    /// Focuser
    pub const FOCUSER: u32 = 1 << 3;
    /// Filter wheel
    pub const FILTER: u32 = 1 << 4;
    /// GPS
    pub const GPS: u32 = 1 << 6;
    /// Dust cap
    pub const DUSTCAP: u32 = 1 << 9;
    /// Light box
    pub const LIGHTBOX: u32 = 1 << 10;
    /// Rotator
    pub const ROTATOR: u32 = 1 << 12;
}

const BUILTIN_DRIVERS: &[(&str, DeviceType)] = &[
    ("indi_simulator_ccd", DeviceType::Camera),
    ("indi_simulator_guide", DeviceType::Camera),
    ("indi_asi_ccd", DeviceType::Camera),
    ("indi_asi_single_ccd", DeviceType::Camera),
    ("indi_qhy_ccd", DeviceType::Camera),
    ("indi_toupcam_ccd", DeviceType::Camera),
    ("indi_playerone_ccd", DeviceType::Camera),
    ("indi_svbony_ccd", DeviceType::Camera),
    ("indi_atik_ccd", DeviceType::Camera),
    ("indi_sx_ccd", DeviceType::Camera),
    ("indi_canon_ccd", DeviceType::Camera),
    ("indi_nikon_ccd", DeviceType::Camera),
    ("indi_sony_ccd", DeviceType::Camera),
    ("indi_gphoto_ccd", DeviceType::Camera),
    ("indi_v4l2_ccd", DeviceType::Camera),
    ("indi_simulator_telescope", DeviceType::Mount),
    ("indi_eqmod_telescope", DeviceType::Mount),
    ("indi_lx200generic", DeviceType::Mount),
    ("indi_lx200_OnStep", DeviceType::Mount),
    ("indi_lx200am5", DeviceType::Mount),
    ("indi_ioptronv3_telescope", DeviceType::Mount),
    ("indi_celestron_gps", DeviceType::Mount),
    ("indi_skywatcherAltAzMount", DeviceType::Mount),
    ("indi_synscan_telescope", DeviceType::Mount),
    ("indi_simulator_focus", DeviceType::Focuser),
    ("indi_asi_focuser", DeviceType::Focuser),
    ("indi_moonlite_focus", DeviceType::Focuser),
    ("indi_myfocuserpro2_focus", DeviceType::Focuser),
    ("indi_sesto_senso2_focus", DeviceType::Focuser),
    ("indi_deepskydad_af1_focus", DeviceType::Focuser),
    ("indi_simulator_wheel", DeviceType::FilterWheel),
    ("indi_asi_wheel", DeviceType::FilterWheel),
    ("indi_qhycfw2_wheel", DeviceType::FilterWheel),
    ("indi_sx_wheel", DeviceType::FilterWheel),
    ("indi_atik_wheel", DeviceType::FilterWheel),
    ("indi_simulator_rotator", DeviceType::Rotator),
    ("indi_nightcrawler_focus", DeviceType::Rotator),
    ("indi_falcon_rotator", DeviceType::Rotator),
    ("indi_simulator_gps", DeviceType::Gps),
    ("indi_gpsd", DeviceType::Gps),
    ("indi_gpsnmea", DeviceType::Gps),
    ("indi_simulator_lightpanel", DeviceType::LightBox),
    ("indi_flipflat", DeviceType::DustCap),
    ("indi_snapcap", DeviceType::DustCap),
    ("indi_deepskydad_fp", DeviceType::DustCap),
    ("indi_giotto", DeviceType::LightBox),
];

/// Maps driver executables to device types
#[derive(Debug, Clone)]
pub struct DriverTable {
    drivers: HashMap<String, DeviceType>,
}

impl Default for DriverTable {
    fn default() -> Self {
        Self {
            drivers: BUILTIN_DRIVERS
                .iter()
                .map(|(exec, device_type)| (exec.to_string(), *device_type))
                .collect(),
        }
    }
}

impl DriverTable {
    /// Built-in table extended by `overrides` (executable → type name)
    ///
    /// Entries with an unknown type name are logged and ignored.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut table = Self::default();
        for (exec, type_name) in overrides {
            match type_name.parse::<DeviceType>() {
                Ok(device_type) => table.insert(exec.clone(), device_type),
                Err(e) => warn!(driver = %exec, "Ignoring driver table entry: {}", e),
            }
        }
        table
    }

    /// Map an executable to a type
    pub fn insert<S: Into<String>>(&mut self, exec: S, device_type: DeviceType) {
        self.drivers.insert(exec.into(), device_type);
    }

    /// Type registered for an executable
    pub fn get(&self, exec: &str) -> Option<DeviceType> {
        self.drivers.get(exec).copied()
    }

    /// Type of the device a driver provides
    ///
    /// Looks the executable up first, then falls back to the interface
    /// bitmask, then to [`DeviceType::Generic`].
    pub fn resolve(&self, driver: &DriverInfo) -> DeviceType {
        if let Some(device_type) = self.get(&driver.exec) {
            return device_type;
        }
        from_interface(driver.interface).unwrap_or(DeviceType::Generic)
    }
}

fn from_interface(bits: u32) -> Option<DeviceType> {
    const ORDER: &[(u32, DeviceType)] = &[
        (interface::TELESCOPE, DeviceType::Mount),
        (interface::CCD, DeviceType::Camera),
        (interface::FILTER, DeviceType::FilterWheel),
        (interface::FOCUSER, DeviceType::Focuser),
        (interface::ROTATOR, DeviceType::Rotator),
        (interface::LIGHTBOX, DeviceType::LightBox),
        (interface::DUSTCAP, DeviceType::DustCap),
        (interface::GPS, DeviceType::Gps),
    ];

    ORDER
        .iter()
        .find(|(bit, _)| bits & bit != 0)
        .map(|(_, device_type)| *device_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(exec: &str, interface: u32) -> DriverInfo {
        DriverInfo {
            exec: exec.to_string(),
            interface,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolves_builtin_executables() {
        let table = DriverTable::default();
        assert_eq!(table.resolve(&driver("indi_simulator_ccd", 0)), DeviceType::Camera);
        assert_eq!(table.resolve(&driver("indi_eqmod_telescope", 0)), DeviceType::Mount);
        assert_eq!(table.resolve(&driver("indi_simulator_wheel", 0)), DeviceType::FilterWheel);
        assert_eq!(table.resolve(&driver("indi_gpsd", 0)), DeviceType::Gps);
    }

    #[test]
    fn test_falls_back_to_interface_bits() {
        let table = DriverTable::default();
        assert_eq!(
            table.resolve(&driver("indi_custom", interface::CCD | interface::FILTER)),
            DeviceType::Camera
        );
        assert_eq!(table.resolve(&driver("indi_custom", interface::FOCUSER)), DeviceType::Focuser);
        assert_eq!(table.resolve(&driver("indi_custom", 1 << 7)), DeviceType::Generic);
        assert_eq!(table.resolve(&driver("", 0)), DeviceType::Generic);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("indi_simulator_ccd".to_string(), "generic".to_string());
        overrides.insert("indi_my_wheel".to_string(), "filter_wheel".to_string());
        overrides.insert("indi_broken".to_string(), "toaster".to_string());

        let table = DriverTable::with_overrides(&overrides);
        assert_eq!(table.get("indi_simulator_ccd"), Some(DeviceType::Generic));
        assert_eq!(table.get("indi_my_wheel"), Some(DeviceType::FilterWheel));
        assert_eq!(table.get("indi_broken"), None);
    }
}
