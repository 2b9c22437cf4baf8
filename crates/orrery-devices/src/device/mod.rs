/*!
 * Device model shared by INDI and Alpaca devices.
 *
 * A [`Device`] is the protocol independent view of one instrument: identity,
 * connection state, driver information and a snapshot of its properties.
 * What an instrument can actually do is expressed through independent
 * capability traits (see [`capability`]) that a device exposes through the
 * `as_*` accessors.
 */
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Vector;

pub mod capability;
pub mod drivers;
pub mod event;

pub use capability::{
    Camera, DustCap, FilterWheel, Focuser, Frame, GeographicCoordinate, Gps, LightBox, Mount,
    MotionDirection, PierSide, Rotator, SensorInfo, Thermometer,
};
pub use drivers::DriverTable;
pub use event::{
    CameraChange, ConnectionChange, DeviceChange, DeviceEvent, DeviceEventHandler, DustCapChange,
    EventHandlers, FilterWheelChange, FocuserChange, GpsChange, LightBoxChange, MountChange,
    PropertyChange, RotatorChange, ThermometerChange,
};

/// Kind of instrument a device is registered as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Imaging camera
    Camera,
    /// Telescope mount
    Mount,
    /// Focuser
    Focuser,
    /// Filter wheel
    FilterWheel,
    /// Field rotator
    Rotator,
    /// GPS receiver
    Gps,
    /// Motorized dust cap
    DustCap,
    /// Flat field light box
    LightBox,
    /// Temperature sensor
    Thermometer,
    /// Device of unknown kind
    Generic,
}

impl DeviceType {
    /// Lowercase name, also accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Camera => "camera",
            DeviceType::Mount => "mount",
            DeviceType::Focuser => "focuser",
            DeviceType::FilterWheel => "filter_wheel",
            DeviceType::Rotator => "rotator",
            DeviceType::Gps => "gps",
            DeviceType::DustCap => "dust_cap",
            DeviceType::LightBox => "light_box",
            DeviceType::Thermometer => "thermometer",
            DeviceType::Generic => "generic",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "camera" | "ccd" => Ok(DeviceType::Camera),
            "mount" | "telescope" => Ok(DeviceType::Mount),
            "focuser" => Ok(DeviceType::Focuser),
            "filter_wheel" | "filterwheel" | "wheel" => Ok(DeviceType::FilterWheel),
            "rotator" => Ok(DeviceType::Rotator),
            "gps" => Ok(DeviceType::Gps),
            "dust_cap" | "dustcap" | "covercalibrator" => Ok(DeviceType::DustCap),
            "light_box" | "lightbox" | "flat_panel" => Ok(DeviceType::LightBox),
            "thermometer" => Ok(DeviceType::Thermometer),
            "generic" => Ok(DeviceType::Generic),
            _ => Err(format!("Unknown device type: {}", s)),
        }
    }
}

/// Driver identification reported by the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Driver display name
    pub name: String,
    /// Executable name, e.g. `indi_simulator_ccd`
    pub exec: String,
    /// Driver version
    pub version: String,
    /// INDI interface bitmask
    pub interface: u32,
}

impl DriverInfo {
    /// Read a `DRIVER_INFO` text vector
    pub fn from_vector(vector: &Vector) -> Self {
        Self {
            name: vector.text("DRIVER_NAME").unwrap_or_default().to_string(),
            exec: vector.text("DRIVER_EXEC").unwrap_or_default().to_string(),
            version: vector.text("DRIVER_VERSION").unwrap_or_default().to_string(),
            interface: vector
                .text("DRIVER_INTERFACE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
        }
    }
}

/// Shared handle to a device
pub type DeviceRef = Arc<dyn Device>;

/// Protocol independent view of an instrument
///
/// All accessors return snapshots. Commands never block: they are queued
/// to the owning connection and their outcome is reported through
/// [`DeviceEvent`]s.
pub trait Device: Send + Sync + Debug {
    /// Unique device name
    fn name(&self) -> &str;

    /// Unique id assigned when the device was created
    fn id(&self) -> Uuid;

    /// Primary type of the device
    fn device_type(&self) -> DeviceType;

    /// Whether the instrument is connected
    fn is_connected(&self) -> bool;

    /// Driver identification
    fn driver(&self) -> DriverInfo;

    /// Snapshot of every property
    fn properties(&self) -> Vec<Vector>;

    /// Snapshot of one property
    fn property(&self, name: &str) -> Option<Vector>;

    /// Driver messages, most recent first
    fn messages(&self) -> Vec<String>;

    /// Ask the instrument to connect
    fn connect(&self);

    /// Ask the instrument to disconnect
    fn disconnect(&self);

    /// Camera capability
    fn as_camera(&self) -> Option<&dyn Camera> {
        None
    }

    /// Mount capability
    fn as_mount(&self) -> Option<&dyn Mount> {
        None
    }

    /// Focuser capability
    fn as_focuser(&self) -> Option<&dyn Focuser> {
        None
    }

    /// Filter wheel capability
    fn as_filter_wheel(&self) -> Option<&dyn FilterWheel> {
        None
    }

    /// Rotator capability
    fn as_rotator(&self) -> Option<&dyn Rotator> {
        None
    }

    /// GPS capability
    fn as_gps(&self) -> Option<&dyn Gps> {
        None
    }

    /// Dust cap capability
    fn as_dust_cap(&self) -> Option<&dyn DustCap> {
        None
    }

    /// Light box capability
    fn as_light_box(&self) -> Option<&dyn LightBox> {
        None
    }

    /// Thermometer capability
    fn as_thermometer(&self) -> Option<&dyn Thermometer> {
        None
    }
}
