/*!
 * Capability traits.
 *
 * Getters return the last value reported by the instrument. Commands are
 * fire-and-forget and silently do nothing when the instrument lacks the
 * capability or the argument is out of range.
 */
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Region of interest of a camera sensor, in unbinned pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Sensor geometry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel width in microns
    pub pixel_size_x: f64,
    /// Pixel height in microns
    pub pixel_size_y: f64,
    /// Bits per pixel
    pub bits_per_pixel: u32,
}

/// Site location
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeographicCoordinate {
    /// Latitude in degrees, north positive
    pub latitude: f64,
    /// Longitude in degrees, east positive
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: f64,
}

/// Side of pier of a German equatorial mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PierSide {
    /// Pointing east
    East,
    /// Pointing west
    West,
    /// Not reported
    #[default]
    Unknown,
}

/// Manual motion direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionDirection {
    /// Towards the celestial north pole
    North,
    /// Towards the celestial south pole
    South,
    /// East
    East,
    /// West
    West,
}

/// Imaging camera
pub trait Camera: Send + Sync {
    /// Whether an exposure is in progress
    fn is_exposuring(&self) -> bool;
    /// Remaining exposure time in seconds
    fn exposure_remaining(&self) -> f64;
    /// Shortest and longest supported exposure in seconds
    fn exposure_range(&self) -> (f64, f64);
    /// Whether the camera has a controllable cooler
    fn has_cooler(&self) -> bool;
    /// Whether the cooler is on
    fn is_cooler_on(&self) -> bool;
    /// Cooler power in percent
    fn cooler_power(&self) -> f64;
    /// Current region of interest
    fn frame(&self) -> Frame;
    /// Horizontal and vertical binning
    fn binning(&self) -> (u32, u32);
    /// Sensor geometry
    fn sensor(&self) -> SensorInfo;
    /// Gain, when supported
    fn gain(&self) -> Option<f64>;
    /// Offset, when supported
    fn offset(&self) -> Option<f64>;
    /// Capture formats offered by the driver
    fn frame_formats(&self) -> Vec<String>;

    /// Start an exposure of `duration` seconds
    fn start_capture(&self, duration: f64);
    /// Abort the running exposure
    fn abort_capture(&self);
    /// Switch the cooler on or off
    fn set_cooler(&self, enabled: bool);
    /// Set the target sensor temperature in °C
    fn set_target_temperature(&self, temperature: f64);
    /// Set the region of interest
    fn set_frame(&self, frame: Frame);
    /// Set the binning
    fn set_binning(&self, x: u32, y: u32);
    /// Set the gain
    fn set_gain(&self, gain: f64);
    /// Set the offset
    fn set_offset(&self, offset: f64);
    /// Select a capture format by name
    fn set_frame_format(&self, format: &str);
}

/// Telescope mount
pub trait Mount: Send + Sync {
    /// Right ascension of date in hours
    fn right_ascension(&self) -> f64;
    /// Declination of date in degrees
    fn declination(&self) -> f64;
    /// Whether the mount is slewing
    fn is_slewing(&self) -> bool;
    /// Whether the mount is tracking
    fn is_tracking(&self) -> bool;
    /// Whether the mount is parked
    fn is_parked(&self) -> bool;
    /// Whether the mount is parking
    fn is_parking(&self) -> bool;
    /// Whether the mount can park
    fn can_park(&self) -> bool;
    /// Whether the mount accepts sync
    fn can_sync(&self) -> bool;
    /// Available slew rates
    fn slew_rates(&self) -> Vec<String>;
    /// Selected slew rate
    fn slew_rate(&self) -> Option<String>;
    /// Side of pier
    fn pier_side(&self) -> PierSide;

    /// Slew to the coordinates and track
    fn goto(&self, ra: f64, dec: f64);
    /// Slew to the coordinates and stop
    fn slew(&self, ra: f64, dec: f64);
    /// Declare the current pointing to be the coordinates
    fn sync(&self, ra: f64, dec: f64);
    /// Park
    fn park(&self);
    /// Unpark
    fn unpark(&self);
    /// Stop any motion
    fn abort(&self);
    /// Enable or disable tracking
    fn set_tracking(&self, enabled: bool);
    /// Select a slew rate by name
    fn set_slew_rate(&self, rate: &str);
    /// Start or stop manual motion
    fn move_axis(&self, direction: MotionDirection, enabled: bool);
    /// Set the site location
    fn set_coordinates(&self, coordinate: GeographicCoordinate);
}

/// Focuser
pub trait Focuser: Send + Sync {
    /// Absolute position in steps
    fn position(&self) -> i32;
    /// Whether the focuser is moving
    fn is_moving(&self) -> bool;
    /// Largest absolute position
    fn max_position(&self) -> i32;
    /// Whether absolute moves are supported
    fn can_absolute_move(&self) -> bool;
    /// Whether relative moves are supported
    fn can_relative_move(&self) -> bool;
    /// Whether a move can be aborted
    fn can_abort(&self) -> bool;
    /// Whether the motion can be reversed
    fn can_reverse(&self) -> bool;
    /// Whether the position can be synced
    fn can_sync(&self) -> bool;
    /// Whether the motion is reversed
    fn is_reversed(&self) -> bool;

    /// Move inward by `steps`
    fn move_in(&self, steps: u32);
    /// Move outward by `steps`
    fn move_out(&self, steps: u32);
    /// Move to an absolute position
    fn move_to(&self, position: i32);
    /// Stop moving
    fn abort(&self);
    /// Reverse the motion
    fn reverse(&self, enabled: bool);
    /// Declare the current position
    fn sync(&self, position: i32);
}

/// Filter wheel
pub trait FilterWheel: Send + Sync {
    /// Number of slots, 0 until known
    fn slot_count(&self) -> u32;
    /// Current slot, 1-based
    fn position(&self) -> u32;
    /// Whether the wheel is moving
    fn is_moving(&self) -> bool;
    /// Filter names by slot
    fn names(&self) -> Vec<String>;

    /// Move to a 1-based slot; ignored outside `1..=slot_count`
    fn move_to(&self, slot: u32);
    /// Rename the filters
    fn set_names(&self, names: &[String]);
}

/// Field rotator
pub trait Rotator: Send + Sync {
    /// Angle in degrees
    fn angle(&self) -> f64;
    /// Smallest and largest angle
    fn angle_range(&self) -> (f64, f64);
    /// Whether the rotator is moving
    fn is_moving(&self) -> bool;
    /// Whether a move can be aborted
    fn can_abort(&self) -> bool;
    /// Whether the rotator can home
    fn can_home(&self) -> bool;
    /// Whether the motion can be reversed
    fn can_reverse(&self) -> bool;
    /// Whether the angle can be synced
    fn can_sync(&self) -> bool;
    /// Whether the motion is reversed
    fn is_reversed(&self) -> bool;

    /// Rotate to an angle
    fn move_to(&self, angle: f64);
    /// Declare the current angle
    fn sync(&self, angle: f64);
    /// Move to the home position
    fn home(&self);
    /// Reverse the motion
    fn reverse(&self, enabled: bool);
    /// Stop moving
    fn abort(&self);
}

/// GPS receiver, or a mount reporting its site
pub trait Gps: Send + Sync {
    /// Whether a location source was found
    fn has_gps(&self) -> bool;
    /// Last reported location
    fn coordinates(&self) -> GeographicCoordinate;
    /// Last reported time
    fn time(&self) -> Option<DateTime<FixedOffset>>;
}

/// Motorized dust cap
pub trait DustCap: Send + Sync {
    /// Whether the cap can park
    fn can_park(&self) -> bool;
    /// Whether the cap is closed
    fn is_parked(&self) -> bool;
    /// Whether the cap is moving
    fn is_parking(&self) -> bool;

    /// Close
    fn park(&self);
    /// Open
    fn unpark(&self);
}

/// Flat field light box
pub trait LightBox: Send + Sync {
    /// Whether the light is on
    fn is_enabled(&self) -> bool;
    /// Intensity
    fn intensity(&self) -> f64;
    /// Smallest and largest intensity
    fn intensity_range(&self) -> (f64, f64);

    /// Turn the light on
    fn enable(&self);
    /// Turn the light off
    fn disable(&self);
    /// Set the intensity, clamped to the supported range
    fn set_intensity(&self, intensity: f64);
}

/// Temperature sensor
pub trait Thermometer: Send + Sync {
    /// Whether a temperature source was found
    fn has_thermometer(&self) -> bool;
    /// Temperature in °C
    fn temperature(&self) -> f64;
}
