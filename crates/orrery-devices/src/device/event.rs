/*!
 * Device events and their handlers.
 *
 * Devices report what changed as [`DeviceChange`]s; the owning client turns
 * them into [`DeviceEvent`]s carrying the device reference and hands them
 * to every registered [`DeviceEventHandler`] on the task that detected the
 * change.
 */
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

use orrery_core::utils::{read_lock, write_lock};

use crate::device::capability::{Frame, GeographicCoordinate, PierSide, SensorInfo};
use crate::device::{DeviceRef, DeviceType};
use crate::protocol::{PropertyState, VectorOp};

/// Connection state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    /// The instrument connected
    Connected,
    /// The instrument disconnected
    Disconnected,
    /// A connection attempt failed
    Failed,
}

/// Camera delta
#[derive(Debug, Clone, PartialEq)]
pub enum CameraChange {
    /// An exposure started
    ExposureStarted,
    /// Remaining exposure time in seconds
    ExposureProgress(f64),
    /// The exposure completed
    ExposureFinished,
    /// The exposure was aborted
    ExposureAborted,
    /// The exposure failed
    ExposureFailed,
    /// Supported exposure range changed
    ExposureRangeChanged {
        /// Shortest exposure in seconds
        min: f64,
        /// Longest exposure in seconds
        max: f64,
    },
    /// The camera reported a cooler
    CoolerDetected,
    /// Cooler switched on or off
    CoolerChanged(bool),
    /// Cooler power in percent
    CoolerPowerChanged(f64),
    /// Region of interest changed
    FrameChanged(Frame),
    /// Binning changed
    BinningChanged(u32, u32),
    /// Sensor geometry reported
    SensorChanged(SensorInfo),
    /// Gain changed
    GainChanged(f64),
    /// Offset changed
    OffsetChanged(f64),
    /// Available capture formats changed
    FrameFormatsChanged(Vec<String>),
    /// Image data arrived
    FrameCaptured {
        /// File suffix such as `.fits`
        format: String,
        /// Raw image bytes
        data: Bytes,
    },
}

/// Mount delta
#[derive(Debug, Clone, PartialEq)]
pub enum MountChange {
    /// Pointing changed
    CoordinatesChanged {
        /// Right ascension in hours
        ra: f64,
        /// Declination in degrees
        dec: f64,
    },
    /// Slewing started or stopped
    SlewingChanged(bool),
    /// The slew failed
    SlewFailed,
    /// Tracking switched on or off
    TrackingChanged(bool),
    /// Parked state changed
    ParkedChanged(bool),
    /// Parking started or stopped
    ParkingChanged(bool),
    /// Slew rates offered by the driver
    SlewRatesChanged(Vec<String>),
    /// Selected slew rate
    SlewRateChanged(String),
    /// Side of pier changed
    PierSideChanged(PierSide),
}

/// Focuser delta
#[derive(Debug, Clone, PartialEq)]
pub enum FocuserChange {
    /// Absolute position
    PositionChanged(i32),
    /// Motion started or stopped
    MovingChanged(bool),
    /// The move failed
    MoveFailed,
    /// Largest absolute position
    MaxPositionChanged(i32),
    /// Motion reversed or restored
    ReverseChanged(bool),
}

/// Filter wheel delta
#[derive(Debug, Clone, PartialEq)]
pub enum FilterWheelChange {
    /// Number of slots discovered
    SlotCountChanged(u32),
    /// Current 1-based slot
    PositionChanged(u32),
    /// Motion started or stopped
    MovingChanged(bool),
    /// Filter names changed
    NamesChanged(Vec<String>),
}

/// Rotator delta
#[derive(Debug, Clone, PartialEq)]
pub enum RotatorChange {
    /// Angle in degrees
    AngleChanged(f64),
    /// Motion started or stopped
    MovingChanged(bool),
    /// Supported angle range
    RangeChanged {
        /// Smallest angle
        min: f64,
        /// Largest angle
        max: f64,
    },
    /// Motion reversed or restored
    ReverseChanged(bool),
}

/// GPS delta
#[derive(Debug, Clone, PartialEq)]
pub enum GpsChange {
    /// Location changed
    CoordinateChanged(GeographicCoordinate),
    /// Time reported
    TimeChanged(DateTime<FixedOffset>),
}

/// Dust cap delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DustCapChange {
    /// Parked state changed
    ParkedChanged(bool),
    /// Parking started or stopped
    ParkingChanged(bool),
}

/// Light box delta
#[derive(Debug, Clone, PartialEq)]
pub enum LightBoxChange {
    /// Light switched on or off
    EnabledChanged(bool),
    /// Intensity changed
    IntensityChanged(f64),
    /// Supported intensity range
    RangeChanged {
        /// Smallest intensity
        min: f64,
        /// Largest intensity
        max: f64,
    },
}

/// Thermometer delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermometerChange {
    /// Temperature in °C
    TemperatureChanged(f64),
}

/// What changed in a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    /// A vector was declared or updated; emitted for every vector
    Vector {
        /// Vector name
        name: String,
        /// Declaration or update
        op: VectorOp,
        /// State after the frame
        state: PropertyState,
    },
    /// A vector was deleted
    Deleted {
        /// Vector name
        name: String,
    },
    /// Camera delta
    Camera(CameraChange),
    /// Mount delta
    Mount(MountChange),
    /// Focuser delta
    Focuser(FocuserChange),
    /// Filter wheel delta
    FilterWheel(FilterWheelChange),
    /// Rotator delta
    Rotator(RotatorChange),
    /// GPS delta
    Gps(GpsChange),
    /// Dust cap delta
    DustCap(DustCapChange),
    /// Light box delta
    LightBox(LightBoxChange),
    /// Thermometer delta
    Thermometer(ThermometerChange),
}

/// An event about one device
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device was registered under `device_type`
    Attached {
        /// The device
        device: DeviceRef,
        /// Type it was registered as
        device_type: DeviceType,
    },
    /// The device was unregistered from `device_type`
    Detached {
        /// The device
        device: DeviceRef,
        /// Type it was registered as
        device_type: DeviceType,
    },
    /// The instrument connected, disconnected or failed to connect
    ConnectionChanged {
        /// The device
        device: DeviceRef,
        /// Transition
        change: ConnectionChange,
    },
    /// A driver or server message; `device` is `None` for server-wide messages
    MessageReceived {
        /// The device
        device: Option<DeviceRef>,
        /// Message text
        text: String,
    },
    /// A property changed
    PropertyChanged {
        /// The device
        device: DeviceRef,
        /// Delta
        change: PropertyChange,
    },
}

impl DeviceEvent {
    /// The device the event is about
    pub fn device(&self) -> Option<&DeviceRef> {
        match self {
            DeviceEvent::Attached { device, .. }
            | DeviceEvent::Detached { device, .. }
            | DeviceEvent::ConnectionChanged { device, .. }
            | DeviceEvent::PropertyChanged { device, .. } => Some(device),
            DeviceEvent::MessageReceived { device, .. } => device.as_ref(),
        }
    }

    /// Name of the device the event is about
    pub fn device_name(&self) -> Option<&str> {
        self.device().map(|device| device.name())
    }

    /// Whether the event is a property change
    pub fn is_property_change(&self) -> bool {
        matches!(self, DeviceEvent::PropertyChanged { .. })
    }
}

/// A change detected by a device, not yet bound to its reference
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    /// Property delta
    Property(PropertyChange),
    /// Connection transition
    Connection(ConnectionChange),
    /// Driver message
    Message(String),
    /// The device gained a type
    Attach(DeviceType),
    /// The device lost a type
    Detach(DeviceType),
}

impl DeviceChange {
    /// Bind the change to its device
    pub fn into_event(self, device: DeviceRef) -> DeviceEvent {
        match self {
            DeviceChange::Property(change) => DeviceEvent::PropertyChanged { device, change },
            DeviceChange::Connection(change) => DeviceEvent::ConnectionChanged { device, change },
            DeviceChange::Message(text) => DeviceEvent::MessageReceived {
                device: Some(device),
                text,
            },
            DeviceChange::Attach(device_type) => DeviceEvent::Attached { device, device_type },
            DeviceChange::Detach(device_type) => DeviceEvent::Detached { device, device_type },
        }
    }
}

/// Receiver of device events
///
/// Handlers run synchronously on the reader or refresher task that detected
/// the change and must not block.
pub trait DeviceEventHandler: Send + Sync {
    /// Called for every event
    fn on_event_received(&self, event: &DeviceEvent);

    /// Called once when the client identified by `client` lost its connection
    fn on_connection_closed(&self, _client: Uuid) {}
}

impl<F> DeviceEventHandler for F
where
    F: Fn(&DeviceEvent) + Send + Sync,
{
    fn on_event_received(&self, event: &DeviceEvent) {
        self(event)
    }
}

/// Registered handlers of one client
#[derive(Default)]
pub struct EventHandlers {
    handlers: RwLock<Vec<Arc<dyn DeviceEventHandler>>>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers").field("handlers", &self.len()).finish()
    }
}

impl EventHandlers {
    /// Create an empty handler list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; registering the same handler twice has no effect
    pub fn register(&self, handler: Arc<dyn DeviceEventHandler>) {
        let mut handlers = write_lock(&self.handlers);
        if !handlers.iter().any(|h| same_handler(h, &handler)) {
            handlers.push(handler);
        }
    }

    /// Remove a handler
    pub fn unregister(&self, handler: &Arc<dyn DeviceEventHandler>) {
        write_lock(&self.handlers).retain(|h| !same_handler(h, handler));
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        read_lock(&self.handlers).len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every handler
    pub fn emit(&self, event: &DeviceEvent) {
        for handler in self.snapshot() {
            handler.on_event_received(event);
        }
    }

    /// Tell every handler the connection of `client` closed
    pub fn connection_closed(&self, client: Uuid) {
        for handler in self.snapshot() {
            handler.on_connection_closed(client);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn DeviceEventHandler>> {
        read_lock(&self.handlers).clone()
    }
}

fn same_handler(a: &Arc<dyn DeviceEventHandler>, b: &Arc<dyn DeviceEventHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_is_idempotent_and_unregister_removes() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let handler: Arc<dyn DeviceEventHandler> = {
            let count = count.clone();
            Arc::new(move |_: &DeviceEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        handlers.register(handler.clone());
        handlers.register(handler.clone());
        assert_eq!(handlers.len(), 1);

        let event = DeviceEvent::MessageReceived {
            device: None,
            text: "server restarting".to_string(),
        };
        handlers.emit(&event);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(event.device_name(), None);
        assert!(!event.is_property_change());

        handlers.unregister(&handler);
        handlers.emit(&event);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handlers.is_empty());
    }

    struct ClosedCounter(AtomicUsize);

    impl DeviceEventHandler for ClosedCounter {
        fn on_event_received(&self, _event: &DeviceEvent) {}

        fn on_connection_closed(&self, _client: Uuid) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_connection_closed_reaches_handlers() {
        let handlers = EventHandlers::new();
        let counter = Arc::new(ClosedCounter(AtomicUsize::new(0)));
        handlers.register(counter.clone());

        handlers.connection_closed(Uuid::new_v4());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_shows_handler_count() {
        let handlers = EventHandlers::new();
        handlers.register(Arc::new(ClosedCounter(AtomicUsize::new(0))));
        assert_eq!(format!("{handlers:?}"), "EventHandlers { handlers: 1 }");
    }
}
