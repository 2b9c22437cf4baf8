//! INDI camera.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};
use tracing::{debug, warn};

use crate::device::{
    Camera, CameraChange, ConnectionChange, DeviceChange, DeviceType, Frame, PropertyChange,
    SensorInfo, Thermometer, ThermometerChange,
};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{BlobPolicy, PropertyState, Vector};

#[derive(Debug, Default)]
struct CameraState {
    exposure_state: PropertyState,
    exposuring: bool,
    remaining: f64,
    exposure_min: f64,
    exposure_max: f64,
    can_abort: bool,
    has_cooler: bool,
    cooler_on: bool,
    cooler_power: f64,
    has_thermometer: bool,
    temperature: f64,
    frame: Frame,
    binning: (u32, u32),
    sensor: SensorInfo,
    gain: Option<f64>,
    offset: Option<f64>,
    frame_formats: Vec<String>,
}

/// Camera driven over INDI
#[derive(Debug)]
pub struct IndiCamera {
    core: IndiDeviceCore,
    state: RwLock<CameraState>,
}

const HANDLERS: &[(&str, Handler<IndiCamera>)] = &[
    ("CONNECTION", IndiCamera::on_connection),
    ("CCD_EXPOSURE", IndiCamera::on_exposure),
    ("CCD_ABORT_EXPOSURE", IndiCamera::on_abort_exposure),
    ("CCD_COOLER", IndiCamera::on_cooler),
    ("CCD_COOLER_POWER", IndiCamera::on_cooler_power),
    ("CCD_TEMPERATURE", IndiCamera::on_temperature),
    ("CCD_FRAME", IndiCamera::on_frame),
    ("CCD_BINNING", IndiCamera::on_binning),
    ("CCD_INFO", IndiCamera::on_info),
    ("CCD_CAPTURE_FORMAT", IndiCamera::on_capture_format),
    ("CCD_GAIN", IndiCamera::on_gain),
    ("CCD_OFFSET", IndiCamera::on_offset),
    ("CCD1", IndiCamera::on_image),
];

indi_device!(
    IndiCamera,
    DeviceType::Camera,
    HANDLERS,
    as_camera => Camera,
    as_thermometer => Thermometer,
);

fn camera(change: CameraChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Camera(change))
}

impl IndiCamera {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(CameraState::default()),
        }
    }

    fn on_connection(&self, _vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if changes.contains(&DeviceChange::Connection(ConnectionChange::Connected)) {
            debug!(device = %self.core.name(), "Requesting BLOBs");
            self.core.enable_blob(BlobPolicy::Also);
        }
    }

    fn on_exposure(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(element) = vector.number_element("CCD_EXPOSURE_VALUE") else {
            return;
        };
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            state.exposure_min = element.min;
            state.exposure_max = element.max;
            changes.push(camera(CameraChange::ExposureRangeChanged {
                min: element.min,
                max: element.max,
            }));
        }

        let previous = state.exposure_state;
        state.exposure_state = vector.state;

        if matches!(vector.state, PropertyState::Busy | PropertyState::Ok) {
            state.remaining = element.value;
            changes.push(camera(CameraChange::ExposureProgress(element.value)));
        }

        let was_exposuring = state.exposuring;
        state.exposuring = vector.state == PropertyState::Busy;
        if state.exposuring && !was_exposuring {
            changes.push(camera(CameraChange::ExposureStarted));
        }

        match vector.state {
            PropertyState::Idle if previous == PropertyState::Busy || was_exposuring => {
                changes.push(camera(CameraChange::ExposureAborted));
            }
            PropertyState::Ok if previous == PropertyState::Busy => {
                changes.push(camera(CameraChange::ExposureFinished));
            }
            PropertyState::Alert if previous != PropertyState::Alert => {
                changes.push(camera(CameraChange::ExposureFailed));
            }
            _ => {}
        }
    }

    fn on_abort_exposure(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_abort = true;
        }
    }

    fn on_cooler(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() && !state.has_cooler {
            state.has_cooler = true;
            changes.push(camera(CameraChange::CoolerDetected));
        }

        let cooler_on = vector.switch("COOLER_ON").unwrap_or(false);
        if state.cooler_on != cooler_on {
            state.cooler_on = cooler_on;
            changes.push(camera(CameraChange::CoolerChanged(cooler_on)));
        }
    }

    fn on_cooler_power(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if let Some(power) = vector.number("CCD_COOLER_VALUE") {
            let mut state = write_lock(&self.state);
            if state.cooler_power != power {
                state.cooler_power = power;
                changes.push(camera(CameraChange::CoolerPowerChanged(power)));
            }
        }
    }

    fn on_temperature(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() && !state.has_thermometer {
            state.has_thermometer = true;
            changes.push(DeviceChange::Attach(DeviceType::Thermometer));
        }

        if let Some(temperature) = vector.number("CCD_TEMPERATURE_VALUE") {
            state.temperature = temperature;
            changes.push(DeviceChange::Property(PropertyChange::Thermometer(
                ThermometerChange::TemperatureChanged(temperature),
            )));
        }
    }

    fn on_frame(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let value = |name| vector.number(name).unwrap_or_default().max(0.0) as u32;
        let frame = Frame {
            x: value("X"),
            y: value("Y"),
            width: value("WIDTH"),
            height: value("HEIGHT"),
        };

        let mut state = write_lock(&self.state);
        if state.frame != frame {
            state.frame = frame;
            changes.push(camera(CameraChange::FrameChanged(frame)));
        }
    }

    fn on_binning(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let value = |name| vector.number(name).unwrap_or(1.0).max(1.0) as u32;
        let binning = (value("HOR_BIN"), value("VER_BIN"));

        let mut state = write_lock(&self.state);
        if state.binning != binning {
            state.binning = binning;
            changes.push(camera(CameraChange::BinningChanged(binning.0, binning.1)));
        }
    }

    fn on_info(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let value = |name| vector.number(name).unwrap_or_default();
        let sensor = SensorInfo {
            width: value("CCD_MAX_X") as u32,
            height: value("CCD_MAX_Y") as u32,
            pixel_size_x: value("CCD_PIXEL_SIZE_X"),
            pixel_size_y: value("CCD_PIXEL_SIZE_Y"),
            bits_per_pixel: value("CCD_BITSPERPIXEL") as u32,
        };

        let mut state = write_lock(&self.state);
        if state.sensor != sensor {
            state.sensor = sensor;
            changes.push(camera(CameraChange::SensorChanged(sensor)));
        }
    }

    fn on_capture_format(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            let formats: Vec<String> =
                vector.elements.names().into_iter().map(str::to_string).collect();
            write_lock(&self.state).frame_formats = formats.clone();
            changes.push(camera(CameraChange::FrameFormatsChanged(formats)));
        }
    }

    fn on_gain(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if let Some(gain) = vector.number("GAIN") {
            let mut state = write_lock(&self.state);
            if state.gain != Some(gain) {
                state.gain = Some(gain);
                changes.push(camera(CameraChange::GainChanged(gain)));
            }
        }
    }

    fn on_offset(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if let Some(offset) = vector.number("OFFSET") {
            let mut state = write_lock(&self.state);
            if state.offset != Some(offset) {
                state.offset = Some(offset);
                changes.push(camera(CameraChange::OffsetChanged(offset)));
            }
        }
    }

    fn on_image(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            return;
        }
        let Some(blob) = vector.blob("CCD1") else {
            return;
        };
        if blob.value.is_empty() {
            return;
        }

        match blob.decode() {
            Ok(data) => {
                debug!(
                    device = %self.core.name(),
                    format = %blob.format,
                    size = data.len(),
                    "Frame received"
                );
                changes.push(camera(CameraChange::FrameCaptured {
                    format: blob.format.clone(),
                    data,
                }));
            }
            Err(e) => warn!(device = %self.core.name(), "Dropping frame: {}", e),
        }
    }
}

impl Camera for IndiCamera {
    fn is_exposuring(&self) -> bool {
        read_lock(&self.state).exposuring
    }

    fn exposure_remaining(&self) -> f64 {
        read_lock(&self.state).remaining
    }

    fn exposure_range(&self) -> (f64, f64) {
        let state = read_lock(&self.state);
        (state.exposure_min, state.exposure_max)
    }

    fn has_cooler(&self) -> bool {
        read_lock(&self.state).has_cooler
    }

    fn is_cooler_on(&self) -> bool {
        read_lock(&self.state).cooler_on
    }

    fn cooler_power(&self) -> f64 {
        read_lock(&self.state).cooler_power
    }

    fn frame(&self) -> Frame {
        read_lock(&self.state).frame
    }

    fn binning(&self) -> (u32, u32) {
        read_lock(&self.state).binning
    }

    fn sensor(&self) -> SensorInfo {
        read_lock(&self.state).sensor
    }

    fn gain(&self) -> Option<f64> {
        read_lock(&self.state).gain
    }

    fn offset(&self) -> Option<f64> {
        read_lock(&self.state).offset
    }

    fn frame_formats(&self) -> Vec<String> {
        read_lock(&self.state).frame_formats.clone()
    }

    fn start_capture(&self, duration: f64) {
        self.core.send_new_number("CCD_EXPOSURE", &[("CCD_EXPOSURE_VALUE", duration)]);
    }

    fn abort_capture(&self) {
        if read_lock(&self.state).can_abort {
            self.core.send_new_switch("CCD_ABORT_EXPOSURE", &[("ABORT", true)]);
        }
    }

    fn set_cooler(&self, enabled: bool) {
        if self.has_cooler() {
            let element = if enabled { "COOLER_ON" } else { "COOLER_OFF" };
            self.core.send_new_switch("CCD_COOLER", &[(element, true)]);
        }
    }

    fn set_target_temperature(&self, temperature: f64) {
        if self.has_thermometer() {
            self.core.send_new_number("CCD_TEMPERATURE", &[("CCD_TEMPERATURE_VALUE", temperature)]);
        }
    }

    fn set_frame(&self, frame: Frame) {
        self.core.send_new_number(
            "CCD_FRAME",
            &[
                ("X", f64::from(frame.x)),
                ("Y", f64::from(frame.y)),
                ("WIDTH", f64::from(frame.width)),
                ("HEIGHT", f64::from(frame.height)),
            ],
        );
    }

    fn set_binning(&self, x: u32, y: u32) {
        self.core.send_new_number(
            "CCD_BINNING",
            &[("HOR_BIN", f64::from(x)), ("VER_BIN", f64::from(y))],
        );
    }

    fn set_gain(&self, gain: f64) {
        if self.gain().is_some() {
            self.core.send_new_number("CCD_GAIN", &[("GAIN", gain)]);
        }
    }

    fn set_offset(&self, offset: f64) {
        if self.offset().is_some() {
            self.core.send_new_number("CCD_OFFSET", &[("OFFSET", offset)]);
        }
    }

    fn set_frame_format(&self, format: &str) {
        if read_lock(&self.state).frame_formats.iter().any(|f| f == format) {
            self.core.send_new_switch("CCD_CAPTURE_FORMAT", &[(format, true)]);
        }
    }
}

impl Thermometer for IndiCamera {
    fn has_thermometer(&self) -> bool {
        read_lock(&self.state).has_thermometer
    }

    fn temperature(&self) -> f64 {
        read_lock(&self.state).temperature
    }
}
