//! Alpaca imaging camera.
//!
//! Exposures are followed through `camerastate`. A capture that returns to
//! idle with `imageready` set is finished and its image is downloaded.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, info};

use orrery_core::utils::{read_lock, write_lock};

use crate::alpaca::device::{update, AscomCore, AscomDevice, ClientShared};
use crate::alpaca::service::ConfiguredDevice;
use crate::device::{
    Camera, CameraChange, Device, DeviceChange, DeviceType, Frame, PropertyChange, SensorInfo,
    Thermometer, ThermometerChange,
};

const STATE_IDLE: i32 = 0;
const STATE_EXPOSING: i32 = 2;
const STATE_DOWNLOAD: i32 = 4;
const STATE_ERROR: i32 = 5;

#[derive(Debug, Default)]
struct CameraState {
    exposuring: bool,
    duration: f64,
    remaining: f64,
    abort_requested: bool,
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
    formats: Vec<String>,
}

/// Camera behind an Alpaca server
#[derive(Debug)]
pub struct AlpacaCamera {
    core: Arc<AscomCore>,
    state: RwLock<CameraState>,
}

ascom_device!(AlpacaCamera, as_camera => Camera, as_thermometer => Thermometer);

fn camera(change: CameraChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Camera(change))
}

/// Bit depth able to hold `max_adu`
fn bit_depth(max_adu: u32) -> u32 {
    (u64::from(max_adu) + 1).next_power_of_two().trailing_zeros()
}

impl AlpacaCamera {
    pub(crate) fn new(info: ConfiguredDevice, shared: Arc<ClientShared>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this: Weak<dyn Device> = this.clone();
            Self {
                core: AscomCore::new(info, DeviceType::Camera, "camera", shared, this),
                state: RwLock::new(CameraState::default()),
            }
        })
    }

    fn emit_all(&self, changes: Vec<DeviceChange>) {
        for change in changes {
            self.core.emit(change);
        }
    }

    async fn probe_sensor(&self) {
        let width = self.core.request::<u32>("cameraxsize").await;
        let height = self.core.request::<u32>("cameraysize").await;
        let pixel_x = self.core.request::<f64>("pixelsizex").await;
        let pixel_y = self.core.request::<f64>("pixelsizey").await;
        let max_adu = self.core.request::<u32>("maxadu").await;

        let sensor = SensorInfo {
            width: width.unwrap_or_default(),
            height: height.unwrap_or_default(),
            pixel_size_x: pixel_x.unwrap_or_default(),
            pixel_size_y: pixel_y.unwrap_or_default(),
            bits_per_pixel: max_adu.map(bit_depth).unwrap_or_default(),
        };
        if update(&mut write_lock(&self.state).sensor, sensor) {
            self.core.emit(camera(CameraChange::SensorChanged(sensor)));
        }
    }

    async fn probe_capabilities(&self) {
        let min = self.core.request::<f64>("exposuremin").await;
        let max = self.core.request::<f64>("exposuremax").await;
        if let (Some(min), Some(max)) = (min, max) {
            {
                let mut state = write_lock(&self.state);
                state.exposure_min = min;
                state.exposure_max = max;
            }
            self.core.emit(camera(CameraChange::ExposureRangeChanged { min, max }));
        }

        if let Some(can_abort) = self.core.request::<bool>("canabortexposure").await {
            write_lock(&self.state).can_abort = can_abort;
        }

        if self.core.request::<bool>("cansetccdtemperature").await == Some(true)
            && update(&mut write_lock(&self.state).has_cooler, true)
        {
            self.core.emit(camera(CameraChange::CoolerDetected));
        }

        if let Some(formats) = self.core.request::<Vec<String>>("readoutmodes").await {
            if update(&mut write_lock(&self.state).formats, formats.clone()) {
                self.core.emit(camera(CameraChange::FrameFormatsChanged(formats)));
            }
        }
    }

    async fn poll_gain_offset(&self, probe: bool) {
        let (has_gain, has_offset) = {
            let state = read_lock(&self.state);
            (probe || state.gain.is_some(), probe || state.offset.is_some())
        };

        if has_gain {
            if let Some(gain) = self.core.request::<i32>("gain").await {
                let gain = f64::from(gain);
                if update(&mut write_lock(&self.state).gain, Some(gain)) {
                    self.core.emit(camera(CameraChange::GainChanged(gain)));
                }
            }
        }

        if has_offset {
            if let Some(offset) = self.core.request::<i32>("offset").await {
                let offset = f64::from(offset);
                if update(&mut write_lock(&self.state).offset, Some(offset)) {
                    self.core.emit(camera(CameraChange::OffsetChanged(offset)));
                }
            }
        }
    }

    async fn poll_temperature(&self, probe: bool) {
        if !probe && !read_lock(&self.state).has_thermometer {
            return;
        }
        let Some(temperature) = self.core.request::<f64>("ccdtemperature").await else {
            return;
        };

        if update(&mut write_lock(&self.state).has_thermometer, true) {
            self.core.attach(DeviceType::Thermometer);
        }
        if update(&mut write_lock(&self.state).temperature, temperature) {
            self.core
                .emit(DeviceChange::Property(PropertyChange::Thermometer(
                    ThermometerChange::TemperatureChanged(temperature),
                )));
        }
    }

    async fn poll_cooler(&self) {
        if !read_lock(&self.state).has_cooler {
            return;
        }

        if let Some(on) = self.core.request::<bool>("cooleron").await {
            if update(&mut write_lock(&self.state).cooler_on, on) {
                self.core.emit(camera(CameraChange::CoolerChanged(on)));
            }
        }
        if let Some(power) = self.core.request::<f64>("coolerpower").await {
            if update(&mut write_lock(&self.state).cooler_power, power) {
                self.core.emit(camera(CameraChange::CoolerPowerChanged(power)));
            }
        }
    }

    async fn poll_frame(&self) {
        let x = self.core.request::<u32>("startx").await;
        let y = self.core.request::<u32>("starty").await;
        let width = self.core.request::<u32>("numx").await;
        let height = self.core.request::<u32>("numy").await;
        if let (Some(x), Some(y), Some(width), Some(height)) = (x, y, width, height) {
            let frame = Frame { x, y, width, height };
            if update(&mut write_lock(&self.state).frame, frame) {
                self.core.emit(camera(CameraChange::FrameChanged(frame)));
            }
        }

        let bin_x = self.core.request::<u32>("binx").await;
        let bin_y = self.core.request::<u32>("biny").await;
        if let (Some(bin_x), Some(bin_y)) = (bin_x, bin_y) {
            if update(&mut write_lock(&self.state).binning, (bin_x, bin_y)) {
                self.core.emit(camera(CameraChange::BinningChanged(bin_x, bin_y)));
            }
        }
    }

    async fn poll_exposure(&self) {
        let exposuring = read_lock(&self.state).exposuring;
        let Some(camera_state) = self.core.request::<i32>("camerastate").await else {
            if exposuring {
                write_lock(&self.state).exposuring = false;
                self.core.emit(camera(CameraChange::ExposureFailed));
            }
            return;
        };

        match camera_state {
            STATE_ERROR => {
                if exposuring {
                    write_lock(&self.state).exposuring = false;
                    self.core.emit(camera(CameraChange::ExposureFailed));
                }
            }
            STATE_IDLE => {
                if exposuring {
                    self.finish_exposure().await;
                }
            }
            1..=STATE_DOWNLOAD => {
                let mut changes = Vec::new();
                if !exposuring {
                    write_lock(&self.state).exposuring = true;
                    changes.push(camera(CameraChange::ExposureStarted));
                }
                if camera_state == STATE_EXPOSING {
                    if let Some(percent) = self.core.request::<f64>("percentcompleted").await {
                        let mut state = write_lock(&self.state);
                        let done = percent.clamp(0.0, 100.0) / 100.0;
                        let remaining = (state.duration * (1.0 - done)).max(0.0);
                        if update(&mut state.remaining, remaining) {
                            changes.push(camera(CameraChange::ExposureProgress(remaining)));
                        }
                    }
                }
                self.emit_all(changes);
            }
            other => debug!(device = %self.core.name(), state = other, "Unknown camera state"),
        }
    }

    async fn finish_exposure(&self) {
        let aborted = {
            let mut state = write_lock(&self.state);
            state.exposuring = false;
            state.remaining = 0.0;
            std::mem::take(&mut state.abort_requested)
        };

        let ready = !aborted && self.core.request::<bool>("imageready").await == Some(true);
        if !ready {
            info!(device = %self.core.name(), "Exposure aborted");
            self.core.emit(camera(CameraChange::ExposureAborted));
            return;
        }

        self.core.emit(camera(CameraChange::ExposureFinished));
        if let Some((format, data)) = self.core.request_image("imagearray").await {
            info!(device = %self.core.name(), size = data.len(), "Frame captured");
            self.core.emit(camera(CameraChange::FrameCaptured {
                format: format.to_string(),
                data,
            }));
        }
    }
}

#[async_trait]
impl AscomDevice for AlpacaCamera {
    fn core(&self) -> &Arc<AscomCore> {
        &self.core
    }

    async fn on_connected(&self) {
        self.probe_capabilities().await;
        self.probe_sensor().await;
        self.poll_gain_offset(true).await;
        self.poll_temperature(true).await;
        self.poll_frame().await;
    }

    async fn on_disconnected(&self) {
        let exposuring = std::mem::take(&mut write_lock(&self.state).exposuring);
        if exposuring {
            self.core.emit(camera(CameraChange::ExposureFailed));
        }
    }

    async fn refresh(&self) {
        self.poll_exposure().await;
        self.poll_cooler().await;
        self.poll_temperature(false).await;
        self.poll_frame().await;
        self.poll_gain_offset(false).await;
    }
}

impl Camera for AlpacaCamera {
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
        read_lock(&self.state).formats.clone()
    }

    fn start_capture(&self, duration: f64) {
        {
            let mut state = write_lock(&self.state);
            let known_range = state.exposure_max > 0.0;
            if state.exposuring
                || duration < 0.0
                || (known_range && (duration < state.exposure_min || duration > state.exposure_max))
            {
                return;
            }
            state.duration = duration;
            state.remaining = duration;
            state.abort_requested = false;
        }

        self.core.command(
            "startexposure",
            vec![("Duration", duration.to_string()), ("Light", true.to_string())],
        );
    }

    fn abort_capture(&self) {
        {
            let mut state = write_lock(&self.state);
            if !state.can_abort {
                return;
            }
            state.abort_requested = true;
        }
        self.core.command("abortexposure", Vec::new());
    }

    fn set_cooler(&self, enabled: bool) {
        if self.has_cooler() {
            self.core.command("cooleron", vec![("CoolerOn", enabled.to_string())]);
        }
    }

    fn set_target_temperature(&self, temperature: f64) {
        if self.has_cooler() {
            self.core
                .command("setccdtemperature", vec![("SetCCDTemperature", temperature.to_string())]);
        }
    }

    fn set_frame(&self, frame: Frame) {
        self.core.command_sequence(vec![
            ("startx", vec![("StartX", frame.x.to_string())]),
            ("starty", vec![("StartY", frame.y.to_string())]),
            ("numx", vec![("NumX", frame.width.to_string())]),
            ("numy", vec![("NumY", frame.height.to_string())]),
        ]);
    }

    fn set_binning(&self, x: u32, y: u32) {
        self.core.command_sequence(vec![
            ("binx", vec![("BinX", x.to_string())]),
            ("biny", vec![("BinY", y.to_string())]),
        ]);
    }

    fn set_gain(&self, gain: f64) {
        if self.gain().is_some() {
            self.core.command("gain", vec![("Gain", (gain.round() as i32).to_string())]);
        }
    }

    fn set_offset(&self, offset: f64) {
        if self.offset().is_some() {
            self.core
                .command("offset", vec![("Offset", (offset.round() as i32).to_string())]);
        }
    }

    fn set_frame_format(&self, format: &str) {
        let index = read_lock(&self.state).formats.iter().position(|f| f == format);
        if let Some(index) = index {
            self.core.command("readoutmode", vec![("ReadoutMode", index.to_string())]);
        }
    }
}

impl Thermometer for AlpacaCamera {
    fn has_thermometer(&self) -> bool {
        read_lock(&self.state).has_thermometer
    }

    fn temperature(&self) -> f64 {
        read_lock(&self.state).temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::device::refresh_once;
    use crate::alpaca::service::IMAGE_BYTES;
    use crate::alpaca::testing::{configured, mock_value, recorder, shared};
    use crate::device::DeviceEvent;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn camera_changes(events: &[DeviceEvent]) -> Vec<CameraChange> {
        events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::PropertyChanged {
                    change: PropertyChange::Camera(change),
                    ..
                } => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bit_depth() {
        assert_eq!(bit_depth(65535), 16);
        assert_eq!(bit_depth(4095), 12);
        assert_eq!(bit_depth(255), 8);
    }

    #[tokio::test]
    async fn test_exposure_lifecycle() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;
        let events = recorder(&shared);

        mock_value(&server, "camera/0/connected", json!(true)).await;
        mock_value(&server, "camera/0/exposuremin", json!(0.001)).await;
        mock_value(&server, "camera/0/exposuremax", json!(3600.0)).await;
        mock_value(&server, "camera/0/cameraxsize", json!(4144)).await;
        mock_value(&server, "camera/0/cameraysize", json!(2822)).await;
        mock_value(&server, "camera/0/maxadu", json!(65535)).await;
        mock_value(&server, "camera/0/camerastate", json!(STATE_IDLE)).await;

        let device = AlpacaCamera::new(configured("Camera", "Sim Camera"), shared);
        refresh_once(device.as_ref()).await;

        assert_eq!(device.exposure_range(), (0.001, 3600.0));
        assert_eq!(device.sensor().width, 4144);
        assert_eq!(device.sensor().bits_per_pixel, 16);
        assert!(!device.has_cooler());
        assert!(device.gain().is_none());

        device.start_capture(10.0);

        server.reset().await;
        mock_value(&server, "camera/0/connected", json!(true)).await;
        mock_value(&server, "camera/0/camerastate", json!(STATE_EXPOSING)).await;
        mock_value(&server, "camera/0/percentcompleted", json!(50.0)).await;
        refresh_once(device.as_ref()).await;

        assert!(device.is_exposuring());
        assert_eq!(device.exposure_remaining(), 5.0);

        server.reset().await;
        mock_value(&server, "camera/0/connected", json!(true)).await;
        mock_value(&server, "camera/0/camerastate", json!(STATE_IDLE)).await;
        mock_value(&server, "camera/0/imageready", json!(true)).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/camera/0/imagearray"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 64], IMAGE_BYTES))
            .mount(&server)
            .await;
        refresh_once(device.as_ref()).await;

        assert!(!device.is_exposuring());
        let changes = camera_changes(&events.lock().unwrap());
        let lifecycle: Vec<&CameraChange> = changes
            .iter()
            .filter(|c| {
                !matches!(
                    c,
                    CameraChange::ExposureRangeChanged { .. } | CameraChange::SensorChanged(_)
                )
            })
            .collect();
        assert_eq!(lifecycle.len(), 4);
        assert_eq!(*lifecycle[0], CameraChange::ExposureStarted);
        assert_eq!(*lifecycle[1], CameraChange::ExposureProgress(5.0));
        assert_eq!(*lifecycle[2], CameraChange::ExposureFinished);
        assert!(matches!(
            lifecycle[3],
            CameraChange::FrameCaptured { format, data }
                if format == ".imagebytes" && data.len() == 64
        ));
    }

    #[tokio::test]
    async fn test_start_capture_outside_range_is_ignored() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;

        mock_value(&server, "camera/0/connected", json!(true)).await;
        mock_value(&server, "camera/0/exposuremin", json!(1.0)).await;
        mock_value(&server, "camera/0/exposuremax", json!(60.0)).await;

        let device = AlpacaCamera::new(configured("Camera", "Range"), shared);
        refresh_once(device.as_ref()).await;
        server.reset().await;

        device.start_capture(120.0);
        device.start_capture(0.5);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
