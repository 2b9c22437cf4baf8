//! Alpaca telescope mount.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use orrery_core::utils::{read_lock, write_lock};

use crate::alpaca::device::{update, AscomCore, AscomDevice, ClientShared};
use crate::alpaca::service::ConfiguredDevice;
use crate::device::{
    Device, DeviceChange, DeviceType, GeographicCoordinate, MotionDirection, Mount, MountChange,
    PierSide, PropertyChange,
};

/// Slew rates are offered in steps of 0.1°/s
const RATE_STEPS_PER_DEGREE: f64 = 10.0;

#[derive(Debug, Clone, Copy, Deserialize)]
struct AxisRate {
    #[serde(rename = "Minimum")]
    minimum: f64,
    #[serde(rename = "Maximum")]
    maximum: f64,
}

#[derive(Debug, Default)]
struct MountState {
    right_ascension: f64,
    declination: f64,
    slewing: bool,
    tracking: bool,
    parked: bool,
    parking: bool,
    park_requested: bool,
    can_park: bool,
    can_sync: bool,
    rates: Vec<(String, f64)>,
    slew_rate: Option<String>,
    pier_side: PierSide,
}

/// Mount behind an Alpaca server
#[derive(Debug)]
pub struct AlpacaMount {
    core: Arc<AscomCore>,
    state: RwLock<MountState>,
}

ascom_device!(AlpacaMount, as_mount => Mount);

fn mount(change: MountChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Mount(change))
}

/// Expand axis rate ranges into discrete named rates, slowest first
fn slew_rates(ranges: &[AxisRate]) -> Vec<(String, f64)> {
    let mut steps = BTreeSet::new();
    for range in ranges {
        let low = (range.minimum * RATE_STEPS_PER_DEGREE).round() as i64;
        let high = (range.maximum * RATE_STEPS_PER_DEGREE).round() as i64;
        steps.extend(low.max(1)..=high);
    }

    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| (format!("RATE_{}", i), step as f64 / RATE_STEPS_PER_DEGREE))
        .collect()
}

fn pier_side(value: i32) -> PierSide {
    match value {
        0 => PierSide::East,
        1 => PierSide::West,
        _ => PierSide::Unknown,
    }
}

impl AlpacaMount {
    pub(crate) fn new(info: ConfiguredDevice, shared: Arc<ClientShared>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this: Weak<dyn Device> = this.clone();
            Self {
                core: AscomCore::new(info, DeviceType::Mount, "telescope", shared, this),
                state: RwLock::new(MountState::default()),
            }
        })
    }

    async fn probe_rates(&self) {
        let mut ranges = Vec::new();
        for axis in ["0", "1"] {
            if let Some(rates) = self
                .core
                .request_with::<Vec<AxisRate>>("axisrates", &[("Axis", axis.to_string())])
                .await
            {
                ranges.extend(rates);
            }
        }

        let rates = slew_rates(&ranges);
        let names: Vec<String> = rates.iter().map(|(name, _)| name.clone()).collect();
        let selected = names.first().cloned();
        {
            let mut state = write_lock(&self.state);
            state.rates = rates;
            state.slew_rate = selected.clone();
        }

        if !names.is_empty() {
            self.core.emit(mount(MountChange::SlewRatesChanged(names)));
        }
        if let Some(rate) = selected {
            self.core.emit(mount(MountChange::SlewRateChanged(rate)));
        }
    }

    async fn poll_coordinates(&self) {
        let Some(ra) = self.core.request::<f64>("rightascension").await else {
            return;
        };
        let Some(dec) = self.core.request::<f64>("declination").await else {
            return;
        };

        let changed = {
            let mut state = write_lock(&self.state);
            let ra_changed = update(&mut state.right_ascension, ra);
            update(&mut state.declination, dec) || ra_changed
        };
        if changed {
            self.core.emit(mount(MountChange::CoordinatesChanged { ra, dec }));
        }
    }

    async fn poll_flags(&self) {
        if let Some(slewing) = self.core.request::<bool>("slewing").await {
            if update(&mut write_lock(&self.state).slewing, slewing) {
                self.core.emit(mount(MountChange::SlewingChanged(slewing)));
            }
        }

        if let Some(tracking) = self.core.request::<bool>("tracking").await {
            if update(&mut write_lock(&self.state).tracking, tracking) {
                self.core.emit(mount(MountChange::TrackingChanged(tracking)));
            }
        }

        if let Some(side) = self.core.request::<i32>("sideofpier").await {
            let side = pier_side(side);
            if update(&mut write_lock(&self.state).pier_side, side) {
                self.core.emit(mount(MountChange::PierSideChanged(side)));
            }
        }
    }

    async fn poll_park(&self) {
        if !read_lock(&self.state).can_park {
            return;
        }
        let Some(parked) = self.core.request::<bool>("atpark").await else {
            return;
        };

        let mut changes = Vec::new();
        {
            let mut state = write_lock(&self.state);
            if update(&mut state.parked, parked) {
                changes.push(mount(MountChange::ParkedChanged(parked)));
            }
            if parked {
                state.park_requested = false;
            }
            let parking = state.park_requested;
            if update(&mut state.parking, parking) {
                changes.push(mount(MountChange::ParkingChanged(parking)));
            }
        }
        for change in changes {
            self.core.emit(change);
        }
    }

    fn slew_to(&self, ra: f64, dec: f64, track: bool) {
        let mut commands = Vec::new();
        if track {
            commands.push(("tracking", vec![("Tracking", true.to_string())]));
        }
        commands.push((
            "slewtocoordinatesasync",
            vec![("RightAscension", ra.to_string()), ("Declination", dec.to_string())],
        ));
        self.core.command_sequence(commands);
    }
}

#[async_trait]
impl AscomDevice for AlpacaMount {
    fn core(&self) -> &Arc<AscomCore> {
        &self.core
    }

    async fn on_connected(&self) {
        let can_park = self.core.request::<bool>("canpark").await.unwrap_or(false);
        let can_sync = self.core.request::<bool>("cansync").await.unwrap_or(false);
        {
            let mut state = write_lock(&self.state);
            state.can_park = can_park;
            state.can_sync = can_sync;
        }
        self.probe_rates().await;
    }

    async fn refresh(&self) {
        self.poll_coordinates().await;
        self.poll_flags().await;
        self.poll_park().await;
    }
}

impl Mount for AlpacaMount {
    fn right_ascension(&self) -> f64 {
        read_lock(&self.state).right_ascension
    }

    fn declination(&self) -> f64 {
        read_lock(&self.state).declination
    }

    fn is_slewing(&self) -> bool {
        read_lock(&self.state).slewing
    }

    fn is_tracking(&self) -> bool {
        read_lock(&self.state).tracking
    }

    fn is_parked(&self) -> bool {
        read_lock(&self.state).parked
    }

    fn is_parking(&self) -> bool {
        read_lock(&self.state).parking
    }

    fn can_park(&self) -> bool {
        read_lock(&self.state).can_park
    }

    fn can_sync(&self) -> bool {
        read_lock(&self.state).can_sync
    }

    fn slew_rates(&self) -> Vec<String> {
        read_lock(&self.state).rates.iter().map(|(name, _)| name.clone()).collect()
    }

    fn slew_rate(&self) -> Option<String> {
        read_lock(&self.state).slew_rate.clone()
    }

    fn pier_side(&self) -> PierSide {
        read_lock(&self.state).pier_side
    }

    fn goto(&self, ra: f64, dec: f64) {
        self.slew_to(ra, dec, true);
    }

    fn slew(&self, ra: f64, dec: f64) {
        self.slew_to(ra, dec, false);
    }

    fn sync(&self, ra: f64, dec: f64) {
        if self.can_sync() {
            self.core.command(
                "synctocoordinates",
                vec![("RightAscension", ra.to_string()), ("Declination", dec.to_string())],
            );
        }
    }

    fn park(&self) {
        if self.can_park() {
            write_lock(&self.state).park_requested = true;
            self.core.command("park", Vec::new());
        }
    }

    fn unpark(&self) {
        if self.can_park() {
            write_lock(&self.state).park_requested = false;
            self.core.command("unpark", Vec::new());
        }
    }

    fn abort(&self) {
        write_lock(&self.state).park_requested = false;
        self.core.command("abortslew", Vec::new());
    }

    fn set_tracking(&self, enabled: bool) {
        self.core.command("tracking", vec![("Tracking", enabled.to_string())]);
    }

    fn set_slew_rate(&self, rate: &str) {
        let known = {
            let mut state = write_lock(&self.state);
            let known = state.rates.iter().any(|(name, _)| name == rate);
            if known {
                state.slew_rate = Some(rate.to_string());
            }
            known
        };
        if known {
            self.core.emit(mount(MountChange::SlewRateChanged(rate.to_string())));
        }
    }

    fn move_axis(&self, direction: MotionDirection, enabled: bool) {
        let speed = {
            let state = read_lock(&self.state);
            state
                .slew_rate
                .as_ref()
                .and_then(|selected| state.rates.iter().find(|(name, _)| name == selected))
                .map(|(_, speed)| *speed)
        };
        let Some(speed) = speed else {
            warn!(device = %self.core.name(), "No slew rate available");
            return;
        };

        let (axis, sign) = match direction {
            MotionDirection::East => ("0", 1.0),
            MotionDirection::West => ("0", -1.0),
            MotionDirection::North => ("1", 1.0),
            MotionDirection::South => ("1", -1.0),
        };
        let rate = if enabled { sign * speed } else { 0.0 };
        self.core
            .command("moveaxis", vec![("Axis", axis.to_string()), ("Rate", rate.to_string())]);
    }

    fn set_coordinates(&self, coordinate: GeographicCoordinate) {
        self.core.command_sequence(vec![
            ("sitelongitude", vec![("SiteLongitude", coordinate.longitude.to_string())]),
            ("sitelatitude", vec![("SiteLatitude", coordinate.latitude.to_string())]),
            ("siteelevation", vec![("SiteElevation", coordinate.elevation.to_string())]),
        ]);
    }
}
