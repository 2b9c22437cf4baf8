//! INDI telescope mount.

use std::sync::RwLock;

use chrono::{DateTime, FixedOffset};
use orrery_core::utils::{read_lock, write_lock};

use crate::device::{
    DeviceChange, DeviceType, GeographicCoordinate, Gps, MotionDirection, Mount, MountChange,
    PierSide, PropertyChange,
};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::indi::gps::GpsState;
use crate::protocol::{Elements, PropertyPermission, PropertyState, Vector};

#[derive(Debug, Default)]
struct MountState {
    ra: f64,
    dec: f64,
    slewing: bool,
    tracking: bool,
    parked: bool,
    parking: bool,
    can_park: bool,
    can_sync: bool,
    can_abort: bool,
    slew_rates: Vec<String>,
    slew_rate: Option<String>,
    pier_side: PierSide,
}

/// Mount driven over INDI
#[derive(Debug)]
pub struct IndiMount {
    core: IndiDeviceCore,
    state: RwLock<MountState>,
    site: RwLock<GpsState>,
}

const HANDLERS: &[(&str, Handler<IndiMount>)] = &[
    ("EQUATORIAL_EOD_COORD", IndiMount::on_coordinates),
    ("TELESCOPE_TRACK_STATE", IndiMount::on_track_state),
    ("TELESCOPE_PARK", IndiMount::on_park),
    ("TELESCOPE_ABORT_MOTION", IndiMount::on_abort_motion),
    ("TELESCOPE_SLEW_RATE", IndiMount::on_slew_rate),
    ("TELESCOPE_PIER_SIDE", IndiMount::on_pier_side),
    ("ON_COORD_SET", IndiMount::on_coord_set),
    ("GEOGRAPHIC_COORD", IndiMount::on_site),
    ("TIME_UTC", IndiMount::on_time),
];

indi_device!(IndiMount, DeviceType::Mount, HANDLERS, as_mount => Mount, as_gps => Gps);

fn mount(change: MountChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Mount(change))
}

impl IndiMount {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(MountState::default()),
            site: RwLock::new(GpsState::default()),
        }
    }

    fn on_coordinates(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);

        if vector.state == PropertyState::Alert {
            changes.push(mount(MountChange::SlewFailed));
        }

        let slewing = vector.state == PropertyState::Busy;
        if state.slewing != slewing {
            state.slewing = slewing;
            changes.push(mount(MountChange::SlewingChanged(slewing)));
        }

        if let (Some(ra), Some(dec)) = (vector.number("RA"), vector.number("DEC")) {
            state.ra = ra;
            state.dec = dec;
            changes.push(mount(MountChange::CoordinatesChanged { ra, dec }));
        }
    }

    fn on_track_state(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let tracking = vector.first_on_switch() == Some("TRACK_ON");
        let mut state = write_lock(&self.state);
        if state.tracking != tracking {
            state.tracking = tracking;
            changes.push(mount(MountChange::TrackingChanged(tracking)));
        }
    }

    fn on_park(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() {
            state.can_park = vector.perm != PropertyPermission::ReadOnly;
        }

        let parking = vector.state == PropertyState::Busy;
        if state.parking != parking {
            state.parking = parking;
            changes.push(mount(MountChange::ParkingChanged(parking)));
        }

        let parked = vector.first_on_switch() == Some("PARK");
        if state.parked != parked {
            state.parked = parked;
            changes.push(mount(MountChange::ParkedChanged(parked)));
        }
    }

    fn on_abort_motion(&self, _vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        write_lock(&self.state).can_abort = true;
    }

    fn on_slew_rate(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            let rates: Vec<String> =
                vector.elements.names().into_iter().map(str::to_string).collect();
            if state.slew_rates != rates {
                state.slew_rates = rates.clone();
                changes.push(mount(MountChange::SlewRatesChanged(rates)));
            }
        }

        let rate = vector.first_on_switch().map(str::to_string);
        if state.slew_rate != rate {
            state.slew_rate = rate.clone();
            if let Some(rate) = rate {
                changes.push(mount(MountChange::SlewRateChanged(rate)));
            }
        }
    }

    fn on_pier_side(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let side = match vector.first_on_switch() {
            Some("PIER_EAST") => PierSide::East,
            Some("PIER_WEST") => PierSide::West,
            _ => PierSide::Unknown,
        };
        let mut state = write_lock(&self.state);
        if state.pier_side != side {
            state.pier_side = side;
            changes.push(mount(MountChange::PierSideChanged(side)));
        }
    }

    fn on_coord_set(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if let Elements::Switch(elements) = &vector.elements {
            write_lock(&self.state).can_sync = elements.iter().any(|e| e.name == "SYNC");
        }
    }

    fn on_site(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        write_lock(&self.site).on_coordinates(vector, changes);
    }

    fn on_time(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        write_lock(&self.site).on_time(vector, changes);
    }

    fn send_coordinates(&self, mode: &str, ra: f64, dec: f64) {
        self.core.send_new_switch("ON_COORD_SET", &[(mode, true)]);
        self.core.send_new_number("EQUATORIAL_EOD_COORD", &[("RA", ra), ("DEC", dec)]);
    }
}

impl Mount for IndiMount {
    fn right_ascension(&self) -> f64 {
        read_lock(&self.state).ra
    }

    fn declination(&self) -> f64 {
        read_lock(&self.state).dec
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
        read_lock(&self.state).slew_rates.clone()
    }

    fn slew_rate(&self) -> Option<String> {
        read_lock(&self.state).slew_rate.clone()
    }

    fn pier_side(&self) -> PierSide {
        read_lock(&self.state).pier_side
    }

    fn goto(&self, ra: f64, dec: f64) {
        self.send_coordinates("TRACK", ra, dec);
    }

    fn slew(&self, ra: f64, dec: f64) {
        self.send_coordinates("SLEW", ra, dec);
    }

    fn sync(&self, ra: f64, dec: f64) {
        if self.can_sync() {
            self.send_coordinates("SYNC", ra, dec);
        }
    }

    fn park(&self) {
        if self.can_park() {
            self.core.send_new_switch("TELESCOPE_PARK", &[("PARK", true)]);
        }
    }

    fn unpark(&self) {
        if self.can_park() {
            self.core.send_new_switch("TELESCOPE_PARK", &[("UNPARK", true)]);
        }
    }

    fn abort(&self) {
        if read_lock(&self.state).can_abort {
            self.core.send_new_switch("TELESCOPE_ABORT_MOTION", &[("ABORT", true)]);
        }
    }

    fn set_tracking(&self, enabled: bool) {
        let element = if enabled { "TRACK_ON" } else { "TRACK_OFF" };
        self.core.send_new_switch("TELESCOPE_TRACK_STATE", &[(element, true)]);
    }

    fn set_slew_rate(&self, rate: &str) {
        if read_lock(&self.state).slew_rates.iter().any(|r| r == rate) {
            self.core.send_new_switch("TELESCOPE_SLEW_RATE", &[(rate, true)]);
        }
    }

    fn move_axis(&self, direction: MotionDirection, enabled: bool) {
        let (vector, element) = match direction {
            MotionDirection::North => ("TELESCOPE_MOTION_NS", "MOTION_NORTH"),
            MotionDirection::South => ("TELESCOPE_MOTION_NS", "MOTION_SOUTH"),
            MotionDirection::East => ("TELESCOPE_MOTION_WE", "MOTION_EAST"),
            MotionDirection::West => ("TELESCOPE_MOTION_WE", "MOTION_WEST"),
        };
        self.core.send_new_switch(vector, &[(element, enabled)]);
    }

    fn set_coordinates(&self, coordinate: GeographicCoordinate) {
        self.core.send_new_number(
            "GEOGRAPHIC_COORD",
            &[
                ("LAT", coordinate.latitude),
                ("LONG", coordinate.longitude),
                ("ELEV", coordinate.elevation),
            ],
        );
    }
}

impl Gps for IndiMount {
    fn has_gps(&self) -> bool {
        read_lock(&self.site).has_gps
    }

    fn coordinates(&self) -> GeographicCoordinate {
        read_lock(&self.site).coordinates
    }

    fn time(&self) -> Option<DateTime<FixedOffset>> {
        read_lock(&self.site).time
    }
}
