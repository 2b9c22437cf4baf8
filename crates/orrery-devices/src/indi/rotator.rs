//! INDI field rotator.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};

use crate::device::{DeviceChange, DeviceType, PropertyChange, Rotator, RotatorChange};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{PropertyState, Vector};

#[derive(Debug, Default)]
struct RotatorState {
    angle: f64,
    min_angle: f64,
    max_angle: f64,
    moving: bool,
    can_abort: bool,
    can_home: bool,
    can_reverse: bool,
    can_sync: bool,
    reversed: bool,
}

/// Rotator driven over INDI
#[derive(Debug)]
pub struct IndiRotator {
    core: IndiDeviceCore,
    state: RwLock<RotatorState>,
}

const HANDLERS: &[(&str, Handler<IndiRotator>)] = &[
    ("ABS_ROTATOR_ANGLE", IndiRotator::on_angle),
    ("ROTATOR_ABORT_MOTION", IndiRotator::on_abort_motion),
    ("ROTATOR_HOME", IndiRotator::on_home),
    ("ROTATOR_REVERSE", IndiRotator::on_reverse),
    ("SYNC_ROTATOR_ANGLE", IndiRotator::on_sync),
];

indi_device!(IndiRotator, DeviceType::Rotator, HANDLERS, as_rotator => Rotator);

fn rotator(change: RotatorChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Rotator(change))
}

impl IndiRotator {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(RotatorState::default()),
        }
    }

    fn on_angle(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(element) = vector.number_element("ANGLE") else {
            return;
        };
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            state.min_angle = element.min;
            state.max_angle = element.max;
            changes.push(rotator(RotatorChange::RangeChanged {
                min: element.min,
                max: element.max,
            }));
        }

        if state.angle != element.value {
            state.angle = element.value;
            changes.push(rotator(RotatorChange::AngleChanged(element.value)));
        }

        let moving = vector.state == PropertyState::Busy;
        if state.moving != moving {
            state.moving = moving;
            changes.push(rotator(RotatorChange::MovingChanged(moving)));
        }
    }

    fn on_abort_motion(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_abort = true;
        }
    }

    fn on_home(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_home = true;
        }
    }

    fn on_reverse(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() {
            state.can_reverse = true;
        }

        let reversed = vector.first_on_switch() == Some("INDI_ENABLED");
        if state.reversed != reversed {
            state.reversed = reversed;
            changes.push(rotator(RotatorChange::ReverseChanged(reversed)));
        }
    }

    fn on_sync(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_sync = true;
        }
    }
}

impl Rotator for IndiRotator {
    fn angle(&self) -> f64 {
        read_lock(&self.state).angle
    }

    fn angle_range(&self) -> (f64, f64) {
        let state = read_lock(&self.state);
        (state.min_angle, state.max_angle)
    }

    fn is_moving(&self) -> bool {
        read_lock(&self.state).moving
    }

    fn can_abort(&self) -> bool {
        read_lock(&self.state).can_abort
    }

    fn can_home(&self) -> bool {
        read_lock(&self.state).can_home
    }

    fn can_reverse(&self) -> bool {
        read_lock(&self.state).can_reverse
    }

    fn can_sync(&self) -> bool {
        read_lock(&self.state).can_sync
    }

    fn is_reversed(&self) -> bool {
        read_lock(&self.state).reversed
    }

    fn move_to(&self, angle: f64) {
        self.core.send_new_number("ABS_ROTATOR_ANGLE", &[("ANGLE", angle)]);
    }

    fn sync(&self, angle: f64) {
        if self.can_sync() {
            self.core.send_new_number("SYNC_ROTATOR_ANGLE", &[("ANGLE", angle)]);
        }
    }

    fn home(&self) {
        if self.can_home() {
            self.core.send_new_switch("ROTATOR_HOME", &[("HOME", true)]);
        }
    }

    fn reverse(&self, enabled: bool) {
        if self.can_reverse() {
            let element = if enabled { "INDI_ENABLED" } else { "INDI_DISABLED" };
            self.core.send_new_switch("ROTATOR_REVERSE", &[(element, true)]);
        }
    }

    fn abort(&self) {
        if self.can_abort() {
            self.core.send_new_switch("ROTATOR_ABORT_MOTION", &[("ABORT", true)]);
        }
    }
}
