//! INDI focuser.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};

use crate::device::{
    DeviceChange, DeviceType, Focuser, FocuserChange, PropertyChange, Thermometer,
    ThermometerChange,
};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{PropertyState, Vector};

#[derive(Debug, Default)]
struct FocuserState {
    position: i32,
    moving: bool,
    max_position: i32,
    can_absolute_move: bool,
    can_relative_move: bool,
    can_abort: bool,
    can_reverse: bool,
    can_sync: bool,
    reversed: bool,
    has_thermometer: bool,
    temperature: f64,
}

/// Focuser driven over INDI
#[derive(Debug)]
pub struct IndiFocuser {
    core: IndiDeviceCore,
    state: RwLock<FocuserState>,
}

const HANDLERS: &[(&str, Handler<IndiFocuser>)] = &[
    ("ABS_FOCUS_POSITION", IndiFocuser::on_absolute_position),
    ("REL_FOCUS_POSITION", IndiFocuser::on_relative_position),
    ("FOCUS_ABORT_MOTION", IndiFocuser::on_abort_motion),
    ("FOCUS_REVERSE_MOTION", IndiFocuser::on_reverse_motion),
    ("FOCUS_SYNC", IndiFocuser::on_sync),
    ("FOCUS_TEMPERATURE", IndiFocuser::on_temperature),
];

indi_device!(
    IndiFocuser,
    DeviceType::Focuser,
    HANDLERS,
    as_focuser => Focuser,
    as_thermometer => Thermometer,
);

fn focuser(change: FocuserChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Focuser(change))
}

impl IndiFocuser {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(FocuserState::default()),
        }
    }

    fn on_absolute_position(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(element) = vector.number_element("FOCUS_ABSOLUTE_POSITION") else {
            return;
        };
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            state.can_absolute_move = true;
            let max_position = element.max as i32;
            if state.max_position != max_position {
                state.max_position = max_position;
                changes.push(focuser(FocuserChange::MaxPositionChanged(max_position)));
            }
        }

        if vector.state == PropertyState::Alert {
            changes.push(focuser(FocuserChange::MoveFailed));
        }

        let position = element.value as i32;
        if state.position != position {
            state.position = position;
            changes.push(focuser(FocuserChange::PositionChanged(position)));
        }

        Self::update_moving(&mut state, vector, changes);
    }

    fn on_relative_position(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            state.can_relative_move = true;
            if !state.can_absolute_move {
                if let Some(element) = vector.number_element("FOCUS_RELATIVE_POSITION") {
                    let max_position = element.max as i32;
                    if state.max_position != max_position {
                        state.max_position = max_position;
                        changes.push(focuser(FocuserChange::MaxPositionChanged(max_position)));
                    }
                }
            }
        }

        Self::update_moving(&mut state, vector, changes);
    }

    fn on_abort_motion(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_abort = true;
        }
    }

    fn on_reverse_motion(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() {
            state.can_reverse = true;
        }

        let reversed = vector.first_on_switch() == Some("INDI_ENABLED");
        if state.reversed != reversed {
            state.reversed = reversed;
            changes.push(focuser(FocuserChange::ReverseChanged(reversed)));
        }
    }

    fn on_sync(&self, vector: &Vector, _changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            write_lock(&self.state).can_sync = true;
        }
    }

    fn on_temperature(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);

        if vector.is_def() && !state.has_thermometer {
            state.has_thermometer = true;
            changes.push(DeviceChange::Attach(DeviceType::Thermometer));
        }

        if let Some(temperature) = vector.number("TEMPERATURE") {
            state.temperature = temperature;
            changes.push(DeviceChange::Property(PropertyChange::Thermometer(
                ThermometerChange::TemperatureChanged(temperature),
            )));
        }
    }

    fn update_moving(state: &mut FocuserState, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let moving = vector.state == PropertyState::Busy;
        if state.moving != moving {
            state.moving = moving;
            changes.push(focuser(FocuserChange::MovingChanged(moving)));
        }
    }
}

impl Focuser for IndiFocuser {
    fn position(&self) -> i32 {
        read_lock(&self.state).position
    }

    fn is_moving(&self) -> bool {
        read_lock(&self.state).moving
    }

    fn max_position(&self) -> i32 {
        read_lock(&self.state).max_position
    }

    fn can_absolute_move(&self) -> bool {
        read_lock(&self.state).can_absolute_move
    }

    fn can_relative_move(&self) -> bool {
        read_lock(&self.state).can_relative_move
    }

    fn can_abort(&self) -> bool {
        read_lock(&self.state).can_abort
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

    fn move_in(&self, steps: u32) {
        if self.can_relative_move() {
            self.core.send_new_switch("FOCUS_MOTION", &[("FOCUS_INWARD", true)]);
            self.core.send_new_number(
                "REL_FOCUS_POSITION",
                &[("FOCUS_RELATIVE_POSITION", f64::from(steps))],
            );
        }
    }

    fn move_out(&self, steps: u32) {
        if self.can_relative_move() {
            self.core.send_new_switch("FOCUS_MOTION", &[("FOCUS_OUTWARD", true)]);
            self.core.send_new_number(
                "REL_FOCUS_POSITION",
                &[("FOCUS_RELATIVE_POSITION", f64::from(steps))],
            );
        }
    }

    fn move_to(&self, position: i32) {
        if self.can_absolute_move() {
            self.core.send_new_number(
                "ABS_FOCUS_POSITION",
                &[("FOCUS_ABSOLUTE_POSITION", f64::from(position))],
            );
        }
    }

    fn abort(&self) {
        if self.can_abort() {
            self.core.send_new_switch("FOCUS_ABORT_MOTION", &[("ABORT", true)]);
        }
    }

    fn reverse(&self, enabled: bool) {
        if self.can_reverse() {
            let element = if enabled { "INDI_ENABLED" } else { "INDI_DISABLED" };
            self.core.send_new_switch("FOCUS_REVERSE_MOTION", &[(element, true)]);
        }
    }

    fn sync(&self, position: i32) {
        if self.can_sync() {
            self.core.send_new_number("FOCUS_SYNC", &[("FOCUS_SYNC_VALUE", f64::from(position))]);
        }
    }
}

impl Thermometer for IndiFocuser {
    fn has_thermometer(&self) -> bool {
        read_lock(&self.state).has_thermometer
    }

    fn temperature(&self) -> f64 {
        read_lock(&self.state).temperature
    }
}
