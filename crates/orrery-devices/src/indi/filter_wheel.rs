//! INDI filter wheel.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};
use tracing::debug;

use crate::device::{DeviceChange, DeviceType, FilterWheel, FilterWheelChange, PropertyChange};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{Elements, PropertyState, Vector};

#[derive(Debug, Default)]
struct FilterWheelState {
    slot_count: u32,
    position: u32,
    moving: bool,
    names: Vec<String>,
}

/// Filter wheel driven over INDI
#[derive(Debug)]
pub struct IndiFilterWheel {
    core: IndiDeviceCore,
    state: RwLock<FilterWheelState>,
}

const HANDLERS: &[(&str, Handler<IndiFilterWheel>)] = &[
    ("FILTER_SLOT", IndiFilterWheel::on_slot),
    ("FILTER_NAME", IndiFilterWheel::on_names),
];

indi_device!(IndiFilterWheel, DeviceType::FilterWheel, HANDLERS, as_filter_wheel => FilterWheel);

fn wheel(change: FilterWheelChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::FilterWheel(change))
}

impl IndiFilterWheel {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(FilterWheelState::default()),
        }
    }

    fn on_slot(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(element) = vector.number_element("FILTER_SLOT_VALUE") else {
            return;
        };
        let mut state = write_lock(&self.state);

        // The first declaration only tells how many slots there are.
        if vector.is_def() && state.slot_count == 0 {
            let slot_count = (element.max - element.min + 1.0).max(0.0) as u32;
            state.slot_count = slot_count;
            debug!(device = %self.core.name(), slot_count, "Filter wheel slots discovered");
            changes.push(wheel(FilterWheelChange::SlotCountChanged(slot_count)));
            return;
        }

        let position = element.value as u32;
        if state.position != position {
            state.position = position;
            changes.push(wheel(FilterWheelChange::PositionChanged(position)));
        }

        let moving = vector.state == PropertyState::Busy;
        if state.moving != moving {
            state.moving = moving;
            changes.push(wheel(FilterWheelChange::MovingChanged(moving)));
        }
    }

    fn on_names(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Elements::Text(elements) = &vector.elements else {
            return;
        };
        let names: Vec<String> = elements.iter().map(|e| e.value.clone()).collect();

        let mut state = write_lock(&self.state);
        if state.names != names {
            state.names = names.clone();
            changes.push(wheel(FilterWheelChange::NamesChanged(names)));
        }
    }
}

impl FilterWheel for IndiFilterWheel {
    fn slot_count(&self) -> u32 {
        read_lock(&self.state).slot_count
    }

    fn position(&self) -> u32 {
        read_lock(&self.state).position
    }

    fn is_moving(&self) -> bool {
        read_lock(&self.state).moving
    }

    fn names(&self) -> Vec<String> {
        read_lock(&self.state).names.clone()
    }

    fn move_to(&self, slot: u32) {
        if (1..=self.slot_count()).contains(&slot) {
            self.core.send_new_number("FILTER_SLOT", &[("FILTER_SLOT_VALUE", f64::from(slot))]);
        }
    }

    fn set_names(&self, names: &[String]) {
        let Some(declared) = self.core.property("FILTER_NAME") else {
            return;
        };
        let elements: Vec<String> =
            declared.elements.names().into_iter().map(str::to_string).collect();
        let values: Vec<(&str, &str)> = elements
            .iter()
            .zip(names)
            .map(|(element, name)| (element.as_str(), name.as_str()))
            .collect();

        if !values.is_empty() {
            self.core.send_new_text("FILTER_NAME", &values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indi::base::tests::core;
    use crate::indi::IndiDevice;
    use crate::protocol::{IndiMessage, NumberElement, TextElement, VectorOp};

    fn slot(op: VectorOp, value: f64, state: PropertyState) -> IndiMessage {
        Vector::new(
            op,
            "Wheel",
            "FILTER_SLOT",
            Elements::Number(vec![
                NumberElement::new("FILTER_SLOT_VALUE", value).with_range(1.0, 5.0, 1.0)
            ]),
        )
        .with_state(state)
        .into()
    }

    fn typed(changes: &[DeviceChange]) -> Vec<FilterWheelChange> {
        changes
            .iter()
            .filter_map(|change| match change {
                DeviceChange::Property(PropertyChange::FilterWheel(change)) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_slot_discovery_then_motion() {
        let (core, _rx) = core("Wheel");
        let wheel = IndiFilterWheel::new(core);

        let changes = wheel.handle_message(&slot(VectorOp::Def, 1.0, PropertyState::Idle));
        assert_eq!(typed(&changes), vec![FilterWheelChange::SlotCountChanged(5)]);
        assert_eq!(wheel.slot_count(), 5);

        let changes = wheel.handle_message(&slot(VectorOp::Set, 3.0, PropertyState::Busy));
        assert_eq!(
            typed(&changes),
            vec![FilterWheelChange::PositionChanged(3), FilterWheelChange::MovingChanged(true)]
        );
        assert!(wheel.is_moving());

        let changes = wheel.handle_message(&slot(VectorOp::Set, 3.0, PropertyState::Ok));
        assert_eq!(typed(&changes), vec![FilterWheelChange::MovingChanged(false)]);
        assert_eq!(wheel.position(), 3);
        assert!(!wheel.is_moving());
    }

    #[test]
    fn test_move_to_out_of_range_is_ignored() {
        let (core, mut rx) = core("Wheel");
        let wheel = IndiFilterWheel::new(core);
        wheel.handle_message(&slot(VectorOp::Def, 1.0, PropertyState::Idle));

        wheel.move_to(0);
        wheel.move_to(6);
        assert!(rx.try_recv().is_err());
        assert_eq!(wheel.position(), 0);

        wheel.move_to(5);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.as_vector().unwrap().number("FILTER_SLOT_VALUE"), Some(5.0));
    }

    #[test]
    fn test_names() {
        let (core, mut rx) = core("Wheel");
        let wheel = IndiFilterWheel::new(core);
        let names = Vector::new(
            VectorOp::Def,
            "Wheel",
            "FILTER_NAME",
            Elements::Text(vec![
                TextElement::new("FILTER_SLOT_NAME_1", "Red"),
                TextElement::new("FILTER_SLOT_NAME_2", "Green"),
            ]),
        );

        let changes = wheel.handle_message(&names.into());
        assert_eq!(
            typed(&changes),
            vec![FilterWheelChange::NamesChanged(vec!["Red".to_string(), "Green".to_string()])]
        );

        wheel.set_names(&["L".to_string(), "Ha".to_string()]);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.as_vector().unwrap().text("FILTER_SLOT_NAME_2"), Some("Ha"));
    }
}
