//! INDI flat field light box.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};

use crate::device::{DeviceChange, DeviceType, LightBox, LightBoxChange, PropertyChange};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::Vector;

#[derive(Debug, Default)]
struct LightBoxState {
    enabled: bool,
    intensity: f64,
    min_intensity: f64,
    max_intensity: f64,
}

/// Light box driven over INDI
#[derive(Debug)]
pub struct IndiLightBox {
    core: IndiDeviceCore,
    state: RwLock<LightBoxState>,
}

const HANDLERS: &[(&str, Handler<IndiLightBox>)] = &[
    ("FLAT_LIGHT_CONTROL", IndiLightBox::on_control),
    ("FLAT_LIGHT_INTENSITY", IndiLightBox::on_intensity),
];

indi_device!(IndiLightBox, DeviceType::LightBox, HANDLERS, as_light_box => LightBox);

fn light_box(change: LightBoxChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::LightBox(change))
}

impl IndiLightBox {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(LightBoxState::default()),
        }
    }

    fn on_control(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let enabled = vector.first_on_switch() == Some("FLAT_LIGHT_ON");
        let mut state = write_lock(&self.state);
        if state.enabled != enabled {
            state.enabled = enabled;
            changes.push(light_box(LightBoxChange::EnabledChanged(enabled)));
        }
    }

    fn on_intensity(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(element) = vector.number_element("FLAT_LIGHT_INTENSITY_VALUE") else {
            return;
        };
        let mut state = write_lock(&self.state);

        if vector.is_def() {
            state.min_intensity = element.min;
            state.max_intensity = element.max;
            changes.push(light_box(LightBoxChange::RangeChanged {
                min: element.min,
                max: element.max,
            }));
        }

        if state.intensity != element.value {
            state.intensity = element.value;
            changes.push(light_box(LightBoxChange::IntensityChanged(element.value)));
        }
    }
}

impl LightBox for IndiLightBox {
    fn is_enabled(&self) -> bool {
        read_lock(&self.state).enabled
    }

    fn intensity(&self) -> f64 {
        read_lock(&self.state).intensity
    }

    fn intensity_range(&self) -> (f64, f64) {
        let state = read_lock(&self.state);
        (state.min_intensity, state.max_intensity)
    }

    fn enable(&self) {
        self.core.send_new_switch(
            "FLAT_LIGHT_CONTROL",
            &[("FLAT_LIGHT_ON", true), ("FLAT_LIGHT_OFF", false)],
        );
    }

    fn disable(&self) {
        self.core.send_new_switch(
            "FLAT_LIGHT_CONTROL",
            &[("FLAT_LIGHT_ON", false), ("FLAT_LIGHT_OFF", true)],
        );
    }

    fn set_intensity(&self, intensity: f64) {
        let (min, max) = self.intensity_range();
        if max <= min {
            return;
        }
        self.core.send_new_number(
            "FLAT_LIGHT_INTENSITY",
            &[("FLAT_LIGHT_INTENSITY_VALUE", intensity.clamp(min, max))],
        );
    }
}
