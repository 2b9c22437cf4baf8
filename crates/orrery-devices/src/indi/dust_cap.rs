//! INDI dust cap.

use std::sync::RwLock;

use orrery_core::utils::{read_lock, write_lock};

use crate::device::{DeviceChange, DeviceType, DustCap, DustCapChange, PropertyChange};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{PropertyState, Vector};

#[derive(Debug, Default)]
struct DustCapState {
    can_park: bool,
    parked: bool,
    parking: bool,
}

/// Dust cap driven over INDI
#[derive(Debug)]
pub struct IndiDustCap {
    core: IndiDeviceCore,
    state: RwLock<DustCapState>,
}

const HANDLERS: &[(&str, Handler<IndiDustCap>)] = &[("CAP_PARK", IndiDustCap::on_park)];

indi_device!(IndiDustCap, DeviceType::DustCap, HANDLERS, as_dust_cap => DustCap);

impl IndiDustCap {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(DustCapState::default()),
        }
    }

    fn on_park(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let mut state = write_lock(&self.state);
        if vector.is_def() {
            state.can_park = true;
        }

        let parking = vector.state == PropertyState::Busy;
        if state.parking != parking {
            state.parking = parking;
            changes.push(DeviceChange::Property(PropertyChange::DustCap(
                DustCapChange::ParkingChanged(parking),
            )));
        }

        let parked = vector.first_on_switch() == Some("PARK");
        if state.parked != parked {
            state.parked = parked;
            changes.push(DeviceChange::Property(PropertyChange::DustCap(
                DustCapChange::ParkedChanged(parked),
            )));
        }
    }
}

impl DustCap for IndiDustCap {
    fn can_park(&self) -> bool {
        read_lock(&self.state).can_park
    }

    fn is_parked(&self) -> bool {
        read_lock(&self.state).parked
    }

    fn is_parking(&self) -> bool {
        read_lock(&self.state).parking
    }

    fn park(&self) {
        if self.can_park() {
            self.core.send_new_switch("CAP_PARK", &[("PARK", true), ("UNPARK", false)]);
        }
    }

    fn unpark(&self) {
        if self.can_park() {
            self.core.send_new_switch("CAP_PARK", &[("PARK", false), ("UNPARK", true)]);
        }
    }
}
