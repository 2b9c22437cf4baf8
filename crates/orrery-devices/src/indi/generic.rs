//! INDI device of unknown kind.

use crate::device::DeviceType;
use crate::indi::base::{Handler, IndiDeviceCore};

/// Device whose driver is not in the driver table
///
/// Properties are stored and reported through generic vector events only.
#[derive(Debug)]
pub struct IndiGenericDevice {
    core: IndiDeviceCore,
}

const HANDLERS: &[(&str, Handler<IndiGenericDevice>)] = &[];

indi_device!(IndiGenericDevice, DeviceType::Generic, HANDLERS);

impl IndiGenericDevice {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self { core }
    }
}
