//! INDI GPS receiver, and the site handling mounts share with it.

use std::sync::RwLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use orrery_core::utils::{read_lock, write_lock};
use tracing::debug;

use crate::device::{
    DeviceChange, DeviceType, GeographicCoordinate, Gps, GpsChange, PropertyChange,
};
use crate::indi::base::{Handler, IndiDeviceCore};
use crate::protocol::{PropertyPermission, Vector};

/// Location and time reported by `GEOGRAPHIC_COORD` and `TIME_UTC`
#[derive(Debug, Default)]
pub(crate) struct GpsState {
    pub(crate) has_gps: bool,
    pub(crate) coordinates: GeographicCoordinate,
    pub(crate) time: Option<DateTime<FixedOffset>>,
}

impl GpsState {
    /// Apply `GEOGRAPHIC_COORD`
    ///
    /// A read-only declaration means the driver measures the location
    /// itself; the device then attaches as a GPS.
    pub(crate) fn on_coordinates(&mut self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        if vector.is_def() {
            if !self.has_gps && vector.perm == PropertyPermission::ReadOnly {
                self.has_gps = true;
                changes.push(DeviceChange::Attach(DeviceType::Gps));
            }
            self.coordinates = read_coordinates(vector);
            return;
        }

        let coordinates = read_coordinates(vector);
        self.coordinates = coordinates;
        changes.push(DeviceChange::Property(PropertyChange::Gps(
            GpsChange::CoordinateChanged(coordinates),
        )));
    }

    /// Apply `TIME_UTC`
    pub(crate) fn on_time(&mut self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let Some(utc) = vector.text("UTC") else {
            return;
        };
        let offset = vector.text("OFFSET").unwrap_or("0");

        match parse_time(utc, offset) {
            Some(time) => {
                self.time = Some(time);
                if !vector.is_def() {
                    changes.push(DeviceChange::Property(PropertyChange::Gps(
                        GpsChange::TimeChanged(time),
                    )));
                }
            }
            None => debug!(vector = %vector.name, utc, offset, "Unreadable time"),
        }
    }
}

fn read_coordinates(vector: &Vector) -> GeographicCoordinate {
    GeographicCoordinate {
        latitude: vector.number("LAT").unwrap_or_default(),
        longitude: vector.number("LONG").unwrap_or_default(),
        elevation: vector.number("ELEV").unwrap_or_default(),
    }
}

/// Parse an INDI `UTC` timestamp with an `OFFSET` in hours
pub(crate) fn parse_time(utc: &str, offset: &str) -> Option<DateTime<FixedOffset>> {
    let utc = utc.trim().trim_end_matches('Z');
    let naive = NaiveDateTime::parse_from_str(utc, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    let hours: f64 = offset.trim().parse().unwrap_or(0.0);
    let zone = FixedOffset::east_opt((hours * 3600.0).round() as i32)?;
    Some(zone.from_utc_datetime(&naive))
}

/// GPS receiver driven over INDI
#[derive(Debug)]
pub struct IndiGps {
    core: IndiDeviceCore,
    state: RwLock<GpsState>,
}

const HANDLERS: &[(&str, Handler<IndiGps>)] = &[
    ("GEOGRAPHIC_COORD", IndiGps::on_coordinates),
    ("TIME_UTC", IndiGps::on_time),
];

indi_device!(IndiGps, DeviceType::Gps, HANDLERS, as_gps => Gps);

impl IndiGps {
    /// Wrap a device core
    pub fn new(core: IndiDeviceCore) -> Self {
        Self {
            core,
            state: RwLock::new(GpsState::default()),
        }
    }

    fn on_coordinates(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        write_lock(&self.state).on_coordinates(vector, changes);
    }

    fn on_time(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        write_lock(&self.state).on_time(vector, changes);
    }
}

impl Gps for IndiGps {
    fn has_gps(&self) -> bool {
        read_lock(&self.state).has_gps
    }

    fn coordinates(&self) -> GeographicCoordinate {
        read_lock(&self.state).coordinates
    }

    fn time(&self) -> Option<DateTime<FixedOffset>> {
        read_lock(&self.state).time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indi::base::tests::core;
    use crate::indi::IndiDevice;
    use crate::protocol::{Elements, NumberElement, TextElement, VectorOp};
    use chrono::Timelike;

    fn coordinates(op: VectorOp, latitude: f64) -> Vector {
        Vector::new(
            op,
            "GPS",
            "GEOGRAPHIC_COORD",
            Elements::Number(vec![
                NumberElement::new("LAT", latitude),
                NumberElement::new("LONG", -8.6),
                NumberElement::new("ELEV", 120.0),
            ]),
        )
        .with_perm(PropertyPermission::ReadOnly)
    }

    #[test]
    fn test_read_only_declaration_attaches_once() {
        let (core, _rx) = core("GPS");
        let gps = IndiGps::new(core);

        let changes = gps.handle_message(&coordinates(VectorOp::Def, 41.1).into());
        assert!(changes.contains(&DeviceChange::Attach(DeviceType::Gps)));
        assert!(!changes
            .iter()
            .any(|c| matches!(c, DeviceChange::Property(PropertyChange::Gps(_)))));
        assert!(gps.has_gps());

        let changes = gps.handle_message(&coordinates(VectorOp::Set, 41.2).into());
        assert!(!changes.contains(&DeviceChange::Attach(DeviceType::Gps)));
        assert!(changes.iter().any(|c| matches!(
            c,
            DeviceChange::Property(PropertyChange::Gps(GpsChange::CoordinateChanged(
                GeographicCoordinate { latitude, .. }
            ))) if *latitude == 41.2
        )));
        assert_eq!(gps.coordinates().elevation, 120.0);
    }

    #[test]
    fn test_writable_coordinates_do_not_attach() {
        let (core, _rx) = core("GPS");
        let gps = IndiGps::new(core);
        let vector = coordinates(VectorOp::Def, 41.1).with_perm(PropertyPermission::ReadWrite);

        let changes = gps.handle_message(&vector.into());
        assert!(!changes.contains(&DeviceChange::Attach(DeviceType::Gps)));
        assert!(!gps.has_gps());
    }

    #[test]
    fn test_time() {
        let (core, _rx) = core("GPS");
        let gps = IndiGps::new(core);
        let time = Vector::new(
            VectorOp::Set,
            "GPS",
            "TIME_UTC",
            Elements::Text(vec![
                TextElement::new("UTC", "2024-03-01T22:15:30"),
                TextElement::new("OFFSET", "-3.00"),
            ]),
        );

        let changes = gps.handle_message(&time.into());
        assert_eq!(changes.len(), 2);

        let time = gps.time().unwrap();
        assert_eq!(time.offset().local_minus_utc(), -3 * 3600);
        assert_eq!(time.naive_utc().hour(), 22);
        assert_eq!(time.hour(), 19);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("yesterday", "0").is_none());
        assert!(parse_time("2024-03-01T22:15:30.250Z", "0").is_some());
    }
}
