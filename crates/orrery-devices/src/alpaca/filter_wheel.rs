//! Alpaca filter wheel.
//!
//! Alpaca counts slots from zero and reports `-1` while moving; slots are
//! exposed here from one like their INDI counterparts.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::debug;

use orrery_core::utils::{read_lock, write_lock};

use crate::alpaca::device::{update, AscomCore, AscomDevice, ClientShared};
use crate::alpaca::service::ConfiguredDevice;
use crate::device::{
    Device, DeviceChange, DeviceType, FilterWheel, FilterWheelChange, PropertyChange,
};

#[derive(Debug, Default)]
struct WheelState {
    slot_count: u32,
    position: u32,
    moving: bool,
    names: Vec<String>,
}

/// Filter wheel behind an Alpaca server
#[derive(Debug)]
pub struct AlpacaFilterWheel {
    core: Arc<AscomCore>,
    state: RwLock<WheelState>,
}

ascom_device!(AlpacaFilterWheel, as_filter_wheel => FilterWheel);

fn wheel(change: FilterWheelChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::FilterWheel(change))
}

impl AlpacaFilterWheel {
    pub(crate) fn new(info: ConfiguredDevice, shared: Arc<ClientShared>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this: Weak<dyn Device> = this.clone();
            Self {
                core: AscomCore::new(info, DeviceType::FilterWheel, "filterwheel", shared, this),
                state: RwLock::new(WheelState::default()),
            }
        })
    }

    async fn poll_names(&self) {
        let Some(names) = self.core.request::<Vec<String>>("names").await else {
            return;
        };
        let count = u32::try_from(names.len()).unwrap_or(u32::MAX);

        let (count_changed, names_changed) = {
            let mut state = write_lock(&self.state);
            (update(&mut state.slot_count, count), update(&mut state.names, names.clone()))
        };
        if count_changed {
            self.core.emit(wheel(FilterWheelChange::SlotCountChanged(count)));
        }
        if names_changed {
            self.core.emit(wheel(FilterWheelChange::NamesChanged(names)));
        }
    }

    async fn poll_position(&self) {
        let Some(position) = self.core.request::<i32>("position").await else {
            return;
        };

        let mut changes = Vec::new();
        {
            let mut state = write_lock(&self.state);
            let moving = position < 0;
            if update(&mut state.moving, moving) {
                changes.push(wheel(FilterWheelChange::MovingChanged(moving)));
            }
            if let Ok(index) = u32::try_from(position) {
                let slot = index + 1;
                if update(&mut state.position, slot) {
                    changes.push(wheel(FilterWheelChange::PositionChanged(slot)));
                }
            }
        }
        for change in changes {
            self.core.emit(change);
        }
    }
}

#[async_trait]
impl AscomDevice for AlpacaFilterWheel {
    fn core(&self) -> &Arc<AscomCore> {
        &self.core
    }

    async fn on_connected(&self) {
        self.poll_names().await;
    }

    async fn refresh(&self) {
        self.poll_position().await;
    }
}

impl FilterWheel for AlpacaFilterWheel {
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
        if slot >= 1 && slot <= self.slot_count() {
            self.core.command("position", vec![("Position", (slot - 1).to_string())]);
        }
    }

    fn set_names(&self, _names: &[String]) {
        debug!(device = %self.core.name(), "Alpaca filter names are read-only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::device::refresh_once;
    use crate::alpaca::testing::{configured, mock_value, shared};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_positions_are_one_based() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;

        mock_value(&server, "filterwheel/0/connected", json!(true)).await;
        mock_value(&server, "filterwheel/0/names", json!(["L", "R", "G", "B", "Ha"])).await;
        mock_value(&server, "filterwheel/0/position", json!(2)).await;

        let device = AlpacaFilterWheel::new(configured("FilterWheel", "Wheel"), shared);
        refresh_once(device.as_ref()).await;

        assert_eq!(device.slot_count(), 5);
        assert_eq!(device.names()[4], "Ha");
        assert_eq!(device.position(), 3);
        assert!(!device.is_moving());

        server.reset().await;
        mock_value(&server, "filterwheel/0/connected", json!(true)).await;
        mock_value(&server, "filterwheel/0/position", json!(-1)).await;
        refresh_once(device.as_ref()).await;

        assert!(device.is_moving());
        assert_eq!(device.position(), 3);
    }

    #[tokio::test]
    async fn test_move_to_validates_slot() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;

        mock_value(&server, "filterwheel/0/connected", json!(true)).await;
        mock_value(&server, "filterwheel/0/names", json!(["L", "R", "G"])).await;
        mock_value(&server, "filterwheel/0/position", json!(0)).await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/filterwheel/0/position"))
            .and(body_string_contains("Position=2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ErrorNumber": 0, "ErrorMessage": ""})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let device = AlpacaFilterWheel::new(configured("FilterWheel", "Wheel"), shared);
        refresh_once(device.as_ref()).await;

        device.move_to(0);
        device.move_to(4);
        device.move_to(3);
        tokio::time::sleep(Duration::from_millis(100)).await;

        server.verify().await;
    }
}
