//! Alpaca focuser.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;

use orrery_core::utils::{read_lock, write_lock};

use crate::alpaca::device::{update, AscomCore, AscomDevice, ClientShared};
use crate::alpaca::service::ConfiguredDevice;
use crate::device::{
    Device, DeviceChange, DeviceType, Focuser, FocuserChange, PropertyChange, Thermometer,
    ThermometerChange,
};

#[derive(Debug, Default)]
struct FocuserState {
    position: i32,
    moving: bool,
    max_position: i32,
    can_absolute: bool,
    has_thermometer: bool,
    temperature: f64,
}

/// Focuser behind an Alpaca server
#[derive(Debug)]
pub struct AlpacaFocuser {
    core: Arc<AscomCore>,
    state: RwLock<FocuserState>,
}

ascom_device!(AlpacaFocuser, as_focuser => Focuser, as_thermometer => Thermometer);

fn focuser(change: FocuserChange) -> DeviceChange {
    DeviceChange::Property(PropertyChange::Focuser(change))
}

impl AlpacaFocuser {
    pub(crate) fn new(info: ConfiguredDevice, shared: Arc<ClientShared>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this: Weak<dyn Device> = this.clone();
            Self {
                core: AscomCore::new(info, DeviceType::Focuser, "focuser", shared, this),
                state: RwLock::new(FocuserState::default()),
            }
        })
    }

    async fn poll_position(&self) {
        let Some(position) = self.core.request::<i32>("position").await else {
            return;
        };
        if update(&mut write_lock(&self.state).position, position) {
            self.core.emit(focuser(FocuserChange::PositionChanged(position)));
        }
    }

    async fn poll_moving(&self) {
        let Some(moving) = self.core.request::<bool>("ismoving").await else {
            return;
        };
        if update(&mut write_lock(&self.state).moving, moving) {
            self.core.emit(focuser(FocuserChange::MovingChanged(moving)));
        }
    }

    async fn poll_temperature(&self, probe: bool) {
        if !probe && !read_lock(&self.state).has_thermometer {
            return;
        }
        let Some(temperature) = self.core.request::<f64>("temperature").await else {
            return;
        };

        if update(&mut write_lock(&self.state).has_thermometer, true) {
            self.core.attach(DeviceType::Thermometer);
        }
        if update(&mut write_lock(&self.state).temperature, temperature) {
            self.core
                .emit(DeviceChange::Property(PropertyChange::Thermometer(
                    ThermometerChange::TemperatureChanged(temperature),
                )));
        }
    }
}

#[async_trait]
impl AscomDevice for AlpacaFocuser {
    fn core(&self) -> &Arc<AscomCore> {
        &self.core
    }

    async fn on_connected(&self) {
        if let Some(absolute) = self.core.request::<bool>("absolute").await {
            write_lock(&self.state).can_absolute = absolute;
        }
        if let Some(max) = self.core.request::<i32>("maxstep").await {
            if update(&mut write_lock(&self.state).max_position, max) {
                self.core.emit(focuser(FocuserChange::MaxPositionChanged(max)));
            }
        }
        self.poll_temperature(true).await;
        self.poll_position().await;
    }

    async fn refresh(&self) {
        self.poll_moving().await;
        self.poll_position().await;
        self.poll_temperature(false).await;
    }
}

impl Focuser for AlpacaFocuser {
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
        read_lock(&self.state).can_absolute
    }

    fn can_relative_move(&self) -> bool {
        !read_lock(&self.state).can_absolute
    }

    fn can_abort(&self) -> bool {
        true
    }

    fn can_reverse(&self) -> bool {
        false
    }

    fn can_sync(&self) -> bool {
        false
    }

    fn is_reversed(&self) -> bool {
        false
    }

    fn move_in(&self, steps: u32) {
        let steps = i32::try_from(steps).unwrap_or(i32::MAX);
        let target = {
            let state = read_lock(&self.state);
            if state.can_absolute {
                state.position.saturating_add(steps)
            } else {
                steps
            }
        };
        self.core.command("move", vec![("Position", target.to_string())]);
    }

    fn move_out(&self, steps: u32) {
        let steps = i32::try_from(steps).unwrap_or(i32::MAX);
        let target = {
            let state = read_lock(&self.state);
            if state.can_absolute {
                state.position.saturating_sub(steps)
            } else {
                -steps
            }
        };
        self.core.command("move", vec![("Position", target.to_string())]);
    }

    fn move_to(&self, position: i32) {
        if self.can_absolute_move() {
            self.core.command("move", vec![("Position", position.to_string())]);
        }
    }

    fn abort(&self) {
        self.core.command("halt", Vec::new());
    }

    fn reverse(&self, _enabled: bool) {}

    fn sync(&self, _position: i32) {}
}

impl Thermometer for AlpacaFocuser {
    fn has_thermometer(&self) -> bool {
        read_lock(&self.state).has_thermometer
    }

    fn temperature(&self) -> f64 {
        read_lock(&self.state).temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::device::refresh_once;
    use crate::alpaca::testing::{configured, mock_value, recorder, shared};
    use crate::device::{ConnectionChange, DeviceEvent};
    use serde_json::json;
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_connect_reads_capabilities_and_refreshes() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;
        let events = recorder(&shared);

        mock_value(&server, "focuser/0/connected", json!(true)).await;
        mock_value(&server, "focuser/0/absolute", json!(true)).await;
        mock_value(&server, "focuser/0/maxstep", json!(50000)).await;
        mock_value(&server, "focuser/0/temperature", json!(4.5)).await;
        mock_value(&server, "focuser/0/position", json!(1200)).await;
        mock_value(&server, "focuser/0/ismoving", json!(false)).await;

        let device = AlpacaFocuser::new(configured("Focuser", "Sim Focuser"), shared.clone());
        refresh_once(device.as_ref()).await;

        assert!(device.is_connected());
        assert!(device.can_absolute_move());
        assert_eq!(device.max_position(), 50000);
        assert_eq!(device.position(), 1200);
        assert!(device.has_thermometer());
        assert_eq!(device.temperature(), 4.5);
        assert!(device.core().has_type(DeviceType::Thermometer));

        let recorded = events.lock().unwrap().clone();
        assert!(matches!(
            recorded.first(),
            Some(DeviceEvent::ConnectionChanged { change: ConnectionChange::Connected, .. })
        ));
        assert!(recorded.iter().any(|e| matches!(
            e,
            DeviceEvent::Attached { device_type: DeviceType::Thermometer, .. }
        )));
        let positions = recorded
            .iter()
            .filter(|e| matches!(
                e,
                DeviceEvent::PropertyChanged {
                    change: PropertyChange::Focuser(FocuserChange::PositionChanged(_)),
                    ..
                }
            ))
            .count();

        // A second cycle with identical values reports nothing new.
        refresh_once(device.as_ref()).await;
        let again = events.lock().unwrap().len();
        assert_eq!(positions, 1);
        assert_eq!(again, recorded.len());
    }

    #[tokio::test]
    async fn test_relative_moves_without_absolute_support() {
        let server = MockServer::start().await;
        let shared = shared(&server).await;
        let device = AlpacaFocuser::new(configured("Focuser", "Relative"), shared);

        assert!(device.can_relative_move());
        device.move_to(100);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
