//! Hub fed by an INDI client over a piped connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;

use orrery_core::config::{HubConfig, IndiConfig};
use orrery_devices::device::{FilterWheelChange, PropertyChange};
use orrery_devices::protocol::{
    Elements, NumberElement, PropertyState, TextElement, Vector, VectorOp,
};
use orrery_devices::transport::PipedConnection;
use orrery_devices::{DeviceEvent, DeviceType, IndiClient};
use orrery_hub::EventHub;

fn driver_info() -> Vector {
    Vector::new(
        VectorOp::Def,
        "Wheel",
        "DRIVER_INFO",
        Elements::Text(vec![
            TextElement::new("DRIVER_NAME", "Wheel"),
            TextElement::new("DRIVER_EXEC", "indi_simulator_wheel"),
            TextElement::new("DRIVER_VERSION", "1.0"),
            TextElement::new("DRIVER_INTERFACE", "16"),
        ]),
    )
}

fn slot(op: VectorOp, value: f64, state: PropertyState) -> Vector {
    Vector::new(
        op,
        "Wheel",
        "FILTER_SLOT",
        Elements::Number(vec![
            NumberElement::new("FILTER_SLOT_VALUE", value).with_range(1.0, 5.0, 1.0)
        ]),
    )
    .with_state(state)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn filter_wheel_updates_are_throttled() -> anyhow::Result<()> {
    let hub = EventHub::new(&HubConfig::default());
    hub.start()?;
    let mut rx = hub.subscribe();

    let (connection, driver) = PipedConnection::pair("wheel");
    let client = IndiClient::with_connection(Arc::new(connection), &IndiConfig::default());
    client.register_handler(hub.handler());
    client.start();
    hub.listen("Wheel");

    driver.send(driver_info());
    driver.send(slot(VectorOp::Def, 1.0, PropertyState::Idle));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let attached = drain(&mut rx);
    assert!(matches!(
        attached.as_slice(),
        [DeviceEvent::Attached { device_type: DeviceType::FilterWheel, .. }]
    ));

    driver.send(slot(VectorOp::Set, 3.0, PropertyState::Busy));
    driver.send(slot(VectorOp::Set, 3.0, PropertyState::Ok));
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let forwarded = drain(&mut rx);
    assert_eq!(forwarded.len(), 1);
    assert!(matches!(
        &forwarded[0],
        DeviceEvent::PropertyChanged {
            change: PropertyChange::FilterWheel(FilterWheelChange::MovingChanged(false)),
            ..
        }
    ));
    assert_eq!(client.device("Wheel").unwrap().as_filter_wheel().unwrap().position(), 3);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(drain(&mut rx).is_empty());

    client.close().await;
    hub.close().await;
    Ok(())
}
