//! Alpaca client against a mocked server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orrery_core::config::AlpacaConfig;
use orrery_devices::device::{ConnectionChange, FilterWheelChange, PropertyChange};
use orrery_devices::{AlpacaClient, DeviceEvent, DeviceType};

async fn mock_get(server: &MockServer, route: &str, value: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Value": value, "ErrorNumber": 0, "ErrorMessage": ""
        })))
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn filter_wheel_session() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_get(
        &server,
        "/management/v1/configureddevices",
        json!([{
            "DeviceName": "Wheel", "DeviceType": "FilterWheel",
            "DeviceNumber": 0, "UniqueID": "wheel-0"
        }]),
    )
    .await;
    mock_get(&server, "/api/v1/filterwheel/0/connected", json!(true)).await;
    mock_get(&server, "/api/v1/filterwheel/0/driverinfo", json!("Wheel Simulator")).await;
    mock_get(&server, "/api/v1/filterwheel/0/driverversion", json!("6.6")).await;
    mock_get(&server, "/api/v1/filterwheel/0/interfaceversion", json!(2)).await;
    mock_get(&server, "/api/v1/filterwheel/0/names", json!(["L", "R", "G", "B"])).await;
    mock_get(&server, "/api/v1/filterwheel/0/position", json!(1)).await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/filterwheel/0/position"))
        .and(body_string_contains("Position=3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ErrorNumber": 0, "ErrorMessage": ""})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let address = server.address();
    let config = AlpacaConfig {
        poll_interval_ms: 50,
        ..Default::default()
    };
    let client = AlpacaClient::new(&address.ip().to_string(), address.port(), &config)?;

    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();
    client.register_handler(Arc::new(move |event: &DeviceEvent| {
        recorder.lock().unwrap().push(event.clone());
    }));

    assert_eq!(client.discovery().await?, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let device = client.device("Wheel").expect("wheel attached");
    assert_eq!(device.device_type(), DeviceType::FilterWheel);
    assert!(device.is_connected());
    assert_eq!(device.driver().exec, "Wheel Simulator");
    assert_eq!(device.driver().version, "6.6");

    let wheel = device.as_filter_wheel().expect("filter wheel capability");
    assert_eq!(wheel.slot_count(), 4);
    assert_eq!(wheel.position(), 2);
    assert_eq!(wheel.names(), vec!["L", "R", "G", "B"]);

    wheel.move_to(4);
    wheel.move_to(5);
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.close().await;
    assert!(client.devices().is_empty());

    let events = events.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(DeviceEvent::Attached { device_type: DeviceType::FilterWheel, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        DeviceEvent::ConnectionChanged {
            change: ConnectionChange::Connected,
            ..
        }
    )));
    let positions = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                DeviceEvent::PropertyChanged {
                    change: PropertyChange::FilterWheel(FilterWheelChange::PositionChanged(2)),
                    ..
                }
            )
        })
        .count();
    assert_eq!(positions, 1);
    assert!(matches!(
        events.last(),
        Some(DeviceEvent::Detached { device_type: DeviceType::FilterWheel, .. })
    ));
    Ok(())
}
