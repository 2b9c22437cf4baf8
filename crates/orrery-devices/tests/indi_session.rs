//! INDI client against a scripted server on a real TCP socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use orrery_core::config::IndiConfig;
use orrery_devices::device::{FocuserChange, PropertyChange};
use orrery_devices::{DeviceEvent, DeviceType, IndiClient};

const DRIVER_INFO: &str = r#"<defTextVector device="Focuser Simulator" name="DRIVER_INFO"
  label="Driver Info" group="General Info" state="Idle" perm="ro">
  <defText name="DRIVER_NAME">Focuser Simulator</defText>
  <defText name="DRIVER_EXEC">indi_simulator_focus</defText>
  <defText name="DRIVER_VERSION">1.0</defText>
  <defText name="DRIVER_INTERFACE">8</defText>
</defTextVector>
"#;

const ABS_POSITION: &str = r#"<defNumberVector device="Focuser Simulator" name="ABS_FOCUS_POSITION"
  label="Absolute Position" group="Main Control" state="Idle" perm="rw">
  <defNumber name="FOCUS_ABSOLUTE_POSITION" label="Steps" format="%6.0f"
    min="0" max="100000" step="1000">40000</defNumber>
</defNumberVector>
"#;

const MOVING: &str = r#"<setNumberVector device="Focuser Simulator"
  name="ABS_FOCUS_POSITION" state="Busy">
  <oneNumber name="FOCUS_ABSOLUTE_POSITION">41000</oneNumber>
</setNumberVector>
"#;

const ARRIVED: &str = r#"<setNumberVector device="Focuser Simulator"
  name="ABS_FOCUS_POSITION" state="Ok">
  <oneNumber name="FOCUS_ABSOLUTE_POSITION">42000</oneNumber>
</setNumberVector>
"#;

async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut received = String::new();
    let mut buffer = [0u8; 1024];
    while !received.contains(needle) {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buffer))
            .await
            .expect("timed out waiting for the client")
            .unwrap();
        assert!(n > 0, "client closed the socket");
        received.push_str(&String::from_utf8_lossy(&buffer[..n]));
    }
    received
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[test_log::test(tokio::test)]
async fn focuser_session_over_tcp() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let client = IndiClient::connect("127.0.0.1", port, &IndiConfig::default()).await?;
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();
    client.register_handler(Arc::new(move |event: &DeviceEvent| {
        recorder.lock().unwrap().push(event.clone());
    }));

    let (mut server, _) = listener.accept().await?;
    client.start();

    let hello = read_until(&mut server, "getProperties").await;
    assert!(hello.contains(r#"version="1.7""#));

    server.write_all(DRIVER_INFO.as_bytes()).await?;
    server.write_all(ABS_POSITION.as_bytes()).await?;
    settle().await;

    let device = client.device("Focuser Simulator").expect("focuser attached");
    assert_eq!(device.device_type(), DeviceType::Focuser);
    assert_eq!(client.devices_of(DeviceType::Focuser).len(), 1);

    let focuser = device.as_focuser().expect("focuser capability");
    assert!(focuser.can_absolute_move());
    assert_eq!(focuser.max_position(), 100000);
    assert_eq!(focuser.position(), 40000);

    focuser.move_to(42000);
    let command = read_until(&mut server, "</newNumberVector>").await;
    assert!(command.contains(r#"name="ABS_FOCUS_POSITION""#));
    assert!(command.contains("42000"));

    server.write_all(MOVING.as_bytes()).await?;
    server.write_all(ARRIVED.as_bytes()).await?;
    settle().await;
    assert_eq!(focuser.position(), 42000);
    assert!(!focuser.is_moving());

    let changes: Vec<FocuserChange> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::PropertyChanged {
                change: PropertyChange::Focuser(change),
                ..
            } => Some(change.clone()),
            _ => None,
        })
        .collect();
    assert!(changes.contains(&FocuserChange::MovingChanged(true)));
    assert!(changes.contains(&FocuserChange::PositionChanged(42000)));
    assert_eq!(changes.last(), Some(&FocuserChange::MovingChanged(false)));

    drop(server);
    settle().await;
    assert!(!client.is_open());
    assert!(client.devices().is_empty());

    let events = events.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(DeviceEvent::Attached { device_type: DeviceType::Focuser, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(DeviceEvent::Detached { device_type: DeviceType::Focuser, .. })
    ));
    Ok(())
}
