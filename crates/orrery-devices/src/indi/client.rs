/*!
 * INDI client: one connection, its device registry and dispatch loop.
 *
 * The reader task is the only writer of the device map. A frame for a
 * device that has not identified its driver yet is buffered until its
 * `DRIVER_INFO` arrives; the device is then built from the driver table,
 * announced, and the buffered frames are replayed in order.
 */
use std::collections::{HashMap, VecDeque};
use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

use orrery_core::config::IndiConfig;
use orrery_core::logging::device_span;
use orrery_core::utils::lock;

use crate::device::{
    DeviceChange, DeviceEvent, DeviceEventHandler, DeviceRef, DeviceType, DriverInfo, DriverTable,
    EventHandlers,
};
use crate::error::Result;
use crate::indi::{create_device, IndiDevice, IndiDeviceCore};
use crate::protocol::{GetProperties, IndiMessage, Vector, VectorOp};
use crate::transport::{
    spawn_writer, CommandSender, ProcessConnection, SharedConnection, SocketConnection,
};

#[derive(Clone)]
struct DeviceEntry {
    device: DeviceRef,
    indi: Arc<dyn IndiDevice>,
    types: Vec<DeviceType>,
}

struct ClientInner {
    id: Uuid,
    connection: SharedConnection,
    commands: CommandSender,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    devices: DashMap<String, DeviceEntry>,
    pending: Mutex<HashMap<String, VecDeque<IndiMessage>>>,
    handlers: EventHandlers,
    drivers: DriverTable,
    max_pending: usize,
    message_capacity: usize,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Client of one INDI server or driver
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct IndiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for IndiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndiClient")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.connection.peer())
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

impl IndiClient {
    /// Connect to an INDI server over TCP
    pub async fn connect(host: &str, port: u16, config: &IndiConfig) -> Result<Self> {
        let connection = SocketConnection::connect(host, port, config.connect_timeout()).await?;
        Ok(Self::with_connection(Arc::new(connection), config))
    }

    /// Spawn a local driver and talk to it over its standard streams
    pub fn spawn_driver<P, I, A>(program: P, args: I, config: &IndiConfig) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let connection = ProcessConnection::spawn(program, args)?;
        Ok(Self::with_connection(Arc::new(connection), config))
    }

    /// Use an established connection
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_connection(connection: SharedConnection, config: &IndiConfig) -> Self {
        let (commands, writer) = spawn_writer(connection.clone());

        Self {
            inner: Arc::new(ClientInner {
                id: Uuid::new_v4(),
                connection,
                commands,
                writer: Mutex::new(Some(writer)),
                reader: Mutex::new(None),
                devices: DashMap::new(),
                pending: Mutex::new(HashMap::new()),
                handlers: EventHandlers::new(),
                drivers: DriverTable::with_overrides(&config.drivers),
                max_pending: config.max_pending_messages.max(1),
                message_capacity: config.message_log_capacity,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Client id, passed to [`DeviceEventHandler::on_connection_closed`]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Peer description
    pub fn peer(&self) -> &str {
        self.inner.connection.peer()
    }

    /// Add an event handler
    pub fn register_handler(&self, handler: Arc<dyn DeviceEventHandler>) {
        self.inner.handlers.register(handler);
    }

    /// Remove an event handler
    pub fn unregister_handler(&self, handler: &Arc<dyn DeviceEventHandler>) {
        self.inner.handlers.unregister(handler);
    }

    /// Send `getProperties` and start the reader task; later calls do nothing
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner
            .commands
            .send(IndiMessage::GetProperties(GetProperties::default()));

        let inner = self.inner.clone();
        let span = device_span("reader", self.inner.connection.peer());
        let handle = tokio::spawn(async move { inner.run().await }.instrument(span));
        *lock(&self.inner.reader) = Some(handle);
    }

    /// Queue a raw message
    pub fn send(&self, message: IndiMessage) {
        self.inner.commands.send(message);
    }

    /// Every attached device
    pub fn devices(&self) -> Vec<DeviceRef> {
        self.inner
            .devices
            .iter()
            .map(|entry| entry.value().device.clone())
            .collect()
    }

    /// Device by name
    pub fn device(&self, name: &str) -> Option<DeviceRef> {
        self.inner.devices.get(name).map(|entry| entry.device.clone())
    }

    /// Devices registered under `device_type`
    pub fn devices_of(&self, device_type: DeviceType) -> Vec<DeviceRef> {
        self.inner
            .devices
            .iter()
            .filter(|entry| entry.types.contains(&device_type))
            .map(|entry| entry.value().device.clone())
            .collect()
    }

    /// Whether the connection is still usable
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.connection.is_open()
    }

    /// Close the connection and detach every device
    ///
    /// Idempotent. Must not be awaited from inside an event handler, which
    /// runs on the reader task this waits for.
    pub async fn close(&self) {
        self.inner.connection.close().await;

        let reader = lock(&self.inner.reader).take();
        match reader {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(client = %self.inner.id, "INDI reader task failed: {}", e);
                }
                self.inner.teardown().await;
            }
            None => self.inner.teardown().await,
        }
    }
}

impl ClientInner {
    async fn run(self: Arc<Self>) {
        info!(client = %self.id, peer = %self.connection.peer(), "INDI reader started");

        while let Some(message) = self.connection.read().await {
            self.route(message);
        }

        self.teardown().await;
    }

    fn route(&self, message: IndiMessage) {
        let Some(name) = message.device().map(str::to_string) else {
            match message {
                IndiMessage::Message(message) => {
                    info!(peer = %self.connection.peer(), "{}", message.text);
                    self.handlers.emit(&DeviceEvent::MessageReceived {
                        device: None,
                        text: message.text,
                    });
                }
                other => trace!("Ignoring frame without device: {:?}", other),
            }
            return;
        };

        if message.is_device_removal() {
            self.detach(&name);
            return;
        }

        if let Some(entry) = self.entry(&name) {
            self.deliver(&name, &entry, &message);
            return;
        }

        if is_driver_info(&message) {
            self.attach(name, message);
        } else {
            self.buffer(name, message);
        }
    }

    fn entry(&self, name: &str) -> Option<DeviceEntry> {
        self.devices.get(name).map(|entry| entry.value().clone())
    }

    fn deliver(&self, name: &str, entry: &DeviceEntry, message: &IndiMessage) {
        for change in entry.indi.handle_message(message) {
            match change {
                DeviceChange::Attach(device_type) => {
                    if !self.add_type(name, device_type) {
                        continue;
                    }
                    info!(device = %name, %device_type, "Device attached");
                }
                DeviceChange::Detach(device_type) => {
                    if !self.remove_type(name, device_type) {
                        continue;
                    }
                    info!(device = %name, %device_type, "Device detached");
                }
                _ => {}
            }
            self.handlers.emit(&change.into_event(entry.device.clone()));
        }
    }

    fn attach(&self, name: String, message: IndiMessage) {
        let Some(vector) = message.as_vector() else {
            return;
        };
        let driver = DriverInfo::from_vector(vector);
        let device_type = self.drivers.resolve(&driver);
        let exec = driver.exec.clone();

        let core = IndiDeviceCore::new(
            name.clone(),
            self.commands.clone(),
            driver,
            self.message_capacity,
        );
        let (device, indi) = create_device(device_type, core);
        let primary = device.device_type();

        // A GPS driver is announced once it reports a measured location.
        let types = if primary == DeviceType::Gps {
            Vec::new()
        } else {
            vec![primary]
        };

        let entry = DeviceEntry {
            device,
            indi,
            types: types.clone(),
        };
        self.devices.insert(name.clone(), entry.clone());

        info!(device = %name, device_type = %primary, driver = %exec, "Device attached");
        for device_type in types {
            self.handlers.emit(&DeviceEvent::Attached {
                device: entry.device.clone(),
                device_type,
            });
        }

        let pending = lock(&self.pending).remove(&name).unwrap_or_default();
        if !pending.is_empty() {
            debug!(device = %name, count = pending.len(), "Replaying buffered frames");
        }
        for buffered in pending {
            self.deliver(&name, &entry, &buffered);
        }
        self.deliver(&name, &entry, &message);
    }

    fn buffer(&self, name: String, message: IndiMessage) {
        let mut pending = lock(&self.pending);
        let queue = pending.entry(name).or_default();
        if queue.len() >= self.max_pending {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    device = ?dropped.device(),
                    limit = self.max_pending,
                    "Too many frames before DRIVER_INFO, dropping the oldest"
                );
            }
        }
        queue.push_back(message);
    }

    fn add_type(&self, name: &str, device_type: DeviceType) -> bool {
        match self.devices.get_mut(name) {
            Some(mut entry) if !entry.types.contains(&device_type) => {
                entry.types.push(device_type);
                true
            }
            _ => false,
        }
    }

    fn remove_type(&self, name: &str, device_type: DeviceType) -> bool {
        match self.devices.get_mut(name) {
            Some(mut entry) => {
                let before = entry.types.len();
                entry.types.retain(|t| *t != device_type);
                entry.types.len() != before
            }
            None => false,
        }
    }

    fn detach(&self, name: &str) {
        lock(&self.pending).remove(name);

        if let Some((_, entry)) = self.devices.remove(name) {
            for device_type in entry.types.iter().rev() {
                info!(device = %name, %device_type, "Device detached");
                self.handlers.emit(&DeviceEvent::Detached {
                    device: entry.device.clone(),
                    device_type: *device_type,
                });
            }
        }
    }

    async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.connection.close().await;
        let writer = lock(&self.writer).take();
        if let Some(writer) = writer {
            writer.abort();
        }

        let names: Vec<String> = self.devices.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            self.detach(&name);
        }
        lock(&self.pending).clear();

        info!(client = %self.id, peer = %self.connection.peer(), "INDI connection closed");
        self.handlers.connection_closed(self.id);
    }
}

fn is_driver_info(message: &IndiMessage) -> bool {
    matches!(
        message,
        IndiMessage::Vector(Vector { op: VectorOp::Def | VectorOp::Set, name, .. })
            if name == "DRIVER_INFO"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::device::{ConnectionChange, FilterWheelChange, PropertyChange};
    use crate::protocol::{Elements, Message, NumberElement, PropertyState, TextElement};
    use crate::transport::{PipedConnection, PipedDriver};

    fn driver_info(device: &str, exec: &str) -> Vector {
        Vector::new(
            VectorOp::Def,
            device,
            "DRIVER_INFO",
            Elements::Text(vec![
                TextElement::new("DRIVER_NAME", device),
                TextElement::new("DRIVER_EXEC", exec),
                TextElement::new("DRIVER_VERSION", "1.0"),
                TextElement::new("DRIVER_INTERFACE", "0"),
            ]),
        )
    }

    fn recording_client(
        config: &IndiConfig,
    ) -> (IndiClient, PipedDriver, Arc<Mutex<Vec<DeviceEvent>>>) {
        let (connection, driver) = PipedConnection::pair("sim");
        let client = IndiClient::with_connection(Arc::new(connection), config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = events.clone();
        client.register_handler(Arc::new(move |event: &DeviceEvent| {
            lock(&recorder).push(event.clone());
        }));
        client.start();

        (client, driver, events)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_start_sends_get_properties() {
        let (_client, mut driver, _events) = recording_client(&IndiConfig::default());
        match driver.recv().await {
            Some(IndiMessage::GetProperties(get)) => assert_eq!(get.version, "1.7"),
            other => panic!("unexpected first command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_before_driver_info_are_replayed() {
        let (client, driver, events) = recording_client(&IndiConfig::default());

        let slot = Vector::new(
            VectorOp::Def,
            "Wheel",
            "FILTER_SLOT",
            Elements::Number(vec![
                NumberElement::new("FILTER_SLOT_VALUE", 1.0).with_range(1.0, 8.0, 1.0)
            ]),
        );
        driver.send(slot);
        settle().await;
        assert!(client.device("Wheel").is_none());

        driver.send(driver_info("Wheel", "indi_simulator_wheel"));
        settle().await;

        let wheel = client.device("Wheel").unwrap();
        assert_eq!(wheel.device_type(), DeviceType::FilterWheel);
        assert_eq!(wheel.as_filter_wheel().unwrap().slot_count(), 8);
        assert_eq!(wheel.driver().exec, "indi_simulator_wheel");
        assert_eq!(client.devices_of(DeviceType::FilterWheel).len(), 1);

        let events = lock(&events);
        assert!(matches!(
            events.first(),
            Some(DeviceEvent::Attached { device_type: DeviceType::FilterWheel, .. })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            DeviceEvent::PropertyChanged {
                change: PropertyChange::FilterWheel(FilterWheelChange::SlotCountChanged(8)),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_pending_buffer_drops_oldest() {
        let config = IndiConfig {
            max_pending_messages: 2,
            ..Default::default()
        };
        let (client, driver, events) = recording_client(&config);

        for i in 0..3 {
            driver.send(IndiMessage::Message(Message {
                device: Some("CCD".to_string()),
                timestamp: None,
                text: format!("early {}", i),
            }));
        }
        driver.send(driver_info("CCD", "indi_simulator_ccd"));
        settle().await;

        let camera = client.device("CCD").unwrap();
        assert_eq!(camera.messages(), vec!["early 2", "early 1"]);
        let texts: Vec<String> = lock(&events)
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::MessageReceived { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["early 1", "early 2"]);
    }

    #[tokio::test]
    async fn test_server_message_and_connection_events() {
        let (client, driver, events) = recording_client(&IndiConfig::default());

        driver.send(IndiMessage::Message(Message {
            device: None,
            timestamp: None,
            text: "server ready".to_string(),
        }));
        driver.send(driver_info("Focuser", "indi_simulator_focus"));
        driver.send(
            Vector::new(
                VectorOp::Set,
                "Focuser",
                "CONNECTION",
                Elements::Switch(vec![
                    crate::protocol::SwitchElement::new("CONNECT", true),
                    crate::protocol::SwitchElement::new("DISCONNECT", false),
                ]),
            )
            .with_state(PropertyState::Ok),
        );
        settle().await;

        assert!(client.device("Focuser").unwrap().is_connected());
        let events = lock(&events);
        assert!(matches!(
            events.first(),
            Some(DeviceEvent::MessageReceived { device: None, text }) if text == "server ready"
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            DeviceEvent::ConnectionChanged {
                change: ConnectionChange::Connected,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_device_removal_and_teardown() {
        let (client, driver, events) = recording_client(&IndiConfig::default());

        driver.send(driver_info("CCD", "indi_simulator_ccd"));
        driver.send(driver_info("Telescope", "indi_simulator_telescope"));
        driver.send(IndiMessage::DelProperty(crate::protocol::DelProperty {
            device: "CCD".to_string(),
            name: None,
            timestamp: None,
            message: None,
        }));
        settle().await;

        assert!(client.device("CCD").is_none());
        assert_eq!(client.devices().len(), 1);

        client.close().await;
        client.close().await;
        assert!(!client.is_open());
        assert!(client.devices().is_empty());

        let detached: Vec<String> = lock(&events)
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Detached { device, .. } => Some(device.name().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(detached, vec!["CCD", "Telescope"]);
        drop(driver);
    }

    #[tokio::test]
    async fn test_driver_exit_fires_connection_closed() {
        struct Closed(Mutex<Vec<Uuid>>);

        impl DeviceEventHandler for Closed {
            fn on_event_received(&self, _event: &DeviceEvent) {}

            fn on_connection_closed(&self, client: Uuid) {
                lock(&self.0).push(client);
            }
        }

        let (connection, driver) = PipedConnection::pair("sim");
        let client = IndiClient::with_connection(Arc::new(connection), &IndiConfig::default());
        let closed = Arc::new(Closed(Mutex::new(Vec::new())));
        client.register_handler(closed.clone());
        client.start();

        drop(driver);
        settle().await;

        assert_eq!(*lock(&closed.0), vec![client.id()]);
        assert!(!client.is_open());
    }
}
