/*!
 * Shared state of Alpaca devices and their refresher task.
 *
 * Each device polls its server on a fixed period. The period is measured
 * from the start of one cycle to the start of the next, so slow requests
 * do not make the schedule drift.
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use orrery_core::logging::device_span;
use orrery_core::utils::{lock, read_lock, write_lock};

use crate::alpaca::service::{AlpacaService, ConfiguredDevice};
use crate::device::{
    ConnectionChange, Device, DeviceChange, DeviceType, DriverInfo, EventHandlers,
};
use crate::error::DeviceError;

const MESSAGE_CAPACITY: usize = 100;

/// State shared by an [`AlpacaClient`](super::AlpacaClient) and its devices
#[derive(Debug)]
pub(crate) struct ClientShared {
    pub(crate) id: Uuid,
    pub(crate) service: AlpacaService,
    pub(crate) handlers: EventHandlers,
    lost: AtomicBool,
    token: CancellationToken,
}

impl ClientShared {
    pub(crate) fn new(service: AlpacaService) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            handlers: EventHandlers::new(),
            lost: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Report a dead server once and stop every refresher of the client
    pub(crate) fn connection_lost(&self) {
        if !self.lost.swap(true, Ordering::SeqCst) {
            warn!(
                client = %self.id,
                server = %self.service.base_url(),
                "Alpaca server unreachable"
            );
            self.token.cancel();
            self.handlers.connection_closed(self.id);
        }
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// Common part of every Alpaca device
pub struct AscomCore {
    info: ConfiguredDevice,
    id: Uuid,
    device_type: DeviceType,
    endpoint: &'static str,
    shared: Arc<ClientShared>,
    this: Weak<dyn Device>,
    runtime: Handle,
    connected: AtomicBool,
    driver: RwLock<DriverInfo>,
    types: RwLock<Vec<DeviceType>>,
    messages: Mutex<VecDeque<String>>,
    token: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AscomCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AscomCore")
            .field("name", &self.info.name)
            .field("endpoint", &self.endpoint)
            .field("number", &self.info.number)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl AscomCore {
    /// Must be called from within a Tokio runtime
    pub(crate) fn new(
        info: ConfiguredDevice,
        device_type: DeviceType,
        endpoint: &'static str,
        shared: Arc<ClientShared>,
        this: Weak<dyn Device>,
    ) -> Arc<Self> {
        let id = Uuid::parse_str(&info.unique_id).unwrap_or_else(|_| Uuid::new_v4());
        let token = shared.token.child_token();
        let driver = DriverInfo {
            name: info.name.clone(),
            exec: String::new(),
            version: String::new(),
            interface: 0,
        };

        Arc::new(Self {
            info,
            id,
            device_type,
            endpoint,
            shared,
            this,
            runtime: Handle::current(),
            connected: AtomicBool::new(false),
            driver: RwLock::new(driver),
            types: RwLock::new(vec![device_type]),
            messages: Mutex::new(VecDeque::new()),
            token,
            refresher: Mutex::new(None),
        })
    }

    /// Configured device name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Unique id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Primary type
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Management entry
    pub fn info(&self) -> &ConfiguredDevice {
        &self.info
    }

    /// Last polled connection flag
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Driver details reported on connect
    pub fn driver(&self) -> DriverInfo {
        read_lock(&self.driver).clone()
    }

    /// Every type the device is registered under
    pub fn types(&self) -> Vec<DeviceType> {
        read_lock(&self.types).clone()
    }

    /// Message log, newest first
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).iter().cloned().collect()
    }

    fn path(&self, property: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.info.number, property)
    }

    /// Send a change to every handler
    pub(crate) fn emit(&self, change: DeviceChange) {
        if let Some(device) = self.this.upgrade() {
            self.shared.handlers.emit(&change.into_event(device));
        }
    }

    /// Register under an additional type
    pub(crate) fn attach(&self, device_type: DeviceType) {
        {
            let mut types = write_lock(&self.types);
            if types.contains(&device_type) {
                return;
            }
            types.push(device_type);
        }
        info!(device = %self.info.name, %device_type, "Device attached");
        self.emit(DeviceChange::Attach(device_type));
    }

    /// Whether the device is registered under `device_type`
    pub(crate) fn has_type(&self, device_type: DeviceType) -> bool {
        read_lock(&self.types).contains(&device_type)
    }

    fn add_message(&self, text: String) {
        {
            let mut messages = lock(&self.messages);
            messages.push_front(text.clone());
            messages.truncate(MESSAGE_CAPACITY);
        }
        self.emit(DeviceChange::Message(text));
    }

    fn report(&self, property: &str, error: DeviceError) {
        match error {
            DeviceError::Remote { code, message } => {
                debug!(
                    device = %self.info.name,
                    property,
                    code,
                    "Alpaca request refused: {}",
                    message
                );
                if !message.is_empty() {
                    let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S");
                    self.add_message(format!("[{}]: {}", stamp, message));
                }
            }
            error if error.is_transport() => {
                error!(device = %self.info.name, property, "Alpaca request failed: {}", error);
                self.shared.connection_lost();
            }
            error => warn!(
                device = %self.info.name,
                property,
                "Unexpected Alpaca response: {}",
                error
            ),
        }
    }

    /// Read a property; failures are reported and yield `None`
    pub(crate) async fn request<T: DeserializeOwned>(&self, property: &str) -> Option<T> {
        match self.shared.service.get(&self.path(property)).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(property, e);
                None
            }
        }
    }

    /// Read a property with extra query parameters
    pub(crate) async fn request_with<T: DeserializeOwned>(
        &self,
        property: &str,
        query: &[(&str, String)],
    ) -> Option<T> {
        match self.shared.service.get_with(&self.path(property), query).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(property, e);
                None
            }
        }
    }

    /// Download image data
    pub(crate) async fn request_image(&self, property: &str) -> Option<(&'static str, Bytes)> {
        match self.shared.service.get_image(&self.path(property)).await {
            Ok(image) => Some(image),
            Err(e) => {
                self.report(property, e);
                None
            }
        }
    }

    /// Write a property and wait for the answer
    pub(crate) async fn execute(&self, property: &str, params: &[(&str, String)]) -> bool {
        match self.shared.service.put(&self.path(property), params).await {
            Ok(()) => true,
            Err(e) => {
                self.report(property, e);
                false
            }
        }
    }

    /// Fire-and-forget PUT
    pub(crate) fn command(
        self: &Arc<Self>,
        property: &'static str,
        params: Vec<(&'static str, String)>,
    ) {
        let core = self.clone();
        self.runtime.spawn(async move {
            core.execute(property, &params).await;
        });
    }

    /// Fire-and-forget PUTs executed in order, stopping at the first failure
    pub(crate) fn command_sequence(
        self: &Arc<Self>,
        commands: Vec<(&'static str, Vec<(&'static str, String)>)>,
    ) {
        let core = self.clone();
        self.runtime.spawn(async move {
            for (property, params) in commands {
                if !core.execute(property, &params).await {
                    break;
                }
            }
        });
    }

    /// Ask the server to connect or disconnect the device
    pub(crate) fn set_connected(self: &Arc<Self>, connected: bool) {
        self.command("connected", vec![("Connected", connected.to_string())]);
    }

    async fn load_driver(&self) {
        let info = self.request::<String>("driverinfo").await;
        let version = self.request::<String>("driverversion").await;
        let interface = self.request::<u32>("interfaceversion").await;

        let mut driver = write_lock(&self.driver);
        if let Some(info) = info {
            driver.exec = info;
        }
        if let Some(version) = version {
            driver.version = version;
        }
        if let Some(interface) = interface {
            driver.interface = interface;
        }
    }

    /// Stop the refresher without waiting for it
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the refresher and wait for it
    ///
    /// Must not be awaited from inside an event handler, which runs on the
    /// refresher task this waits for.
    pub(crate) async fn close(&self) {
        self.token.cancel();
        let refresher = lock(&self.refresher).take();
        if let Some(handle) = refresher {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(device = %self.info.name, "Alpaca refresher failed: {}", e);
                }
            }
        }
    }
}

/// Polling behavior of a typed Alpaca device
#[async_trait]
pub(crate) trait AscomDevice: Send + Sync {
    fn core(&self) -> &Arc<AscomCore>;

    /// Capability probing after the device reported connected
    async fn on_connected(&self);

    /// Cleanup after the device reported disconnected
    async fn on_disconnected(&self) {}

    /// Poll watched properties while connected
    async fn refresh(&self);
}

async fn poll_connected(device: &dyn AscomDevice) {
    let core = device.core();
    let Some(connected) = core.request::<bool>("connected").await else {
        return;
    };

    if core.connected.swap(connected, Ordering::SeqCst) == connected {
        return;
    }

    if connected {
        info!(device = %core.name(), "Device connected");
        core.load_driver().await;
        core.emit(DeviceChange::Connection(ConnectionChange::Connected));
        device.on_connected().await;
    } else {
        info!(device = %core.name(), "Device disconnected");
        core.emit(DeviceChange::Connection(ConnectionChange::Disconnected));
        device.on_disconnected().await;
    }
}

/// One polling cycle
pub(crate) async fn refresh_once(device: &dyn AscomDevice) {
    poll_connected(device).await;
    if device.core().is_connected() {
        device.refresh().await;
    }
}

/// Start the refresher of `device`; later calls do nothing
pub(crate) fn spawn_refresher(device: Arc<dyn AscomDevice>, period: Duration) {
    let core = device.core().clone();
    let mut slot = lock(&core.refresher);
    if slot.is_some() {
        return;
    }

    let token = core.token.clone();
    let span = device_span("refresher", core.name());
    let task = async move {
        debug!(?period, "Alpaca refresher started");
        loop {
            let started = Instant::now();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = refresh_once(device.as_ref()) => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep_until(started + period) => {}
            }
        }
        debug!("Alpaca refresher stopped");
    };
    *slot = Some(core.runtime.spawn(task.instrument(span)));
}

/// Store `value` in `slot` and tell whether it differed
pub(crate) fn update<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Implement [`Device`] for a typed Alpaca device holding `core: Arc<AscomCore>`
macro_rules! ascom_device {
    ($ty:ty $(, $accessor:ident => $capability:ident)* $(,)?) => {
        impl $crate::device::Device for $ty {
            fn name(&self) -> &str {
                self.core.name()
            }

            fn id(&self) -> ::uuid::Uuid {
                self.core.id()
            }

            fn device_type(&self) -> $crate::device::DeviceType {
                self.core.device_type()
            }

            fn is_connected(&self) -> bool {
                self.core.is_connected()
            }

            fn driver(&self) -> $crate::device::DriverInfo {
                self.core.driver()
            }

            fn properties(&self) -> Vec<$crate::protocol::Vector> {
                Vec::new()
            }

            fn property(&self, _name: &str) -> Option<$crate::protocol::Vector> {
                None
            }

            fn messages(&self) -> Vec<String> {
                self.core.messages()
            }

            fn connect(&self) {
                self.core.set_connected(true)
            }

            fn disconnect(&self) {
                self.core.set_connected(false)
            }

            $(
                fn $accessor(&self) -> Option<&dyn $capability> {
                    Some(self)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca::testing::{configured, shared};
    use crate::alpaca::AlpacaFocuser;
    use orrery_core::config::AlpacaConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Answers `connected` late and records when each request arrived
    struct SlowConnected {
        arrivals: Arc<Mutex<Vec<std::time::Instant>>>,
        delay: Duration,
    }

    impl Respond for SlowConnected {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            self.arrivals.lock().unwrap().push(std::time::Instant::now());
            ResponseTemplate::new(200)
                .set_body_json(json!({"Value": false, "ErrorNumber": 0, "ErrorMessage": ""}))
                .set_delay(self.delay)
        }
    }

    // Real time: a paused clock would fire the HTTP timeout while the socket is pending.
    #[tokio::test]
    async fn test_refresher_cycles_start_one_period_apart() {
        let server = MockServer::start().await;
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        Mock::given(method("GET"))
            .and(path("/api/v1/focuser/0/connected"))
            .respond_with(SlowConnected {
                arrivals: arrivals.clone(),
                delay: Duration::from_millis(80),
            })
            .mount(&server)
            .await;

        let device = AlpacaFocuser::new(configured("Focuser", "Timed"), shared(&server).await);
        spawn_refresher(device.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        device.core().close().await;

        let arrivals = arrivals.lock().unwrap().clone();
        assert!(arrivals.len() >= 5, "only {} cycles ran", arrivals.len());

        let gaps: Vec<Duration> = arrivals.windows(2).map(|pair| pair[1] - pair[0]).collect();
        for gap in &gaps {
            assert!(*gap >= Duration::from_millis(150), "cycle started early: {:?}", gap);
        }
        let mean = gaps.iter().sum::<Duration>() / gaps.len() as u32;
        assert!(mean < Duration::from_millis(250), "cycles drift by the request time: {:?}", mean);
    }

    #[tokio::test]
    async fn test_connection_loss_stops_every_refresher() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = AlpacaService::new("127.0.0.1", port, &AlpacaConfig::default()).unwrap();
        let client = Arc::new(ClientShared::new(service));
        let fast = AlpacaFocuser::new(configured("Focuser", "Fast"), client.clone());
        let slow = AlpacaFocuser::new(configured("Focuser", "Slow"), client.clone());
        spawn_refresher(fast.clone(), Duration::from_millis(20));
        spawn_refresher(slow.clone(), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.is_lost());
        for core in [fast.core(), slow.core()] {
            let finished = lock(&core.refresher).as_ref().map(JoinHandle::is_finished);
            assert_eq!(finished, Some(true), "{} still polling", core.name());
        }
    }
}
