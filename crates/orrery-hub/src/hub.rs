/*!
 * Throttled event fan-out.
 *
 * The hub receives every event of the clients it is registered with and
 * republishes them on a broadcast channel. Structural events (attach,
 * detach, connection, messages) pass through at once. Property updates are
 * kept in a single-slot box per device, overwritten by newer updates, and
 * drained by one shared scheduler task once per throttle period.
 *
 * Property updates of a device are only forwarded while someone listens to
 * it. A listen lapses after the idle window unless refreshed with another
 * [`EventHub::listen`] call.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use orrery_core::config::{HubConfig, SharedConfig};
use orrery_core::logging::component_span;
use orrery_core::utils::lock;
use orrery_devices::{DeviceEvent, DeviceEventHandler, DeviceRef};

use crate::error::{Error, Result};

/// Latest pending property update of one device
#[derive(Debug)]
struct Slot {
    device: DeviceRef,
    latest: Option<DeviceEvent>,
}

#[derive(Debug, Clone, Copy)]
struct Listen {
    refreshed: Instant,
    lapsed: bool,
}

struct HubInner {
    slots: DashMap<String, Slot>,
    listens: DashMap<String, Listen>,
    tx: broadcast::Sender<DeviceEvent>,
    period: Duration,
    idle: Duration,
    token: CancellationToken,
    closed: AtomicBool,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Throttling event hub
///
/// Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("devices", &self.inner.slots.len())
            .field("listened", &self.inner.listens.len())
            .field("period", &self.inner.period)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EventHub {
    /// Create a hub; call [`start`](Self::start) to begin forwarding property updates
    pub fn new(config: &HubConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            inner: Arc::new(HubInner {
                slots: DashMap::new(),
                listens: DashMap::new(),
                tx,
                period: config.throttle_period(),
                idle: config.listen_idle(),
                token: CancellationToken::new(),
                closed: AtomicBool::new(false),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Create a hub from the `hub` section of a loaded configuration
    pub fn from_config(config: &SharedConfig) -> Self {
        Self::new(&config.get().hub)
    }

    /// Spawn the scheduler task. Calling it again has no effect.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("cannot start a closed hub"));
        }

        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.is_some() {
            return Ok(());
        }

        let inner = self.inner.clone();
        let span = component_span("hub-scheduler", None);
        *scheduler = Some(tokio::spawn(async move { inner.run().await }.instrument(span)));
        info!(period_ms = %self.inner.period.as_millis(), "Event hub started");
        Ok(())
    }

    /// Handler to register with an INDI or Alpaca client
    pub fn handler(&self) -> Arc<dyn DeviceEventHandler> {
        self.inner.clone()
    }

    /// Receive forwarded events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.tx.subscribe()
    }

    /// Start or refresh listening to the property updates of `name`
    ///
    /// May be called before the device is attached.
    pub fn listen(&self, name: &str) {
        let now = Instant::now();
        let previous = self.inner.listens.insert(
            name.to_string(),
            Listen {
                refreshed: now,
                lapsed: false,
            },
        );

        match previous {
            None => debug!(device = %name, "Listening to device"),
            Some(listen) if listen.lapsed || !self.inner.within_idle(&listen, now) => {
                info!(device = %name, "Resumed forwarding device updates");
            }
            Some(_) => {}
        }
    }

    /// Stop listening to `name` and discard its pending update
    pub fn unlisten(&self, name: &str) {
        if self.inner.listens.remove(name).is_some() {
            debug!(device = %name, "Stopped listening to device");
        }
        if let Some(mut slot) = self.inner.slots.get_mut(name) {
            slot.latest = None;
        }
    }

    /// Whether property updates of `name` are currently forwarded
    pub fn is_listening(&self, name: &str) -> bool {
        self.inner.is_listening(name, Instant::now())
    }

    /// Names of the devices known to the hub
    pub fn devices(&self) -> Vec<String> {
        self.inner.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop the scheduler and forget every device. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.token.cancel();
        let scheduler = lock(&self.inner.scheduler).take();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                warn!("Event hub scheduler ended abnormally: {}", e);
            }
        }

        self.inner.slots.clear();
        self.inner.listens.clear();
        info!("Event hub closed");
    }
}

impl HubInner {
    fn within_idle(&self, listen: &Listen, now: Instant) -> bool {
        now.saturating_duration_since(listen.refreshed) < self.idle
    }

    fn is_listening(&self, name: &str, now: Instant) -> bool {
        self.listens
            .get(name)
            .is_some_and(|listen| self.within_idle(&listen, now))
    }

    /// Mark a listen whose idle window elapsed, logging the first time
    fn lapse(&self, name: &str, now: Instant) {
        if let Some(mut listen) = self.listens.get_mut(name) {
            if !listen.lapsed && !self.within_idle(&listen, now) {
                listen.lapsed = true;
                info!(
                    device = %name,
                    idle_ms = %self.idle.as_millis(),
                    "Listen idle, stopped forwarding device updates"
                );
            }
        }
    }

    fn forward(&self, event: DeviceEvent) {
        // No receiver is not an error; the event is simply dropped
        let _ = self.tx.send(event);
    }

    fn attach(&self, device: &DeviceRef) {
        self.slots.entry(device.name().to_string()).or_insert_with(|| {
            debug!(device = %device.name(), "Device registered with hub");
            Slot {
                device: device.clone(),
                latest: None,
            }
        });
    }

    fn detach(&self, device: &DeviceRef) {
        let name = device.name();
        let owned = self
            .slots
            .get(name)
            .is_some_and(|slot| Arc::ptr_eq(&slot.device, device));
        if owned {
            self.slots.remove(name);
            debug!(device = %name, "Device removed from hub");
        }
    }

    fn offer(&self, event: &DeviceEvent) {
        let Some(name) = event.device_name() else {
            return;
        };

        let now = Instant::now();
        if !self.is_listening(name, now) {
            self.lapse(name, now);
            return;
        }

        match self.slots.get_mut(name) {
            Some(mut slot) => slot.latest = Some(event.clone()),
            None => {
                debug!(device = %name, "Dropping update of a device the hub has not seen attach")
            }
        }
    }

    /// Forward the pending update of every listened-to device
    fn drain(&self) {
        let now = Instant::now();
        let mut pending = Vec::new();

        for mut slot in self.slots.iter_mut() {
            let Some(event) = slot.latest.take() else {
                continue;
            };
            if self.is_listening(slot.key(), now) {
                pending.push(event);
            } else {
                self.lapse(slot.key(), now);
            }
        }

        for event in pending {
            self.forward(event);
        }
    }

    async fn run(&self) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => self.drain(),
            }
        }
        debug!("Event hub scheduler stopped");
    }
}

impl DeviceEventHandler for HubInner {
    fn on_event_received(&self, event: &DeviceEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match event {
            DeviceEvent::PropertyChanged { .. } => self.offer(event),
            DeviceEvent::Attached { device, .. } => {
                self.attach(device);
                self.forward(event.clone());
            }
            DeviceEvent::Detached { device, device_type } => {
                if *device_type == device.device_type() {
                    self.detach(device);
                }
                self.forward(event.clone());
            }
            DeviceEvent::ConnectionChanged { .. } | DeviceEvent::MessageReceived { .. } => {
                self.forward(event.clone());
            }
        }
    }

    fn on_connection_closed(&self, client: Uuid) {
        info!(%client, "Client connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::config::ConfigBuilder;
    use orrery_devices::device::{FocuserChange, PropertyChange};
    use orrery_devices::protocol::Vector;
    use orrery_devices::{Device, DeviceType, DriverInfo};
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Debug)]
    struct Stub {
        name: &'static str,
        id: Uuid,
    }

    impl Device for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn id(&self) -> Uuid {
            self.id
        }

        fn device_type(&self) -> DeviceType {
            DeviceType::Focuser
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn driver(&self) -> DriverInfo {
            DriverInfo::default()
        }

        fn properties(&self) -> Vec<Vector> {
            Vec::new()
        }

        fn property(&self, _name: &str) -> Option<Vector> {
            None
        }

        fn messages(&self) -> Vec<String> {
            Vec::new()
        }

        fn connect(&self) {}

        fn disconnect(&self) {}
    }

    fn stub(name: &'static str) -> DeviceRef {
        Arc::new(Stub { name, id: Uuid::new_v4() })
    }

    fn moved(device: &DeviceRef, position: i32) -> DeviceEvent {
        DeviceEvent::PropertyChanged {
            device: device.clone(),
            change: PropertyChange::Focuser(FocuserChange::PositionChanged(position)),
        }
    }

    fn attached(device: &DeviceRef) -> DeviceEvent {
        DeviceEvent::Attached {
            device: device.clone(),
            device_type: DeviceType::Focuser,
        }
    }

    fn config() -> HubConfig {
        HubConfig {
            throttle_period_ms: 1000,
            listen_idle_ms: 60_000,
            ..Default::default()
        }
    }

    /// Let the scheduler run past its next tick
    async fn next_period() {
        time::sleep(Duration::from_millis(1010)).await;
    }

    fn position(event: &DeviceEvent) -> Option<i32> {
        match event {
            DeviceEvent::PropertyChanged {
                change: PropertyChange::Focuser(FocuserChange::PositionChanged(position)),
                ..
            } => Some(*position),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced() {
        let hub = EventHub::new(&config());
        hub.start().unwrap();
        let handler = hub.handler();
        let mut rx = hub.subscribe();
        let focuser = stub("Focuser");

        handler.on_event_received(&attached(&focuser));
        assert!(matches!(rx.try_recv(), Ok(DeviceEvent::Attached { .. })));

        hub.listen("Focuser");
        for step in 1..=5 {
            handler.on_event_received(&moved(&focuser, step * 100));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        next_period().await;
        assert_eq!(position(&rx.try_recv().unwrap()), Some(500));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        next_period().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        hub.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_configured_period() {
        std::env::set_var("ORRERYHUBTEST__HUB__THROTTLE_PERIOD_MS", "250");
        let config = ConfigBuilder::new()
            .with_environment_prefix("ORRERYHUBTEST")
            .build()
            .unwrap();
        let hub = EventHub::from_config(&SharedConfig::from(config));
        hub.start().unwrap();
        let handler = hub.handler();
        let focuser = stub("Focuser");
        handler.on_event_received(&attached(&focuser));

        let mut rx = hub.subscribe();
        hub.listen("Focuser");
        handler.on_event_received(&moved(&focuser, 42));

        time::sleep(Duration::from_millis(260)).await;
        assert_eq!(position(&rx.try_recv().unwrap()), Some(42));
        hub.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_are_throttled_independently() {
        let hub = EventHub::new(&config());
        hub.start().unwrap();
        let handler = hub.handler();
        let first = stub("First");
        let second = stub("Second");
        handler.on_event_received(&attached(&first));
        handler.on_event_received(&attached(&second));

        let mut rx = hub.subscribe();
        hub.listen("First");
        hub.listen("Second");
        handler.on_event_received(&moved(&first, 1));
        handler.on_event_received(&moved(&second, 2));
        handler.on_event_received(&moved(&first, 3));

        next_period().await;
        let mut positions: Vec<i32> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| position(&event))
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![2, 3]);
        hub.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlistened_device_is_not_forwarded() {
        let hub = EventHub::new(&config());
        hub.start().unwrap();
        let handler = hub.handler();
        let focuser = stub("Focuser");
        handler.on_event_received(&attached(&focuser));

        let mut rx = hub.subscribe();
        handler.on_event_received(&moved(&focuser, 10));
        next_period().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        hub.listen("Focuser");
        handler.on_event_received(&moved(&focuser, 20));
        hub.unlisten("Focuser");
        next_period().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        hub.close().await;
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_listen_lapses_after_idle_window() {
        let hub = EventHub::new(&HubConfig {
            throttle_period_ms: 1000,
            listen_idle_ms: 5000,
            ..Default::default()
        });
        hub.start().unwrap();
        let handler = hub.handler();
        let focuser = stub("Focuser");
        handler.on_event_received(&attached(&focuser));
        let mut rx = hub.subscribe();

        hub.listen("Focuser");
        time::sleep(Duration::from_millis(5500)).await;
        assert!(!hub.is_listening("Focuser"));

        handler.on_event_received(&moved(&focuser, 10));
        next_period().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        hub.listen("Focuser");
        assert!(hub.is_listening("Focuser"));
        handler.on_event_received(&moved(&focuser, 20));
        next_period().await;
        assert_eq!(position(&rx.try_recv().unwrap()), Some(20));
        hub.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_and_close() {
        let hub = EventHub::new(&config());
        hub.start().unwrap();
        hub.start().unwrap();
        let handler = hub.handler();
        let focuser = stub("Focuser");

        handler.on_event_received(&attached(&focuser));
        assert_eq!(hub.devices(), vec!["Focuser"]);

        let mut rx = hub.subscribe();
        hub.listen("Focuser");
        handler.on_event_received(&moved(&focuser, 10));
        handler.on_event_received(&DeviceEvent::Detached {
            device: focuser.clone(),
            device_type: DeviceType::Thermometer,
        });
        assert_eq!(hub.devices().len(), 1);
        handler.on_event_received(&DeviceEvent::Detached {
            device: focuser.clone(),
            device_type: DeviceType::Focuser,
        });
        assert!(hub.devices().is_empty());

        assert!(matches!(rx.try_recv(), Ok(DeviceEvent::Detached { .. })));
        assert!(matches!(rx.try_recv(), Ok(DeviceEvent::Detached { .. })));
        next_period().await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        hub.close().await;
        hub.close().await;
        assert!(hub.is_closed());
        assert!(hub.start().is_err());

        handler.on_event_received(&attached(&focuser));
        assert!(hub.devices().is_empty());
    }
}
