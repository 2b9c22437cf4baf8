/*!
 * Alpaca client: one server, its configured devices and their refreshers.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use orrery_core::config::AlpacaConfig;

use crate::alpaca::device::{spawn_refresher, AscomDevice, ClientShared};
use crate::alpaca::service::{AlpacaService, ConfiguredDevice};
use crate::alpaca::{AlpacaCamera, AlpacaFilterWheel, AlpacaFocuser, AlpacaMount};
use crate::device::{Device, DeviceEvent, DeviceEventHandler, DeviceRef, DeviceType};
use crate::error::Result;

#[derive(Clone)]
struct AlpacaEntry {
    device: DeviceRef,
    ascom: Arc<dyn AscomDevice>,
}

/// Client of one Alpaca server
pub struct AlpacaClient {
    shared: Arc<ClientShared>,
    devices: DashMap<String, AlpacaEntry>,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for AlpacaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaClient")
            .field("id", &self.shared.id)
            .field("server", &self.shared.service.base_url())
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Alpaca device type to device type, for the kinds bridged here
fn device_type(alpaca_type: &str) -> Option<DeviceType> {
    match alpaca_type.to_ascii_lowercase().as_str() {
        "camera" => Some(DeviceType::Camera),
        "telescope" => Some(DeviceType::Mount),
        "focuser" => Some(DeviceType::Focuser),
        "filterwheel" => Some(DeviceType::FilterWheel),
        _ => None,
    }
}

fn share<T: AscomDevice + Device + 'static>(device: Arc<T>) -> (DeviceRef, Arc<dyn AscomDevice>) {
    (device.clone(), device)
}

impl AlpacaClient {
    /// Client for the server at `host:port`
    pub fn new(host: &str, port: u16, config: &AlpacaConfig) -> Result<Self> {
        let service = AlpacaService::new(host, port, config)?;

        Ok(Self {
            shared: Arc::new(ClientShared::new(service)),
            devices: DashMap::new(),
            poll_interval: config.poll_interval(),
            closed: AtomicBool::new(false),
        })
    }

    /// Client id, passed to [`DeviceEventHandler::on_connection_closed`]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Server root URL
    pub fn base_url(&self) -> &str {
        self.shared.service.base_url()
    }

    /// Add an event handler
    pub fn register_handler(&self, handler: Arc<dyn DeviceEventHandler>) {
        self.shared.handlers.register(handler);
    }

    /// Remove an event handler
    pub fn unregister_handler(&self, handler: &Arc<dyn DeviceEventHandler>) {
        self.shared.handlers.unregister(handler);
    }

    /// List configured devices and attach the new ones
    ///
    /// Returns how many devices were attached.
    pub async fn discovery(&self) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let configured = match self.shared.service.configured_devices().await {
            Ok(configured) => configured,
            Err(e) => {
                if e.is_transport() {
                    self.shared.connection_lost();
                }
                return Err(e);
            }
        };

        let mut attached = 0;
        for info in configured {
            if self.devices.contains_key(&info.unique_id) {
                continue;
            }
            let Some(device_type) = device_type(&info.device_type) else {
                info!(
                    device = %info.name,
                    kind = %info.device_type,
                    "Skipping unsupported Alpaca device"
                );
                continue;
            };

            self.attach(info, device_type);
            attached += 1;
        }
        Ok(attached)
    }

    fn attach(&self, info: ConfiguredDevice, device_type: DeviceType) {
        let key = info.unique_id.clone();
        let name = info.name.clone();
        let shared = self.shared.clone();

        let (device, ascom) = match device_type {
            DeviceType::Camera => share(AlpacaCamera::new(info, shared)),
            DeviceType::Mount => share(AlpacaMount::new(info, shared)),
            DeviceType::FilterWheel => share(AlpacaFilterWheel::new(info, shared)),
            DeviceType::Focuser => share(AlpacaFocuser::new(info, shared)),
            _ => return,
        };

        self.devices.insert(
            key,
            AlpacaEntry {
                device: device.clone(),
                ascom: ascom.clone(),
            },
        );

        info!(device = %name, %device_type, server = %self.base_url(), "Device attached");
        self.shared
            .handlers
            .emit(&DeviceEvent::Attached { device, device_type });

        spawn_refresher(ascom, self.poll_interval);
    }

    /// Every attached device
    pub fn devices(&self) -> Vec<DeviceRef> {
        self.devices.iter().map(|entry| entry.device.clone()).collect()
    }

    /// Device by name
    pub fn device(&self, name: &str) -> Option<DeviceRef> {
        self.devices
            .iter()
            .find(|entry| entry.device.name() == name)
            .map(|entry| entry.device.clone())
    }

    /// Devices registered under `device_type`
    pub fn devices_of(&self, device_type: DeviceType) -> Vec<DeviceRef> {
        self.devices
            .iter()
            .filter(|entry| entry.ascom.core().has_type(device_type))
            .map(|entry| entry.device.clone())
            .collect()
    }

    /// Whether a request failed at the transport level
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop every refresher and detach every device
    ///
    /// Idempotent. Must not be awaited from inside an event handler.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<AlpacaEntry> =
            self.devices.iter().map(|entry| entry.value().clone()).collect();
        self.devices.clear();

        for entry in entries {
            let core = entry.ascom.core();
            core.close().await;

            for device_type in core.types().into_iter().rev() {
                info!(device = %core.name(), %device_type, "Device detached");
                self.shared.handlers.emit(&DeviceEvent::Detached {
                    device: entry.device.clone(),
                    device_type,
                });
            }
        }

        info!(client = %self.shared.id, server = %self.base_url(), "Alpaca client closed");
    }
}

impl Drop for AlpacaClient {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) || self.devices.is_empty() {
            return;
        }
        warn!(server = %self.base_url(), "Alpaca client dropped without close");
        for entry in self.devices.iter() {
            entry.ascom.core().cancel();
        }
    }
}
