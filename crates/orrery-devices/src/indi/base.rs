/*!
 * State and message handling shared by every INDI device.
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use dashmap::DashMap;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use orrery_core::utils::{lock, read_lock, write_lock};

use crate::device::{ConnectionChange, DeviceChange, DriverInfo, PropertyChange};
use crate::protocol::{BlobPolicy, EnableBlob, IndiMessage, PropertyState, Vector, VectorOp};
use crate::transport::CommandSender;

/// Handler for one vector name; pushes the typed deltas it detects
pub type Handler<T> = fn(&T, &Vector, &mut Vec<DeviceChange>);

/// Run the handler registered for `vector.name`, if any
pub fn dispatch<T>(
    device: &T,
    handlers: &[(&str, Handler<T>)],
    vector: &Vector,
    changes: &mut Vec<DeviceChange>,
) {
    if let Some((_, handler)) = handlers.iter().find(|(name, _)| *name == vector.name) {
        handler(device, vector, changes);
    }
}

/// Identity, property map and message log of an INDI device
#[derive(Debug)]
pub struct IndiDeviceCore {
    name: String,
    id: Uuid,
    commands: CommandSender,
    driver: RwLock<DriverInfo>,
    connected: AtomicBool,
    properties: DashMap<String, Vector>,
    messages: Mutex<VecDeque<String>>,
    message_capacity: usize,
}

impl IndiDeviceCore {
    /// Create the core of device `name`, queuing commands on `commands`
    pub fn new<S: Into<String>>(
        name: S,
        commands: CommandSender,
        driver: DriverInfo,
        message_capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            commands,
            driver: RwLock::new(driver),
            connected: AtomicBool::new(false),
            properties: DashMap::new(),
            messages: Mutex::new(VecDeque::with_capacity(message_capacity)),
            message_capacity,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether `CONNECTION` reports the device connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Driver information from `DRIVER_INFO`
    pub fn driver(&self) -> DriverInfo {
        read_lock(&self.driver).clone()
    }

    /// Every stored vector, sorted by name
    pub fn properties(&self) -> Vec<Vector> {
        let mut properties: Vec<Vector> =
            self.properties.iter().map(|entry| entry.value().clone()).collect();
        properties.sort_by(|a, b| a.name.cmp(&b.name));
        properties
    }

    /// One stored vector
    pub fn property(&self, name: &str) -> Option<Vector> {
        self.properties.get(name).map(|entry| entry.value().clone())
    }

    /// Whether a vector has been declared
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Message log, most recent first
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).iter().cloned().collect()
    }

    /// Queue a raw message
    pub fn send(&self, message: IndiMessage) {
        self.commands.send(message);
    }

    /// Queue a `newNumberVector`
    pub fn send_new_number(&self, vector: &str, values: &[(&str, f64)]) {
        trace!(device = %self.name, vector, "Sending number command");
        self.send(Vector::new_number(self.name.as_str(), vector, values).into());
    }

    /// Queue a `newSwitchVector`
    pub fn send_new_switch(&self, vector: &str, values: &[(&str, bool)]) {
        trace!(device = %self.name, vector, "Sending switch command");
        self.send(Vector::new_switch(self.name.as_str(), vector, values).into());
    }

    /// Queue a `newTextVector`
    pub fn send_new_text(&self, vector: &str, values: &[(&str, &str)]) {
        trace!(device = %self.name, vector, "Sending text command");
        self.send(Vector::new_text(self.name.as_str(), vector, values).into());
    }

    /// Ask the server for BLOBs of this device
    pub fn enable_blob(&self, policy: BlobPolicy) {
        self.send(IndiMessage::EnableBlob(EnableBlob {
            device: self.name.clone(),
            name: None,
            policy,
        }));
    }

    /// Ask the driver to connect
    pub fn connect(&self) {
        self.send_new_switch("CONNECTION", &[("CONNECT", true), ("DISCONNECT", false)]);
    }

    /// Ask the driver to disconnect
    pub fn disconnect(&self) {
        self.send_new_switch("CONNECTION", &[("CONNECT", false), ("DISCONNECT", true)]);
    }

    /// Apply a frame to the shared state
    ///
    /// Returns the stored vector after the frame was applied, ready for the
    /// typed handlers, or `None` when there is nothing to dispatch.
    pub fn handle_message(
        &self,
        message: &IndiMessage,
        changes: &mut Vec<DeviceChange>,
    ) -> Option<Vector> {
        match message {
            IndiMessage::Vector(vector) => self.handle_vector(vector, changes),
            IndiMessage::Message(message) => {
                info!(device = %self.name, "{}", message.text);
                self.push_message(&message.text);
                changes.push(DeviceChange::Message(message.text.clone()));
                None
            }
            IndiMessage::DelProperty(del) => {
                if let Some(name) = &del.name {
                    if self.properties.remove(name).is_some() {
                        debug!(device = %self.name, vector = %name, "Property deleted");
                        changes.push(DeviceChange::Property(PropertyChange::Deleted {
                            name: name.clone(),
                        }));
                    }
                }
                None
            }
            IndiMessage::GetProperties(_) | IndiMessage::EnableBlob(_) => None,
        }
    }

    fn handle_vector(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) -> Option<Vector> {
        let merged = match vector.op {
            VectorOp::Def => {
                self.properties.insert(vector.name.clone(), vector.clone());
                vector.clone()
            }
            VectorOp::Set => match self.properties.get_mut(&vector.name) {
                Some(mut stored) => {
                    if let Err(e) = stored.apply(vector) {
                        warn!(
                            device = %self.name,
                            vector = %vector.name,
                            "Skipping malformed update: {}",
                            e
                        );
                        return None;
                    }
                    stored.clone()
                }
                None => {
                    debug!(
                        device = %self.name,
                        vector = %vector.name,
                        "Update for undeclared vector"
                    );
                    self.properties.insert(vector.name.clone(), vector.clone());
                    vector.clone()
                }
            },
            VectorOp::New => {
                trace!(device = %self.name, vector = %vector.name, "Ignoring command frame");
                return None;
            }
        };

        if let Some(text) = &vector.message {
            debug!(device = %self.name, vector = %vector.name, "{}", text);
            self.push_message(text);
            changes.push(DeviceChange::Message(text.clone()));
        }

        changes.push(DeviceChange::Property(PropertyChange::Vector {
            name: merged.name.clone(),
            op: vector.op,
            state: merged.state,
        }));

        match merged.name.as_str() {
            "CONNECTION" => self.on_connection(&merged, changes),
            "DRIVER_INFO" => *write_lock(&self.driver) = DriverInfo::from_vector(&merged),
            _ => {}
        }

        Some(merged)
    }

    fn on_connection(&self, vector: &Vector, changes: &mut Vec<DeviceChange>) {
        let connected = vector.switch("CONNECT").unwrap_or(false);
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);

        if connected != was_connected {
            info!(device = %self.name, connected, "Connection changed");
            changes.push(DeviceChange::Connection(if connected {
                ConnectionChange::Connected
            } else {
                ConnectionChange::Disconnected
            }));
        } else if !connected && vector.state == PropertyState::Alert {
            warn!(device = %self.name, "Connection failed");
            changes.push(DeviceChange::Connection(ConnectionChange::Failed));
        }
    }

    fn push_message(&self, text: &str) {
        if self.message_capacity == 0 {
            return;
        }
        let mut messages = lock(&self.messages);
        messages.push_front(text.to_string());
        messages.truncate(self.message_capacity);
    }
}

/// Implement [`Device`](crate::device::Device) and
/// [`IndiDevice`](crate::indi::IndiDevice) for a typed INDI device holding
/// its [`IndiDeviceCore`] in a `core` field.
macro_rules! indi_device {
    (
        $ty:ty,
        $device_type:expr,
        $handlers:expr
        $(, $accessor:ident => $capability:ident)* $(,)?
    ) => {
        impl $crate::device::Device for $ty {
            fn name(&self) -> &str {
                self.core.name()
            }

            fn id(&self) -> ::uuid::Uuid {
                self.core.id()
            }

            fn device_type(&self) -> $crate::device::DeviceType {
                $device_type
            }

            fn is_connected(&self) -> bool {
                self.core.is_connected()
            }

            fn driver(&self) -> $crate::device::DriverInfo {
                self.core.driver()
            }

            fn properties(&self) -> Vec<$crate::protocol::Vector> {
                self.core.properties()
            }

            fn property(&self, name: &str) -> Option<$crate::protocol::Vector> {
                self.core.property(name)
            }

            fn messages(&self) -> Vec<String> {
                self.core.messages()
            }

            fn connect(&self) {
                self.core.connect()
            }

            fn disconnect(&self) {
                self.core.disconnect()
            }

            $(
                fn $accessor(&self) -> Option<&dyn $capability> {
                    Some(self)
                }
            )*
        }

        impl $crate::indi::IndiDevice for $ty {
            fn core(&self) -> &$crate::indi::IndiDeviceCore {
                &self.core
            }

            fn handle_message(
                &self,
                message: &$crate::protocol::IndiMessage,
            ) -> Vec<$crate::device::DeviceChange> {
                let mut changes = Vec::new();
                if let Some(vector) = self.core.handle_message(message, &mut changes) {
                    $crate::indi::base::dispatch(self, $handlers, &vector, &mut changes);
                }
                changes
            }
        }
    };
}
