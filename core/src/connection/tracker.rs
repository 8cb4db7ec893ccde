use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::ConnectionDelegate;
use crate::bluez;
use crate::bus::{BusConnection, ObjectPath, SignalEvent, SignalHandler, SignalRule, SubscriptionId};
use crate::GattError;

struct Subscriptions {
    bus: Arc<dyn BusConnection>,
    ids: Vec<SubscriptionId>,
}

/// Tracks connected centrals from BlueZ object-manager and property signals.
///
/// Connects come from `InterfacesAdded` carrying a `Device1` with
/// `Connected = true`; disconnects from `InterfacesRemoved` of `Device1`.
/// `PropertiesChanged` on `Device1` is forwarded as-is and never turned into
/// connect or disconnect events.
pub struct ConnectionTracker {
    /// Address → device object path
    devices: Mutex<HashMap<String, ObjectPath>>,
    delegate: RwLock<Option<Arc<dyn ConnectionDelegate>>>,
    subscriptions: tokio::sync::Mutex<Option<Subscriptions>>,
    /// Serializes signal handling
    dispatch: Mutex<()>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            delegate: RwLock::new(None),
            subscriptions: tokio::sync::Mutex::new(None),
            dispatch: Mutex::new(()),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn ConnectionDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    pub async fn is_initialized(&self) -> bool {
        self.subscriptions.lock().await.is_some()
    }

    /// Subscribe to the three signal classes. Calling it again while
    /// initialized does nothing.
    pub async fn initialize(self: &Arc<Self>, bus: Arc<dyn BusConnection>) -> Result<(), GattError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.is_some() {
            debug!("Connection tracker already initialized");
            return Ok(());
        }

        let rules = [
            SignalRule::InterfacesAdded,
            SignalRule::InterfacesRemoved,
            SignalRule::PropertiesChanged {
                interface: bluez::DEVICE_IFACE.to_string(),
            },
        ];

        let mut ids = Vec::with_capacity(rules.len());
        for rule in rules {
            match bus.subscribe(rule, self.handler()).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        if let Err(unsubscribe_err) = bus.unsubscribe(id).await {
                            warn!(
                                "Failed to drop signal subscription after setup error: {}",
                                unsubscribe_err
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        *subscriptions = Some(Subscriptions { bus, ids });
        info!("Connection tracker initialized");
        Ok(())
    }

    /// Drop the subscriptions and forget every tracked device.
    pub async fn shutdown(&self) {
        let Some(Subscriptions { bus, ids }) = self.subscriptions.lock().await.take() else {
            return;
        };
        for id in ids {
            if let Err(e) = bus.unsubscribe(id).await {
                warn!("Failed to drop signal subscription: {}", e);
            }
        }
        self.devices.lock().clear();
        info!("Connection tracker shut down");
    }

    fn handler(self: &Arc<Self>) -> SignalHandler {
        let tracker: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(tracker) = tracker.upgrade() {
                tracker.handle_signal(event);
            }
        })
    }

    pub fn connected_devices(&self) -> Vec<(String, ObjectPath)> {
        let mut devices: Vec<_> = self
            .devices
            .lock()
            .iter()
            .map(|(address, path)| (address.clone(), path.clone()))
            .collect();
        devices.sort();
        devices
    }

    pub fn is_device_connected(&self, address: &str) -> bool {
        self.devices.lock().contains_key(address)
    }

    pub fn connected_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Process one signal. Public so transports without subscriptions can
    /// feed events directly.
    pub fn handle_signal(&self, event: SignalEvent) {
        let _dispatch = self.dispatch.lock();
        let delegate = self.delegate.read().clone();

        match event {
            SignalEvent::InterfacesAdded { path, interfaces } => {
                let Some(device) = interfaces.get(bluez::DEVICE_IFACE) else {
                    return;
                };
                let connected = device
                    .get(bluez::PROP_CONNECTED)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !connected {
                    return;
                }
                let Some(address) = device.get(bluez::PROP_ADDRESS).and_then(|v| v.as_str()) else {
                    warn!("Connected device {} has no address", path);
                    return;
                };

                self.devices
                    .lock()
                    .insert(address.to_string(), path.clone());
                info!("Device connected: {} ({})", address, path);
                if let Some(delegate) = delegate {
                    delegate.on_connected(address, &path);
                }
            }
            SignalEvent::InterfacesRemoved { path, interfaces } => {
                if !interfaces.iter().any(|i| i == bluez::DEVICE_IFACE) {
                    return;
                }
                let removed = {
                    let mut devices = self.devices.lock();
                    let address = devices
                        .iter()
                        .find(|(_, known)| **known == path)
                        .map(|(address, _)| address.clone());
                    if let Some(address) = &address {
                        devices.remove(address);
                    }
                    address
                };
                if let Some(address) = removed {
                    info!("Device disconnected: {} ({})", address, path);
                    if let Some(delegate) = delegate {
                        delegate.on_disconnected(&address, &path);
                    }
                }
            }
            SignalEvent::PropertiesChanged {
                path,
                interface,
                changed,
                ..
            } => {
                if interface != bluez::DEVICE_IFACE {
                    return;
                }
                if let Some(connected) = changed.get(bluez::PROP_CONNECTED) {
                    debug!("Device {} Connected = {:?}", path, connected);
                }
                if let Some(delegate) = delegate {
                    for (property, value) in &changed {
                        delegate.on_property_changed(&path, &interface, property, value);
                    }
                }
            }
        }
    }
}
