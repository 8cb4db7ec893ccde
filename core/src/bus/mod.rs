//! Message bus seam
//!
//! The GATT model never talks to D-Bus directly. Everything it needs from the
//! bus (exporting objects, calling the BlueZ managers, adapter properties,
//! property-changed emission, signal subscriptions) goes through
//! [`BusConnection`]. [`system::SystemBus`] implements it on the system bus;
//! [`mock::MockBus`] implements it in memory for tests.

mod path;
pub mod system;
mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

use crate::advertising::Advertisement;
use crate::bluez;
use crate::gatt::{Application, Characteristic, Descriptor, Service};

pub use path::ObjectPath;
pub use value::{InterfaceMap, ManagedObjects, PropertyMap, PropertyValue};

// ============ ERROR TYPES ============

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Remote error {name}: {message}")]
    Remote { name: String, message: String },
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Not connected to the bus")]
    NotConnected,
    #[error("Export failed for {path}: {reason}")]
    Export { path: String, reason: String },
    #[error("Invalid object path: {0:?}")]
    InvalidPath(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BusError {
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// BlueZ already holds a registration for this path.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Remote { name, message } => {
                name.ends_with(".AlreadyExists")
                    || message.contains("Already Exists")
                    || message.contains("already registered")
            }
            _ => false,
        }
    }

    /// BlueZ has no registration for this path.
    pub fn is_does_not_exist(&self) -> bool {
        match self {
            Self::Remote { name, message } => {
                name.ends_with(".DoesNotExist")
                    || message.contains("Does Not Exist")
                    || message.contains("not registered")
            }
            _ => false,
        }
    }
}

// ============ MANAGER CALLS ============

/// Remote calls into the adapter's GATT and advertising managers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    RegisterApplication { path: ObjectPath, options: PropertyMap },
    UnregisterApplication { path: ObjectPath },
    RegisterAdvertisement { path: ObjectPath, options: PropertyMap },
    UnregisterAdvertisement { path: ObjectPath },
}

impl ManagerCall {
    pub fn interface(&self) -> &'static str {
        match self {
            Self::RegisterApplication { .. } | Self::UnregisterApplication { .. } => {
                bluez::GATT_MANAGER_IFACE
            }
            Self::RegisterAdvertisement { .. } | Self::UnregisterAdvertisement { .. } => {
                bluez::ADVERTISING_MANAGER_IFACE
            }
        }
    }

    pub fn member(&self) -> &'static str {
        match self {
            Self::RegisterApplication { .. } => bluez::REGISTER_APPLICATION,
            Self::UnregisterApplication { .. } => bluez::UNREGISTER_APPLICATION,
            Self::RegisterAdvertisement { .. } => bluez::REGISTER_ADVERTISEMENT,
            Self::UnregisterAdvertisement { .. } => bluez::UNREGISTER_ADVERTISEMENT,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        match self {
            Self::RegisterApplication { path, .. }
            | Self::UnregisterApplication { path }
            | Self::RegisterAdvertisement { path, .. }
            | Self::UnregisterAdvertisement { path } => path,
        }
    }
}

// ============ SIGNALS ============

/// Signal classes a component can subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalRule {
    InterfacesAdded,
    InterfacesRemoved,
    /// `PropertiesChanged` whose first argument is `interface`
    PropertiesChanged { interface: String },
}

/// A decoded signal delivered to a subscription handler
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    InterfacesAdded {
        path: ObjectPath,
        interfaces: InterfaceMap,
    },
    InterfacesRemoved {
        path: ObjectPath,
        interfaces: Vec<String>,
    },
    PropertiesChanged {
        path: ObjectPath,
        interface: String,
        changed: PropertyMap,
        invalidated: Vec<String>,
    },
}

impl SignalEvent {
    pub fn matches(&self, rule: &SignalRule) -> bool {
        match (self, rule) {
            (Self::InterfacesAdded { .. }, SignalRule::InterfacesAdded) => true,
            (Self::InterfacesRemoved { .. }, SignalRule::InterfacesRemoved) => true,
            (
                Self::PropertiesChanged { interface, .. },
                SignalRule::PropertiesChanged { interface: wanted },
            ) => interface == wanted,
            _ => false,
        }
    }
}

pub type SignalHandler = Arc<dyn Fn(SignalEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// ============ EXPORTED OBJECTS ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Application,
    Service,
    Characteristic,
    Descriptor,
    Advertisement,
}

impl ObjectKind {
    /// Interface the object implements besides the standard ones
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Application => bluez::OBJECT_MANAGER_IFACE,
            Self::Service => bluez::GATT_SERVICE_IFACE,
            Self::Characteristic => bluez::GATT_CHARACTERISTIC_IFACE,
            Self::Descriptor => bluez::GATT_DESCRIPTOR_IFACE,
            Self::Advertisement => bluez::ADVERTISEMENT_IFACE,
        }
    }
}

/// A node handed to the bus for export.
///
/// The bus only ever holds weak references; the tree stays owned by the
/// application.
#[derive(Clone)]
pub enum ExportedObject {
    Application(Weak<Application>),
    Service(Weak<Service>),
    Characteristic(Weak<Characteristic>),
    Descriptor(Weak<Descriptor>),
    Advertisement(Weak<Advertisement>),
}

impl ExportedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Application(_) => ObjectKind::Application,
            Self::Service(_) => ObjectKind::Service,
            Self::Characteristic(_) => ObjectKind::Characteristic,
            Self::Descriptor(_) => ObjectKind::Descriptor,
            Self::Advertisement(_) => ObjectKind::Advertisement,
        }
    }

    /// Whether the referenced node is still alive
    pub fn is_alive(&self) -> bool {
        match self {
            Self::Application(w) => w.strong_count() > 0,
            Self::Service(w) => w.strong_count() > 0,
            Self::Characteristic(w) => w.strong_count() > 0,
            Self::Descriptor(w) => w.strong_count() > 0,
            Self::Advertisement(w) => w.strong_count() > 0,
        }
    }
}

impl fmt::Debug for ExportedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedObject")
            .field("kind", &self.kind())
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ============ CONNECTION TRAIT ============

/// Everything the object model needs from the message bus.
///
/// Property access and `managed_objects` target the BlueZ daemon. Signal
/// handlers run on the transport's dispatch context and must not block.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Export a node so remote callers can reach it at `path`
    async fn export(&self, path: &ObjectPath, object: ExportedObject) -> Result<(), BusError>;

    /// Remove a previously exported node
    async fn unexport(&self, path: &ObjectPath, kind: ObjectKind) -> Result<(), BusError>;

    /// Call a manager method on `adapter`, bounded by `timeout`
    async fn call_manager(
        &self,
        adapter: &ObjectPath,
        call: ManagerCall,
        timeout: Duration,
    ) -> Result<(), BusError>;

    async fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<PropertyValue, BusError>;

    async fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), BusError>;

    /// `GetManagedObjects` on the BlueZ root
    async fn managed_objects(&self) -> Result<ManagedObjects, BusError>;

    /// Queue a `PropertiesChanged` signal for a local object.
    ///
    /// Never blocks and never fails; delivery problems are logged by the
    /// transport.
    fn emit_properties_changed(&self, path: &ObjectPath, interface: &str, changed: PropertyMap);

    async fn subscribe(
        &self,
        rule: SignalRule,
        handler: SignalHandler,
    ) -> Result<SubscriptionId, BusError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let exists = BusError::remote(bluez::ERROR_ALREADY_EXISTS, "Already Exists");
        assert!(exists.is_already_exists());
        assert!(!exists.is_does_not_exist());

        let missing = BusError::remote(bluez::ERROR_DOES_NOT_EXIST, "Does Not Exist");
        assert!(missing.is_does_not_exist());
        assert!(!missing.is_already_exists());

        let by_message = BusError::remote("org.example.Error", "application already registered");
        assert!(by_message.is_already_exists());

        assert!(!BusError::Timeout(Duration::from_secs(1)).is_already_exists());
        assert!(!BusError::remote(bluez::ERROR_FAILED, "boom").is_does_not_exist());
    }

    #[test]
    fn test_manager_call_names() {
        let path = ObjectPath::new("/app").unwrap();
        let call = ManagerCall::RegisterApplication {
            path: path.clone(),
            options: PropertyMap::new(),
        };
        assert_eq!(call.interface(), "org.bluez.GattManager1");
        assert_eq!(call.member(), "RegisterApplication");
        assert_eq!(call.path(), &path);

        let call = ManagerCall::UnregisterAdvertisement { path };
        assert_eq!(call.interface(), "org.bluez.LEAdvertisingManager1");
        assert_eq!(call.member(), "UnregisterAdvertisement");
    }

    #[test]
    fn test_signal_matching() {
        let path = ObjectPath::new("/org/bluez/hci0/dev_AA").unwrap();
        let changed = SignalEvent::PropertiesChanged {
            path: path.clone(),
            interface: bluez::DEVICE_IFACE.to_string(),
            changed: PropertyMap::new(),
            invalidated: vec![],
        };
        assert!(changed.matches(&SignalRule::PropertiesChanged {
            interface: bluez::DEVICE_IFACE.to_string()
        }));
        assert!(!changed.matches(&SignalRule::PropertiesChanged {
            interface: bluez::ADAPTER_IFACE.to_string()
        }));
        assert!(!changed.matches(&SignalRule::InterfacesAdded));

        let removed = SignalEvent::InterfacesRemoved {
            path,
            interfaces: vec![],
        };
        assert!(removed.matches(&SignalRule::InterfacesRemoved));
    }
}
