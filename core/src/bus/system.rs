//! System-bus transport on zbus
//!
//! Every exported node is a thin `#[zbus::interface]` wrapper around a weak
//! reference into the GATT tree. Property-changed signals are queued to a
//! worker task so model code can emit from synchronous paths.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath as ZPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{fdo, Connection, MatchRule, Message, MessageStream};

use super::{
    BusConnection, BusError, ExportedObject, InterfaceMap, ManagedObjects, ManagerCall, ObjectKind,
    ObjectPath, PropertyMap, PropertyValue, SignalEvent, SignalHandler, SignalRule, SubscriptionId,
};
use crate::advertising::{Advertisement, APPEARANCE_UNSET, TX_POWER_NO_PREFERENCE};
use crate::bluez;
use crate::gatt::{AccessOptions, Application, Characteristic, Descriptor, Service};
use crate::GattError;

// ============ ERROR MAPPING ============

/// Errors returned to remote callers of exported objects
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.bluez.Error")]
pub enum BluezError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Failed(String),
    NotSupported(String),
    NotPermitted(String),
    InvalidArguments(String),
    InvalidOffset(String),
    InProgress(String),
    DoesNotExist(String),
}

impl From<GattError> for BluezError {
    fn from(err: GattError) -> Self {
        let message = err.to_string();
        match err.dbus_name() {
            bluez::ERROR_NOT_SUPPORTED => Self::NotSupported(message),
            bluez::ERROR_NOT_PERMITTED => Self::NotPermitted(message),
            bluez::ERROR_INVALID_ARGUMENTS => Self::InvalidArguments(message),
            bluez::ERROR_INVALID_OFFSET => Self::InvalidOffset(message),
            bluez::ERROR_IN_PROGRESS => Self::InProgress(message),
            bluez::ERROR_DOES_NOT_EXIST => Self::DoesNotExist(message),
            _ => Self::Failed(message),
        }
    }
}

fn from_zbus(err: zbus::Error) -> BusError {
    match err {
        zbus::Error::MethodError(name, message, _) => {
            BusError::remote(name.to_string(), message.unwrap_or_default())
        }
        zbus::Error::FDO(fdo) => {
            use zbus::DBusError;
            BusError::remote(fdo.name().to_string(), fdo.description().unwrap_or_default())
        }
        zbus::Error::InputOutput(e) => {
            debug!("Bus I/O error: {}", e);
            BusError::NotConnected
        }
        other => BusError::Protocol(other.to_string()),
    }
}

fn gone(path: &ObjectPath) -> fdo::Error {
    fdo::Error::UnknownObject(format!("{} no longer exists", path))
}

// ============ VALUE CONVERSION ============

fn zpath(path: &ObjectPath) -> OwnedObjectPath {
    OwnedObjectPath::from(ZPath::from_string_unchecked(path.to_string()))
}

fn byte_dict<K>(entries: impl Iterator<Item = (K, Vec<u8>)>) -> HashMap<K, Value<'static>>
where
    K: std::hash::Hash + Eq,
{
    entries.map(|(key, bytes)| (key, Value::from(bytes))).collect()
}

pub(crate) fn to_value(value: &PropertyValue) -> Value<'static> {
    match value {
        PropertyValue::Bool(v) => Value::from(*v),
        PropertyValue::Byte(v) => Value::from(*v),
        PropertyValue::U16(v) => Value::from(*v),
        PropertyValue::I16(v) => Value::from(*v),
        PropertyValue::U32(v) => Value::from(*v),
        PropertyValue::Str(v) => Value::from(v.clone()),
        PropertyValue::Path(p) => Value::from(ZPath::from_string_unchecked(p.to_string())),
        PropertyValue::Bytes(v) => Value::from(v.clone()),
        PropertyValue::StrList(v) => Value::from(v.clone()),
        PropertyValue::PathList(v) => Value::from(
            v.iter()
                .map(|p| ZPath::from_string_unchecked(p.to_string()))
                .collect::<Vec<_>>(),
        ),
        PropertyValue::U16KeyedBytes(m) => {
            Value::from(byte_dict(m.iter().map(|(k, v)| (*k, v.clone()))))
        }
        PropertyValue::StrKeyedBytes(m) => {
            Value::from(byte_dict(m.iter().map(|(k, v)| (k.clone(), v.clone()))))
        }
    }
}

/// Decode the value shapes the model understands; anything else is `None`.
pub(crate) fn from_value(value: &Value<'_>) -> Option<PropertyValue> {
    let decoded = match value {
        Value::Bool(v) => PropertyValue::Bool(*v),
        Value::U8(v) => PropertyValue::Byte(*v),
        Value::U16(v) => PropertyValue::U16(*v),
        Value::I16(v) => PropertyValue::I16(*v),
        Value::U32(v) => PropertyValue::U32(*v),
        Value::Str(s) => PropertyValue::Str(s.to_string()),
        Value::ObjectPath(p) => PropertyValue::Path(ObjectPath::new(p.as_str()).ok()?),
        Value::Value(inner) => return from_value(inner),
        Value::Array(array) => match array.element_signature().to_string().as_str() {
            "y" => PropertyValue::Bytes(
                array
                    .iter()
                    .filter_map(|v| match v {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect(),
            ),
            "s" => PropertyValue::StrList(
                array
                    .iter()
                    .filter_map(|v| match v {
                        Value::Str(s) => Some(s.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            "o" => PropertyValue::PathList(
                array
                    .iter()
                    .filter_map(|v| match v {
                        Value::ObjectPath(p) => ObjectPath::new(p.as_str()).ok(),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => return None,
        },
        _ => return None,
    };
    Some(decoded)
}

fn property_map(props: &HashMap<String, OwnedValue>) -> PropertyMap {
    props
        .iter()
        .filter_map(|(name, value)| from_value(value).map(|v| (name.clone(), v)))
        .collect()
}

fn access_options(options: &HashMap<String, OwnedValue>) -> AccessOptions {
    AccessOptions::from_map(&property_map(options))
}

// ============ EXPORTED NODES ============

struct ApplicationNode {
    app: Weak<Application>,
}

type WireManagedObjects = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, Value<'static>>>>;

#[zbus::interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ApplicationNode {
    fn get_managed_objects(&self) -> fdo::Result<WireManagedObjects> {
        let app = self
            .app
            .upgrade()
            .ok_or_else(|| fdo::Error::UnknownObject("application dropped".to_string()))?;

        let objects = app.managed_objects();
        debug!("GetManagedObjects on {}: {} objects", app.path(), objects.len());
        Ok(objects
            .iter()
            .map(|(path, interfaces)| {
                let interfaces = interfaces
                    .iter()
                    .map(|(iface, props)| {
                        let props = props
                            .iter()
                            .map(|(name, value)| (name.clone(), to_value(value)))
                            .collect();
                        (iface.clone(), props)
                    })
                    .collect();
                (zpath(path), interfaces)
            })
            .collect())
    }
}

struct ServiceNode {
    service: Weak<Service>,
    path: ObjectPath,
}

impl ServiceNode {
    fn get(&self) -> fdo::Result<Arc<Service>> {
        self.service.upgrade().ok_or_else(|| gone(&self.path))
    }
}

#[zbus::interface(name = "org.bluez.GattService1")]
impl ServiceNode {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> fdo::Result<String> {
        Ok(self.get()?.uuid().to_display_string())
    }

    #[zbus(property)]
    fn primary(&self) -> fdo::Result<bool> {
        Ok(self.get()?.is_primary())
    }

    #[zbus(property)]
    fn characteristics(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        Ok(self.get()?.characteristic_paths().iter().map(zpath).collect())
    }
}

struct CharacteristicNode {
    characteristic: Weak<Characteristic>,
    path: ObjectPath,
}

impl CharacteristicNode {
    fn get(&self) -> fdo::Result<Arc<Characteristic>> {
        self.characteristic.upgrade().ok_or_else(|| gone(&self.path))
    }

    fn call(&self) -> Result<Arc<Characteristic>, BluezError> {
        self.characteristic
            .upgrade()
            .ok_or_else(|| BluezError::DoesNotExist(self.path.to_string()))
    }
}

#[zbus::interface(name = "org.bluez.GattCharacteristic1")]
impl CharacteristicNode {
    fn read_value(&self, options: HashMap<String, OwnedValue>) -> Result<Vec<u8>, BluezError> {
        Ok(self.call()?.read(&access_options(&options))?)
    }

    fn write_value(
        &self,
        value: Vec<u8>,
        options: HashMap<String, OwnedValue>,
    ) -> Result<(), BluezError> {
        Ok(self.call()?.write(&value, &access_options(&options))?)
    }

    fn start_notify(&self) -> Result<(), BluezError> {
        Ok(self.call()?.start_notify()?)
    }

    fn stop_notify(&self) -> Result<(), BluezError> {
        self.call()?.stop_notify();
        Ok(())
    }

    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> fdo::Result<String> {
        Ok(self.get()?.uuid().to_display_string())
    }

    #[zbus(property)]
    fn service(&self) -> fdo::Result<OwnedObjectPath> {
        Ok(zpath(self.get()?.service_path()))
    }

    #[zbus(property)]
    fn value(&self) -> fdo::Result<Vec<u8>> {
        Ok(self.get()?.value())
    }

    #[zbus(property)]
    fn notifying(&self) -> fdo::Result<bool> {
        Ok(self.get()?.is_notifying())
    }

    #[zbus(property)]
    fn flags(&self) -> fdo::Result<Vec<String>> {
        Ok(self.get()?.flag_strings())
    }

    #[zbus(property)]
    fn descriptors(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        Ok(self.get()?.descriptor_paths().iter().map(zpath).collect())
    }
}

struct DescriptorNode {
    descriptor: Weak<Descriptor>,
    path: ObjectPath,
}

impl DescriptorNode {
    fn get(&self) -> fdo::Result<Arc<Descriptor>> {
        self.descriptor.upgrade().ok_or_else(|| gone(&self.path))
    }

    fn call(&self) -> Result<Arc<Descriptor>, BluezError> {
        self.descriptor
            .upgrade()
            .ok_or_else(|| BluezError::DoesNotExist(self.path.to_string()))
    }
}

#[zbus::interface(name = "org.bluez.GattDescriptor1")]
impl DescriptorNode {
    fn read_value(&self, options: HashMap<String, OwnedValue>) -> Result<Vec<u8>, BluezError> {
        Ok(self.call()?.read(&access_options(&options))?)
    }

    fn write_value(
        &self,
        value: Vec<u8>,
        options: HashMap<String, OwnedValue>,
    ) -> Result<(), BluezError> {
        Ok(self.call()?.write(&value, &access_options(&options))?)
    }

    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> fdo::Result<String> {
        Ok(self.get()?.uuid().to_display_string())
    }

    #[zbus(property)]
    fn characteristic(&self) -> fdo::Result<OwnedObjectPath> {
        Ok(zpath(self.get()?.characteristic_path()))
    }

    #[zbus(property)]
    fn value(&self) -> fdo::Result<Vec<u8>> {
        Ok(self.get()?.value())
    }

    #[zbus(property)]
    fn flags(&self) -> fdo::Result<Vec<String>> {
        Ok(self.get()?.flags())
    }
}

/// `LEAdvertisement1`. zbus always publishes every property, so unset
/// optional fields are reported as values BlueZ treats as absent.
struct AdvertisementNode {
    advertisement: Weak<Advertisement>,
    path: ObjectPath,
}

impl AdvertisementNode {
    fn get(&self) -> fdo::Result<Arc<Advertisement>> {
        self.advertisement.upgrade().ok_or_else(|| gone(&self.path))
    }
}

#[zbus::interface(name = "org.bluez.LEAdvertisement1")]
impl AdvertisementNode {
    fn release(&self) {
        if let Some(advertisement) = self.advertisement.upgrade() {
            advertisement.release();
        }
    }

    #[zbus(property, name = "Type")]
    fn kind(&self) -> fdo::Result<String> {
        Ok(self.get()?.data().kind.as_str().to_string())
    }

    #[zbus(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> fdo::Result<Vec<String>> {
        let data = self.get()?.data();
        Ok(data.service_uuids().iter().map(|u| u.to_display_string()).collect())
    }

    #[zbus(property, name = "SolicitUUIDs")]
    fn solicit_uuids(&self) -> fdo::Result<Vec<String>> {
        let data = self.get()?.data();
        Ok(data.solicit_uuids().iter().map(|u| u.to_display_string()).collect())
    }

    #[zbus(property)]
    fn manufacturer_data(&self) -> fdo::Result<HashMap<u16, Value<'static>>> {
        let data = self.get()?.data();
        Ok(byte_dict(
            data.manufacturer_data().iter().map(|(k, v)| (*k, v.clone())),
        ))
    }

    #[zbus(property)]
    fn service_data(&self) -> fdo::Result<HashMap<String, Value<'static>>> {
        let data = self.get()?.data();
        Ok(byte_dict(
            data.service_data()
                .iter()
                .map(|(k, v)| (k.to_display_string(), v.clone())),
        ))
    }

    #[zbus(property)]
    fn includes(&self) -> fdo::Result<Vec<String>> {
        Ok(self.get()?.data().includes().to_vec())
    }

    #[zbus(property)]
    fn local_name(&self) -> fdo::Result<String> {
        Ok(self.get()?.data().local_name().unwrap_or_default().to_string())
    }

    #[zbus(property)]
    fn appearance(&self) -> fdo::Result<u16> {
        Ok(self.get()?.data().appearance().unwrap_or(APPEARANCE_UNSET))
    }

    #[zbus(property)]
    fn duration(&self) -> fdo::Result<u16> {
        Ok(self.get()?.data().duration().unwrap_or(0))
    }

    #[zbus(property)]
    fn timeout(&self) -> fdo::Result<u16> {
        Ok(self.get()?.data().timeout().unwrap_or(0))
    }

    #[zbus(property)]
    fn tx_power(&self) -> fdo::Result<i16> {
        Ok(self.get()?.data().tx_power().unwrap_or(TX_POWER_NO_PREFERENCE))
    }

    #[zbus(property)]
    fn discoverable(&self) -> fdo::Result<bool> {
        Ok(self.get()?.data().discoverable)
    }
}

// ============ SIGNALS ============

fn match_rule(rule: &SignalRule) -> zbus::Result<MatchRule<'static>> {
    let builder = MatchRule::builder().msg_type(zbus::message::Type::Signal);
    let builder = match rule {
        SignalRule::InterfacesAdded => builder
            .interface(bluez::OBJECT_MANAGER_IFACE)?
            .member(bluez::INTERFACES_ADDED)?,
        SignalRule::InterfacesRemoved => builder
            .interface(bluez::OBJECT_MANAGER_IFACE)?
            .member(bluez::INTERFACES_REMOVED)?,
        SignalRule::PropertiesChanged { interface } => builder
            .interface(bluez::PROPERTIES_IFACE)?
            .member(bluez::PROPERTIES_CHANGED)?
            .arg(0, interface.clone())?,
    };
    Ok(builder.build())
}

fn decode_signal(rule: &SignalRule, message: &Message) -> Option<SignalEvent> {
    let body = message.body();
    match rule {
        SignalRule::InterfacesAdded => {
            let (path, interfaces): (OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>) =
                body.deserialize().ok()?;
            let interfaces: InterfaceMap = interfaces
                .iter()
                .map(|(iface, props)| (iface.clone(), property_map(props)))
                .collect();
            Some(SignalEvent::InterfacesAdded {
                path: ObjectPath::new(path.as_str()).ok()?,
                interfaces,
            })
        }
        SignalRule::InterfacesRemoved => {
            let (path, interfaces): (OwnedObjectPath, Vec<String>) = body.deserialize().ok()?;
            Some(SignalEvent::InterfacesRemoved {
                path: ObjectPath::new(path.as_str()).ok()?,
                interfaces,
            })
        }
        SignalRule::PropertiesChanged { .. } => {
            let header = message.header();
            let path = ObjectPath::new(header.path()?.as_str()).ok()?;
            let (interface, changed, invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
                body.deserialize().ok()?;
            Some(SignalEvent::PropertiesChanged {
                path,
                interface,
                changed: property_map(&changed),
                invalidated,
            })
        }
    }
}

// ============ TRANSPORT ============

struct PendingChange {
    path: ObjectPath,
    interface: String,
    changed: PropertyMap,
}

/// [`BusConnection`] on the D-Bus system bus.
pub struct SystemBus {
    conn: Connection,
    changes: mpsc::UnboundedSender<PendingChange>,
    subscriptions: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl SystemBus {
    /// Connect to the system bus. Must be called inside a tokio runtime.
    pub async fn connect() -> Result<Arc<Self>, BusError> {
        let conn = Connection::system().await.map_err(from_zbus)?;
        info!(
            "Connected to system bus as {}",
            conn.unique_name().map(|n| n.to_string()).unwrap_or_default()
        );
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: Connection) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(emit_changes(conn.clone(), rx));
        Arc::new(Self {
            conn,
            changes: tx,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn call_bluez<B>(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        body: &B,
    ) -> Result<Message, BusError>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        self.conn
            .call_method(Some(bluez::SERVICE), path, Some(interface), member, body)
            .await
            .map_err(from_zbus)
    }
}

async fn emit_changes(conn: Connection, mut rx: mpsc::UnboundedReceiver<PendingChange>) {
    while let Some(change) = rx.recv().await {
        let changed: HashMap<String, Value<'static>> = change
            .changed
            .iter()
            .map(|(name, value)| (name.clone(), to_value(value)))
            .collect();
        let invalidated: Vec<String> = Vec::new();

        if let Err(e) = conn
            .emit_signal(
                None::<&str>,
                change.path.as_str(),
                bluez::PROPERTIES_IFACE,
                bluez::PROPERTIES_CHANGED,
                &(change.interface.as_str(), changed, invalidated),
            )
            .await
        {
            warn!("PropertiesChanged on {} not sent: {}", change.path, e);
        }
    }
    debug!("Property change worker stopped");
}

#[async_trait]
impl BusConnection for SystemBus {
    async fn export(&self, path: &ObjectPath, object: ExportedObject) -> Result<(), BusError> {
        let server = self.conn.object_server();
        let at = path.as_str();
        let node_path = path.clone();

        let added = match object {
            ExportedObject::Application(app) => server.at(at, ApplicationNode { app }).await,
            ExportedObject::Service(service) => {
                server
                    .at(at, ServiceNode { service, path: node_path })
                    .await
            }
            ExportedObject::Characteristic(characteristic) => {
                server
                    .at(at, CharacteristicNode { characteristic, path: node_path })
                    .await
            }
            ExportedObject::Descriptor(descriptor) => {
                server
                    .at(at, DescriptorNode { descriptor, path: node_path })
                    .await
            }
            ExportedObject::Advertisement(advertisement) => {
                server
                    .at(at, AdvertisementNode { advertisement, path: node_path })
                    .await
            }
        }
        .map_err(|e| BusError::Export {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        if !added {
            debug!("{} was already exported", path);
        }
        Ok(())
    }

    async fn unexport(&self, path: &ObjectPath, kind: ObjectKind) -> Result<(), BusError> {
        let server = self.conn.object_server();
        let at = path.as_str();
        let result = match kind {
            ObjectKind::Application => server.remove::<ApplicationNode, _>(at).await,
            ObjectKind::Service => server.remove::<ServiceNode, _>(at).await,
            ObjectKind::Characteristic => server.remove::<CharacteristicNode, _>(at).await,
            ObjectKind::Descriptor => server.remove::<DescriptorNode, _>(at).await,
            ObjectKind::Advertisement => server.remove::<AdvertisementNode, _>(at).await,
        };
        match result {
            Ok(_) | Err(zbus::Error::InterfaceNotFound) => Ok(()),
            Err(e) => Err(BusError::Export {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn call_manager(
        &self,
        adapter: &ObjectPath,
        call: ManagerCall,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let target = zpath(call.path());
        let request = async {
            match &call {
                ManagerCall::RegisterApplication { options, .. }
                | ManagerCall::RegisterAdvertisement { options, .. } => {
                    let options: HashMap<String, Value<'static>> = options
                        .iter()
                        .map(|(k, v)| (k.clone(), to_value(v)))
                        .collect();
                    self.call_bluez(adapter.as_str(), call.interface(), call.member(), &(&target, options))
                        .await
                }
                ManagerCall::UnregisterApplication { .. }
                | ManagerCall::UnregisterAdvertisement { .. } => {
                    self.call_bluez(adapter.as_str(), call.interface(), call.member(), &(&target,))
                        .await
                }
            }
        };

        debug!("{}.{} {}", call.interface(), call.member(), call.path());
        match tokio::time::timeout(timeout, request).await {
            Err(_) => Err(BusError::Timeout(timeout)),
            Ok(reply) => reply.map(|_| ()),
        }
    }

    async fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<PropertyValue, BusError> {
        let reply = self
            .call_bluez(path.as_str(), bluez::PROPERTIES_IFACE, "Get", &(interface, name))
            .await?;
        let value: OwnedValue = reply.body().deserialize().map_err(from_zbus)?;
        from_value(&value).ok_or_else(|| {
            BusError::Protocol(format!("{}.{} has an unsupported type", interface, name))
        })
    }

    async fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), BusError> {
        self.call_bluez(
            path.as_str(),
            bluez::PROPERTIES_IFACE,
            "Set",
            &(interface, name, to_value(&value)),
        )
        .await
        .map(|_| ())
    }

    async fn managed_objects(&self) -> Result<ManagedObjects, BusError> {
        let reply = self
            .call_bluez("/", bluez::OBJECT_MANAGER_IFACE, bluez::GET_MANAGED_OBJECTS, &())
            .await?;
        let objects: HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>> =
            reply.body().deserialize().map_err(from_zbus)?;

        Ok(objects
            .iter()
            .filter_map(|(path, interfaces)| {
                let path = ObjectPath::new(path.as_str()).ok()?;
                let interfaces: InterfaceMap = interfaces
                    .iter()
                    .map(|(iface, props)| (iface.clone(), property_map(props)))
                    .collect();
                Some((path, interfaces))
            })
            .collect())
    }

    fn emit_properties_changed(&self, path: &ObjectPath, interface: &str, changed: PropertyMap) {
        let change = PendingChange {
            path: path.clone(),
            interface: interface.to_string(),
            changed,
        };
        if self.changes.send(change).is_err() {
            warn!("Property change worker is gone; dropping change for {}", path);
        }
    }

    async fn subscribe(
        &self,
        rule: SignalRule,
        handler: SignalHandler,
    ) -> Result<SubscriptionId, BusError> {
        let filter = match_rule(&rule).map_err(from_zbus)?;
        let mut stream = MessageStream::for_match_rule(filter, &self.conn, None)
            .await
            .map_err(from_zbus)?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));

        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(message) => {
                        if let Some(event) = decode_signal(&rule, &message) {
                            handler(event);
                        }
                    }
                    Err(e) => warn!("Signal stream error: {}", e),
                }
            }
        });

        self.subscriptions.lock().insert(id, task);
        debug!("Subscribed {:?}", id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        if let Some(task) = self.subscriptions.lock().remove(&id) {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for SystemBus {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }
}
