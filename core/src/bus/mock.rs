//! In-memory bus for tests
//!
//! Records exports, manager calls and emitted property changes. Manager call
//! responses can be scripted and signals delivered by hand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BusConnection, BusError, ExportedObject, ManagedObjects, ManagerCall, ObjectKind, ObjectPath,
    PropertyMap, PropertyValue, SignalEvent, SignalHandler, SignalRule, SubscriptionId,
};

/// A property-changed signal captured by [`MockBus`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedChange {
    pub path: ObjectPath,
    pub interface: String,
    pub changed: PropertyMap,
}

type PropertyKey = (ObjectPath, String, String);

#[derive(Default)]
pub struct MockBus {
    exported: Mutex<BTreeMap<ObjectPath, ExportedObject>>,
    failing_exports: Mutex<HashSet<ObjectPath>>,
    calls: Mutex<Vec<ManagerCall>>,
    responses: Mutex<VecDeque<Result<(), BusError>>>,
    emitted: Mutex<Vec<EmittedChange>>,
    properties: Mutex<BTreeMap<PropertyKey, PropertyValue>>,
    failing_properties: Mutex<HashSet<String>>,
    managed: Mutex<ManagedObjects>,
    subscriptions: Mutex<Vec<(SubscriptionId, SignalRule, SignalHandler)>>,
    next_subscription: AtomicU64,
    subscription_limit: Mutex<Option<usize>>,
    failing_unsubscribes: Mutex<usize>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the result of the next manager call; calls succeed once the
    /// queue is empty.
    pub fn push_response(&self, response: Result<(), BusError>) {
        self.responses.lock().push_back(response);
    }

    pub fn fail_export(&self, path: &ObjectPath) {
        self.failing_exports.lock().insert(path.clone());
    }

    /// Make `get_property`/`set_property` fail for a property name
    pub fn fail_property(&self, name: &str) {
        self.failing_properties.lock().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().clone()
    }

    pub fn emitted(&self) -> Vec<EmittedChange> {
        self.emitted.lock().clone()
    }

    pub fn clear_emitted(&self) {
        self.emitted.lock().clear();
    }

    pub fn is_exported(&self, path: &ObjectPath) -> bool {
        self.exported.lock().contains_key(path)
    }

    pub fn exported_paths(&self) -> Vec<ObjectPath> {
        self.exported.lock().keys().cloned().collect()
    }

    pub fn exported_object(&self, path: &ObjectPath) -> Option<ExportedObject> {
        self.exported.lock().get(path).cloned()
    }

    /// Seed a property on a remote (BlueZ-side) object
    pub fn set_remote_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) {
        self.properties
            .lock()
            .insert((path.clone(), interface.to_string(), name.to_string()), value);
    }

    pub fn remote_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Option<PropertyValue> {
        self.properties
            .lock()
            .get(&(path.clone(), interface.to_string(), name.to_string()))
            .cloned()
    }

    /// Seed an entry in the BlueZ object tree returned by `managed_objects`
    pub fn add_managed_object(&self, path: &ObjectPath, interface: &str, properties: PropertyMap) {
        self.managed
            .lock()
            .entry(path.clone())
            .or_default()
            .insert(interface.to_string(), properties);
    }

    /// Refuse new subscriptions once `limit` are active
    pub fn limit_subscriptions(&self, limit: usize) {
        *self.subscription_limit.lock() = Some(limit);
    }

    /// Fail the next `count` unsubscribe calls, leaving those subscriptions
    /// in place
    pub fn fail_unsubscribes(&self, count: usize) {
        *self.failing_unsubscribes.lock() = count;
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Deliver a signal to every matching subscription, returning how many
    /// handlers ran.
    pub fn deliver(&self, event: SignalEvent) -> usize {
        let handlers: Vec<SignalHandler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, rule, _)| event.matches(rule))
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }
}

#[async_trait]
impl BusConnection for MockBus {
    async fn export(&self, path: &ObjectPath, object: ExportedObject) -> Result<(), BusError> {
        if self.failing_exports.lock().contains(path) {
            return Err(BusError::Export {
                path: path.to_string(),
                reason: "export refused".to_string(),
            });
        }
        self.exported.lock().insert(path.clone(), object);
        Ok(())
    }

    async fn unexport(&self, path: &ObjectPath, _kind: ObjectKind) -> Result<(), BusError> {
        self.exported.lock().remove(path);
        Ok(())
    }

    async fn call_manager(
        &self,
        _adapter: &ObjectPath,
        call: ManagerCall,
        _timeout: Duration,
    ) -> Result<(), BusError> {
        self.calls.lock().push(call);
        self.responses.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<PropertyValue, BusError> {
        if self.failing_properties.lock().contains(name) {
            return Err(BusError::remote("org.bluez.Error.Failed", "property refused"));
        }
        self.remote_property(path, interface, name).ok_or_else(|| {
            BusError::remote(
                "org.freedesktop.DBus.Error.InvalidArgs",
                format!("No such property '{}'", name),
            )
        })
    }

    async fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), BusError> {
        if self.failing_properties.lock().contains(name) {
            return Err(BusError::remote("org.bluez.Error.Failed", "property refused"));
        }
        self.set_remote_property(path, interface, name, value);
        Ok(())
    }

    async fn managed_objects(&self) -> Result<ManagedObjects, BusError> {
        Ok(self.managed.lock().clone())
    }

    fn emit_properties_changed(&self, path: &ObjectPath, interface: &str, changed: PropertyMap) {
        self.emitted.lock().push(EmittedChange {
            path: path.clone(),
            interface: interface.to_string(),
            changed,
        });
    }

    async fn subscribe(
        &self,
        rule: SignalRule,
        handler: SignalHandler,
    ) -> Result<SubscriptionId, BusError> {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(limit) = *self.subscription_limit.lock() {
            if subscriptions.len() >= limit {
                return Err(BusError::NotConnected);
            }
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        subscriptions.push((id, rule, handler));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        {
            let mut failing = self.failing_unsubscribes.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(BusError::NotConnected);
            }
        }
        self.subscriptions.lock().retain(|(existing, _, _)| *existing != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_scripted_responses() {
        let bus = MockBus::new();
        let adapter = ObjectPath::new("/org/bluez/hci0").unwrap();
        let path = ObjectPath::new("/app").unwrap();

        bus.push_response(Err(BusError::remote("org.bluez.Error.Failed", "nope")));

        let call = ManagerCall::UnregisterApplication { path };
        let timeout = Duration::from_secs(1);
        assert!(bus.call_manager(&adapter, call.clone(), timeout).await.is_err());
        assert!(bus.call_manager(&adapter, call, timeout).await.is_ok());
        assert_eq!(bus.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_deliver_and_unsubscribe() {
        let bus = MockBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let id = bus
            .subscribe(
                SignalRule::InterfacesRemoved,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let event = SignalEvent::InterfacesRemoved {
            path: ObjectPath::new("/org/bluez/hci0/dev_00").unwrap(),
            interfaces: vec![],
        };
        assert_eq!(bus.deliver(event.clone()), 1);

        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.deliver(event), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
