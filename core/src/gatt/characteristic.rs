use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

use super::descriptor::Descriptor;
use super::flags::{CharacteristicFlags, Permissions};
use super::free_child_path;
use super::options::{check_offset, read_at, write_at, AccessOptions};
use super::provider::{guarded, NotifyObserver, ReadProvider, WriteProvider};
use super::service::Service;
use super::uuid::{self, GattUuid};
use crate::bluez;
use crate::bus::{BusConnection, ExportedObject, ObjectKind, ObjectPath, PropertyMap, PropertyValue};
use crate::GattError;

/// A GATT characteristic, owned by its service.
///
/// Value pushes become BLE notifications only while `Notifying` is set and
/// the characteristic is exported: the `PropertiesChanged` signal on `Value`
/// is what BlueZ forwards to subscribed centrals.
pub struct Characteristic {
    uuid: GattUuid,
    path: ObjectPath,
    service: Weak<Service>,
    service_path: ObjectPath,
    flags: CharacteristicFlags,
    permissions: Permissions,
    value: Mutex<Vec<u8>>,
    notifying: AtomicBool,
    descriptors: RwLock<Vec<Arc<Descriptor>>>,
    read_provider: RwLock<Option<Arc<dyn ReadProvider>>>,
    write_provider: RwLock<Option<Arc<dyn WriteProvider>>>,
    notify_observer: RwLock<Option<Arc<dyn NotifyObserver>>>,
    /// Wire flags, fixed on first publication
    flag_strings: OnceLock<Vec<String>>,
    emitter: RwLock<Option<Arc<dyn BusConnection>>>,
    frozen: Arc<AtomicBool>,
}

impl Characteristic {
    pub(crate) fn new(
        uuid: GattUuid,
        path: ObjectPath,
        service: Weak<Service>,
        service_path: ObjectPath,
        flags: CharacteristicFlags,
        permissions: Permissions,
        frozen: Arc<AtomicBool>,
    ) -> Self {
        Self {
            uuid,
            path,
            service,
            service_path,
            flags,
            permissions,
            value: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
            descriptors: RwLock::new(Vec::new()),
            read_provider: RwLock::new(None),
            write_provider: RwLock::new(None),
            notify_observer: RwLock::new(None),
            flag_strings: OnceLock::new(),
            emitter: RwLock::new(None),
            frozen,
        }
    }

    pub fn uuid(&self) -> GattUuid {
        self.uuid
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn service_path(&self) -> &ObjectPath {
        &self.service_path
    }

    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    pub fn flags(&self) -> CharacteristicFlags {
        self.flags
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// `Flags` as sent to BlueZ
    pub fn flag_strings(&self) -> Vec<String> {
        self.flag_strings
            .get()
            .cloned()
            .unwrap_or_else(|| self.flags.to_strings())
    }

    pub fn value(&self) -> Vec<u8> {
        self.value.lock().clone()
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.load(Ordering::Acquire)
    }

    pub fn is_published(&self) -> bool {
        self.emitter.read().is_some()
    }

    pub fn set_read_provider(&self, provider: impl ReadProvider + 'static) {
        *self.read_provider.write() = Some(Arc::new(provider));
    }

    pub fn set_write_provider(&self, provider: impl WriteProvider + 'static) {
        *self.write_provider.write() = Some(Arc::new(provider));
    }

    pub fn set_notify_observer(&self, observer: impl NotifyObserver + 'static) {
        *self.notify_observer.write() = Some(Arc::new(observer));
    }

    // ============ DESCRIPTORS ============

    /// Add a descriptor, or return the existing one with the same identifier.
    pub fn create_descriptor(
        self: &Arc<Self>,
        uuid: GattUuid,
        permissions: Permissions,
    ) -> Result<Arc<Descriptor>, GattError> {
        if let Some(existing) = self.descriptor(&uuid) {
            return Ok(existing);
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(GattError::TopologyFrozen);
        }
        self.insert_descriptor(uuid, permissions)
    }

    fn insert_descriptor(
        self: &Arc<Self>,
        uuid: GattUuid,
        permissions: Permissions,
    ) -> Result<Arc<Descriptor>, GattError> {
        let mut descriptors = self.descriptors.write();
        if let Some(existing) = descriptors.iter().find(|d| d.uuid() == uuid) {
            return Ok(existing.clone());
        }

        let path = free_child_path(&self.path, "desc", descriptors.iter().map(|d| d.path()))?;
        let descriptor = Arc::new(Descriptor::new(
            uuid,
            path,
            Arc::downgrade(self),
            self.path.clone(),
            permissions,
        ));
        descriptors.push(descriptor.clone());
        debug!("Descriptor {} added under {}", uuid, self.path);
        Ok(descriptor)
    }

    pub fn descriptor(&self, uuid: &GattUuid) -> Option<Arc<Descriptor>> {
        self.descriptors
            .read()
            .iter()
            .find(|d| d.uuid() == *uuid)
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<Arc<Descriptor>> {
        self.descriptors.read().clone()
    }

    pub fn descriptor_paths(&self) -> Vec<ObjectPath> {
        self.descriptors
            .read()
            .iter()
            .map(|d| d.path().clone())
            .collect()
    }

    // ============ VALUE ACCESS ============

    pub fn read(&self, options: &AccessOptions) -> Result<Vec<u8>, GattError> {
        let provider = self.read_provider.read().clone();
        match provider {
            Some(provider) => guarded("characteristic read", || provider.read(options)),
            None => Ok(read_at(&self.value.lock(), options.offset)),
        }
    }

    pub fn write(&self, bytes: &[u8], options: &AccessOptions) -> Result<(), GattError> {
        check_offset(options.offset)?;
        let provider = self.write_provider.read().clone();
        if let Some(provider) = provider {
            guarded("characteristic write", || provider.write(bytes, options))?;
        }
        let snapshot = {
            let mut value = self.value.lock();
            write_at(&mut value, options.offset, bytes)?;
            value.clone()
        };
        self.value_changed(snapshot);
        Ok(())
    }

    /// Replace the value from application code, notifying subscribers.
    pub fn set_value(&self, bytes: &[u8]) {
        let snapshot = {
            let mut value = self.value.lock();
            value.clear();
            value.extend_from_slice(bytes);
            value.clone()
        };
        self.value_changed(snapshot);
    }

    fn value_changed(&self, snapshot: Vec<u8>) {
        if self.is_notifying() {
            self.emit(bluez::PROP_VALUE, PropertyValue::Bytes(snapshot));
        }
    }

    // ============ NOTIFICATIONS ============

    pub fn start_notify(&self) -> Result<(), GattError> {
        if !self.flags.supports_notifications() {
            return Err(GattError::NotSupported(format!(
                "characteristic {} does not notify or indicate",
                self.uuid
            )));
        }
        if !self.notifying.swap(true, Ordering::AcqRel) {
            info!("Notifications started: {}", self.path);
            self.notifying_changed(true);
        }
        Ok(())
    }

    pub fn stop_notify(&self) {
        if self.notifying.swap(false, Ordering::AcqRel) {
            info!("Notifications stopped: {}", self.path);
            self.notifying_changed(false);
        }
    }

    fn notifying_changed(&self, notifying: bool) {
        self.emit(bluez::PROP_NOTIFYING, PropertyValue::Bool(notifying));
        let observer = self.notify_observer.read().clone();
        if let Some(observer) = observer {
            let _ = guarded("notify observer", || {
                observer.notifying_changed(&self.uuid, notifying);
                Ok(())
            });
        }
    }

    fn emit(&self, property: &str, value: PropertyValue) {
        let emitter = self.emitter.read().clone();
        if let Some(bus) = emitter {
            let mut changed = PropertyMap::new();
            changed.insert(property.to_string(), value);
            bus.emit_properties_changed(&self.path, bluez::GATT_CHARACTERISTIC_IFACE, changed);
        }
    }

    // ============ PUBLICATION ============

    /// Properties reported through `GetManagedObjects`
    pub(crate) fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(
            bluez::PROP_UUID.to_string(),
            PropertyValue::Str(self.uuid.to_display_string()),
        );
        props.insert(
            bluez::PROP_SERVICE.to_string(),
            PropertyValue::Path(self.service_path.clone()),
        );
        props.insert(
            bluez::PROP_FLAGS.to_string(),
            PropertyValue::StrList(self.flag_strings()),
        );
        props
    }

    /// Export descriptors, then the characteristic itself. A notifying
    /// characteristic gets its CCCD here if the application did not add one.
    pub(crate) async fn publish(
        self: &Arc<Self>,
        bus: &Arc<dyn BusConnection>,
    ) -> Result<(), GattError> {
        if self.flags.supports_notifications() && self.descriptor(&uuid::CCCD).is_none() {
            self.insert_descriptor(uuid::CCCD, Permissions::READ | Permissions::WRITE)?;
            debug!("CCCD synthesized for {}", self.path);
        }

        for descriptor in self.descriptors() {
            descriptor.publish(bus).await?;
        }

        self.flag_strings.get_or_init(|| self.flags.to_strings());
        bus.export(&self.path, ExportedObject::Characteristic(Arc::downgrade(self)))
            .await?;
        *self.emitter.write() = Some(bus.clone());
        debug!("Characteristic published: {} ({})", self.path, self.uuid);
        Ok(())
    }

    pub(crate) async fn unpublish(&self, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        *self.emitter.write() = None;
        bus.unexport(&self.path, ObjectKind::Characteristic).await?;
        for descriptor in self.descriptors() {
            descriptor.unpublish(bus).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("uuid", &self.uuid)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("notifying", &self.is_notifying())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use std::sync::atomic::AtomicUsize;

    fn standalone(flags: CharacteristicFlags) -> Arc<Characteristic> {
        Arc::new(Characteristic::new(
            uuid::BATTERY_LEVEL,
            ObjectPath::new("/app/service0/char0").unwrap(),
            Weak::new(),
            ObjectPath::new("/app/service0").unwrap(),
            flags,
            Permissions::READ,
            Arc::new(AtomicBool::new(false)),
        ))
    }

    #[test]
    fn test_start_notify_requires_notify_or_indicate() {
        let chr = standalone(CharacteristicFlags::READ);
        assert!(matches!(chr.start_notify(), Err(GattError::NotSupported(_))));
        assert!(!chr.is_notifying());

        let chr = standalone(CharacteristicFlags::READ | CharacteristicFlags::INDICATE);
        chr.start_notify().unwrap();
        chr.start_notify().unwrap();
        assert!(chr.is_notifying());
        chr.stop_notify();
        chr.stop_notify();
        assert!(!chr.is_notifying());
    }

    #[test]
    fn test_observer_sees_transitions_once() {
        let chr = standalone(CharacteristicFlags::NOTIFY);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        chr.set_notify_observer(move |_: &GattUuid, _: bool| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        chr.start_notify().unwrap();
        chr.start_notify().unwrap();
        chr.stop_notify();
        chr.stop_notify();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_descriptor_returns_existing() {
        let chr = standalone(CharacteristicFlags::READ);
        let first = chr
            .create_descriptor(uuid::USER_DESCRIPTION, Permissions::READ)
            .unwrap();
        let second = chr
            .create_descriptor(uuid::USER_DESCRIPTION, Permissions::WRITE)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(chr.descriptors().len(), 1);
        assert_eq!(first.path().as_str(), "/app/service0/char0/desc0");
    }

    #[test]
    fn test_frozen_topology_rejects_new_descriptors() {
        let chr = standalone(CharacteristicFlags::READ);
        chr.frozen.store(true, Ordering::Release);
        assert_eq!(
            chr.create_descriptor(uuid::USER_DESCRIPTION, Permissions::READ)
                .unwrap_err(),
            GattError::TopologyFrozen
        );
    }

    #[test]
    fn test_rejected_write_keeps_value() {
        let chr = standalone(CharacteristicFlags::WRITE);
        chr.set_value(&[1, 2, 3]);
        chr.set_write_provider(|bytes: &[u8], _: &AccessOptions| -> Result<(), GattError> {
            if bytes.len() > 2 {
                Err(GattError::Failed("too long".into()))
            } else {
                Ok(())
            }
        });

        assert!(chr.write(&[9, 9, 9], &AccessOptions::default()).is_err());
        assert_eq!(chr.value(), vec![1, 2, 3]);

        chr.write(&[4], &AccessOptions::with_offset(1)).unwrap();
        assert_eq!(chr.value(), vec![1, 4, 3]);
    }

    #[tokio::test]
    async fn test_publish_synthesizes_single_cccd() {
        let chr = standalone(CharacteristicFlags::READ | CharacteristicFlags::NOTIFY);
        let bus: Arc<dyn BusConnection> = MockBus::new();

        chr.publish(&bus).await.unwrap();
        chr.publish(&bus).await.unwrap();

        let cccds: Vec<_> = chr.descriptors().into_iter().filter(|d| d.is_cccd()).collect();
        assert_eq!(cccds.len(), 1);
        assert_eq!(cccds[0].flags(), vec!["read", "write"]);
        assert_eq!(chr.flag_strings(), vec!["read", "notify"]);
    }

    #[tokio::test]
    async fn test_value_emitted_only_while_notifying() {
        let chr = standalone(CharacteristicFlags::READ | CharacteristicFlags::NOTIFY);
        let mock = MockBus::new();
        let bus: Arc<dyn BusConnection> = mock.clone();
        chr.publish(&bus).await.unwrap();

        chr.set_value(&[10]);
        assert!(mock.emitted().is_empty());

        chr.start_notify().unwrap();
        mock.clear_emitted();
        chr.set_value(&[11]);

        let emitted = mock.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].interface, "org.bluez.GattCharacteristic1");
        assert_eq!(
            emitted[0].changed.get("Value"),
            Some(&PropertyValue::Bytes(vec![11]))
        );
    }
}
