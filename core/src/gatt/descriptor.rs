use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::characteristic::Characteristic;
use super::flags::Permissions;
use super::options::{check_offset, read_at, write_at, AccessOptions};
use super::provider::{guarded, ReadProvider, WriteProvider};
use super::uuid::{self, GattUuid};
use crate::bluez;
use crate::bus::{BusConnection, ExportedObject, ObjectKind, ObjectPath, PropertyMap, PropertyValue};
use crate::GattError;

/// CCCD bit 0
const CCCD_NOTIFY: u8 = 0x01;
/// CCCD bit 1
const CCCD_INDICATE: u8 = 0x02;

/// A GATT descriptor, owned by its characteristic.
pub struct Descriptor {
    uuid: GattUuid,
    path: ObjectPath,
    characteristic: Weak<Characteristic>,
    characteristic_path: ObjectPath,
    permissions: Permissions,
    value: Mutex<Vec<u8>>,
    /// Held from computing a new value through committing it
    write_lock: Mutex<()>,
    read_provider: RwLock<Option<Arc<dyn ReadProvider>>>,
    write_provider: RwLock<Option<Arc<dyn WriteProvider>>>,
    /// Set while exported on a bus
    emitter: RwLock<Option<Arc<dyn BusConnection>>>,
}

impl Descriptor {
    pub(crate) fn new(
        uuid: GattUuid,
        path: ObjectPath,
        characteristic: Weak<Characteristic>,
        characteristic_path: ObjectPath,
        permissions: Permissions,
    ) -> Self {
        Self {
            uuid,
            path,
            characteristic,
            characteristic_path,
            permissions,
            value: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            read_provider: RwLock::new(None),
            write_provider: RwLock::new(None),
            emitter: RwLock::new(None),
        }
    }

    pub fn uuid(&self) -> GattUuid {
        self.uuid
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn characteristic_path(&self) -> &ObjectPath {
        &self.characteristic_path
    }

    /// Parent characteristic, if it is still alive
    pub fn characteristic(&self) -> Option<Arc<Characteristic>> {
        self.characteristic.upgrade()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// `Flags` as sent to BlueZ
    pub fn flags(&self) -> Vec<String> {
        self.permissions.to_strings()
    }

    pub fn value(&self) -> Vec<u8> {
        self.value.lock().clone()
    }

    pub fn is_cccd(&self) -> bool {
        self.uuid == uuid::CCCD
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

    pub fn read(&self, options: &AccessOptions) -> Result<Vec<u8>, GattError> {
        let provider = self.read_provider.read().clone();
        match provider {
            Some(provider) => guarded("descriptor read", || provider.read(options)),
            None => Ok(read_at(&self.value.lock(), options.offset)),
        }
    }

    pub fn write(&self, bytes: &[u8], options: &AccessOptions) -> Result<(), GattError> {
        check_offset(options.offset)?;
        let provider = self.write_provider.read().clone();
        if let Some(provider) = provider {
            guarded("descriptor write", || provider.write(bytes, options))?;
        }
        self.store(bytes, options.offset)
    }

    /// Replace the value from application code. Providers are not consulted.
    pub fn set_value(&self, bytes: &[u8]) -> Result<(), GattError> {
        self.store(bytes, 0)
    }

    fn store(&self, bytes: &[u8], offset: usize) -> Result<(), GattError> {
        let next = {
            let _serial = self.write_lock.lock();
            let mut next = self.value.lock().clone();
            write_at(&mut next, offset, bytes)?;

            // A refused CCCD transition must leave the stored value untouched
            if self.is_cccd() {
                self.apply_cccd(&next)?;
            }

            *self.value.lock() = next.clone();
            next
        };
        trace!("Descriptor {} value set ({} bytes)", self.path, next.len());

        if offset == 0 {
            self.emit_value(next);
        }
        Ok(())
    }

    fn apply_cccd(&self, value: &[u8]) -> Result<(), GattError> {
        let Some(characteristic) = self.characteristic.upgrade() else {
            debug!("CCCD {} has no live characteristic", self.path);
            return Ok(());
        };
        let bits = value.first().copied().unwrap_or(0);
        if bits & (CCCD_NOTIFY | CCCD_INDICATE) != 0 {
            characteristic.start_notify()
        } else {
            characteristic.stop_notify();
            Ok(())
        }
    }

    fn emit_value(&self, value: Vec<u8>) {
        let emitter = self.emitter.read().clone();
        if let Some(bus) = emitter {
            let mut changed = PropertyMap::new();
            changed.insert(bluez::PROP_VALUE.to_string(), PropertyValue::Bytes(value));
            bus.emit_properties_changed(&self.path, bluez::GATT_DESCRIPTOR_IFACE, changed);
        }
    }

    /// Properties reported through `GetManagedObjects`
    pub(crate) fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(
            bluez::PROP_UUID.to_string(),
            PropertyValue::Str(self.uuid.to_display_string()),
        );
        props.insert(
            bluez::PROP_CHARACTERISTIC.to_string(),
            PropertyValue::Path(self.characteristic_path.clone()),
        );
        props.insert(bluez::PROP_FLAGS.to_string(), PropertyValue::StrList(self.flags()));
        props
    }

    pub(crate) async fn publish(
        self: &Arc<Self>,
        bus: &Arc<dyn BusConnection>,
    ) -> Result<(), GattError> {
        bus.export(&self.path, ExportedObject::Descriptor(Arc::downgrade(self)))
            .await?;
        *self.emitter.write() = Some(bus.clone());
        debug!("Descriptor published: {} ({})", self.path, self.uuid);
        Ok(())
    }

    pub(crate) async fn unpublish(&self, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        *self.emitter.write() = None;
        bus.unexport(&self.path, ObjectKind::Descriptor).await?;
        Ok(())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("uuid", &self.uuid)
            .field("path", &self.path)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(uuid: GattUuid) -> Descriptor {
        Descriptor::new(
            uuid,
            ObjectPath::new("/app/service0/char0/desc0").unwrap(),
            Weak::new(),
            ObjectPath::new("/app/service0/char0").unwrap(),
            Permissions::READ | Permissions::WRITE,
        )
    }

    #[test]
    fn test_read_with_offset() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        desc.set_value(b"battery").unwrap();

        assert_eq!(desc.read(&AccessOptions::default()).unwrap(), b"battery");
        assert_eq!(desc.read(&AccessOptions::with_offset(4)).unwrap(), b"ery");
        assert!(desc.read(&AccessOptions::with_offset(7)).unwrap().is_empty());
        assert!(desc.read(&AccessOptions::with_offset(100)).unwrap().is_empty());
    }

    #[test]
    fn test_offset_write_zero_extends() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        desc.set_value(&[1, 2]).unwrap();
        desc.write(&[9], &AccessOptions::with_offset(4)).unwrap();
        assert_eq!(desc.value(), vec![1, 2, 0, 0, 9]);
    }

    #[test]
    fn test_rejected_write_keeps_value() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        desc.set_value(&[7]).unwrap();
        desc.set_write_provider(|_: &[u8], _: &AccessOptions| -> Result<(), GattError> {
            Err(GattError::NotPermitted("read only".into()))
        });

        let err = desc.write(&[1, 2, 3], &AccessOptions::default()).unwrap_err();
        assert!(matches!(err, GattError::Failed(_)));
        assert_eq!(desc.value(), vec![7]);
    }

    #[test]
    fn test_read_provider_overrides_value() {
        let desc = orphan(uuid::PRESENTATION_FORMAT);
        desc.set_value(&[1]).unwrap();
        desc.set_read_provider(|_: &AccessOptions| -> Result<Vec<u8>, GattError> {
            Ok(vec![0x04, 0x00])
        });
        assert_eq!(desc.read(&AccessOptions::default()).unwrap(), vec![0x04, 0x00]);
    }

    #[test]
    fn test_flags_follow_permissions() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        assert_eq!(desc.flags(), vec!["read", "write"]);

        let props = desc.properties();
        assert_eq!(
            props.get("UUID"),
            Some(&PropertyValue::from("00002901-0000-1000-8000-00805f9b34fb"))
        );
        assert_eq!(
            props.get("Characteristic").and_then(PropertyValue::as_path).map(ObjectPath::as_str),
            Some("/app/service0/char0")
        );
    }

    #[test]
    fn test_concurrent_offset_writes_are_not_lost() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        desc.set_value(&[0; 33]).unwrap();

        std::thread::scope(|scope| {
            for offset in 1..=32u8 {
                let desc = &desc;
                scope.spawn(move || {
                    desc.write(&[offset], &AccessOptions::with_offset(offset as usize))
                        .unwrap();
                });
            }
        });

        let expected: Vec<u8> = (0..=32).collect();
        assert_eq!(desc.value(), expected);
    }

    #[test]
    fn test_offset_past_limit_is_refused() {
        let desc = orphan(uuid::USER_DESCRIPTION);
        desc.set_value(&[1]).unwrap();
        let err = desc
            .write(&[2], &AccessOptions::with_offset(0xFFFF_FFFF))
            .unwrap_err();
        assert_eq!(err, GattError::InvalidOffset(0xFFFF_FFFF));
        assert_eq!(desc.value(), vec![1]);
    }

    #[test]
    fn test_orphan_cccd_stores_value() {
        let desc = orphan(uuid::CCCD);
        assert!(desc.is_cccd());
        desc.set_value(&[0x01, 0x00]).unwrap();
        assert_eq!(desc.value(), vec![0x01, 0x00]);
    }
}
