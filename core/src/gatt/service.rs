use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::characteristic::Characteristic;
use super::free_child_path;
use super::flags::{CharacteristicFlags, Permissions};
use super::uuid::GattUuid;
use crate::bluez;
use crate::bus::{BusConnection, ExportedObject, ObjectKind, ObjectPath, PropertyMap, PropertyValue};
use crate::GattError;

/// A primary or secondary GATT service.
pub struct Service {
    uuid: GattUuid,
    path: ObjectPath,
    primary: bool,
    characteristics: RwLock<Vec<Arc<Characteristic>>>,
    frozen: Arc<AtomicBool>,
    published: AtomicBool,
}

impl Service {
    pub(crate) fn new(
        uuid: GattUuid,
        path: ObjectPath,
        primary: bool,
        frozen: Arc<AtomicBool>,
    ) -> Self {
        Self {
            uuid,
            path,
            primary,
            characteristics: RwLock::new(Vec::new()),
            frozen,
            published: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> GattUuid {
        self.uuid
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Add a characteristic, or return the existing one with the same
    /// identifier. The flags and permissions of an existing characteristic
    /// are left unchanged.
    pub fn create_characteristic(
        self: &Arc<Self>,
        uuid: GattUuid,
        flags: CharacteristicFlags,
        permissions: Permissions,
    ) -> Result<Arc<Characteristic>, GattError> {
        let mut characteristics = self.characteristics.write();
        if let Some(existing) = characteristics.iter().find(|c| c.uuid() == uuid) {
            return Ok(existing.clone());
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(GattError::TopologyFrozen);
        }

        let path = free_child_path(&self.path, "char", characteristics.iter().map(|c| c.path()))?;
        let characteristic = Arc::new(Characteristic::new(
            uuid,
            path,
            Arc::downgrade(self),
            self.path.clone(),
            flags,
            permissions,
            self.frozen.clone(),
        ));
        characteristics.push(characteristic.clone());
        debug!("Characteristic {} added under {}", uuid, self.path);
        Ok(characteristic)
    }

    pub fn characteristic(&self, uuid: &GattUuid) -> Option<Arc<Characteristic>> {
        self.characteristics
            .read()
            .iter()
            .find(|c| c.uuid() == *uuid)
            .cloned()
    }

    pub fn characteristics(&self) -> Vec<Arc<Characteristic>> {
        self.characteristics.read().clone()
    }

    /// Object paths of the characteristics, in creation order
    pub fn characteristic_paths(&self) -> Vec<ObjectPath> {
        self.characteristics
            .read()
            .iter()
            .map(|c| c.path().clone())
            .collect()
    }

    pub(crate) fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(
            bluez::PROP_UUID.to_string(),
            PropertyValue::Str(self.uuid.to_display_string()),
        );
        props.insert(bluez::PROP_PRIMARY.to_string(), PropertyValue::Bool(self.primary));
        props
    }

    pub(crate) async fn publish(
        self: &Arc<Self>,
        bus: &Arc<dyn BusConnection>,
    ) -> Result<(), GattError> {
        for characteristic in self.characteristics() {
            characteristic.publish(bus).await?;
        }
        bus.export(&self.path, ExportedObject::Service(Arc::downgrade(self)))
            .await?;
        self.published.store(true, Ordering::Release);
        debug!("Service published: {} ({})", self.path, self.uuid);
        Ok(())
    }

    pub(crate) async fn unpublish(&self, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        self.published.store(false, Ordering::Release);
        bus.unexport(&self.path, ObjectKind::Service).await?;
        for characteristic in self.characteristics() {
            characteristic.unpublish(bus).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("uuid", &self.uuid)
            .field("path", &self.path)
            .field("primary", &self.primary)
            .finish()
    }
}
