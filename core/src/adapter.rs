//! Adapter helpers
//!
//! Thin wrappers over `org.bluez.Adapter1` properties, plus adapter
//! discovery through BlueZ's object manager.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::bluez;
use crate::bus::{BusConnection, ObjectPath, PropertyValue};
use crate::GattError;

/// Settle time after powering the adapter on
const POWER_ON_SETTLE: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct Adapter {
    bus: Arc<dyn BusConnection>,
    path: ObjectPath,
}

impl Adapter {
    pub fn new(bus: Arc<dyn BusConnection>, path: ObjectPath) -> Self {
        Self { bus, path }
    }

    /// Find an adapter by name (`hci0`), falling back to the first one BlueZ
    /// reports.
    pub async fn locate(bus: Arc<dyn BusConnection>, name: &str) -> Result<Self, GattError> {
        let objects = bus.managed_objects().await?;
        let adapters: Vec<&ObjectPath> = objects
            .iter()
            .filter(|(_, interfaces)| interfaces.contains_key(bluez::ADAPTER_IFACE))
            .map(|(path, _)| path)
            .collect();

        let chosen = adapters
            .iter()
            .find(|path| path.name() == name)
            .or_else(|| adapters.first())
            .map(|path| (*path).clone())
            .ok_or_else(|| GattError::AdapterNotFound(name.to_string()))?;

        if chosen.name() != name {
            info!("Adapter {} not found, using {}", name, chosen);
        }
        Ok(Self::new(bus, chosen))
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    async fn get(&self, name: &str) -> Result<PropertyValue, GattError> {
        Ok(self
            .bus
            .get_property(&self.path, bluez::ADAPTER_IFACE, name)
            .await?)
    }

    async fn set(&self, name: &str, value: PropertyValue) -> Result<(), GattError> {
        debug!("Adapter {} set {} = {:?}", self.path, name, value);
        Ok(self
            .bus
            .set_property(&self.path, bluez::ADAPTER_IFACE, name, value)
            .await?)
    }

    async fn get_bool(&self, name: &str) -> Result<bool, GattError> {
        self.get(name).await?.as_bool().ok_or_else(|| {
            GattError::Failed(format!("adapter property {} is not a boolean", name))
        })
    }

    async fn get_string(&self, name: &str) -> Result<String, GattError> {
        self.get(name)
            .await?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GattError::Failed(format!("adapter property {} is not a string", name)))
    }

    pub async fn is_powered(&self) -> Result<bool, GattError> {
        self.get_bool(bluez::PROP_POWERED).await
    }

    pub async fn set_powered(&self, powered: bool) -> Result<(), GattError> {
        self.set(bluez::PROP_POWERED, PropertyValue::Bool(powered)).await
    }

    /// Power the adapter on if it is off, then give it a moment to settle.
    pub async fn power_on(&self) -> Result<(), GattError> {
        if self.is_powered().await? {
            return Ok(());
        }
        self.set_powered(true).await?;
        tokio::time::sleep(POWER_ON_SETTLE).await;
        info!("Adapter powered on: {}", self.path);
        Ok(())
    }

    pub async fn is_discoverable(&self) -> Result<bool, GattError> {
        self.get_bool(bluez::PROP_DISCOVERABLE).await
    }

    pub async fn set_discoverable(&self, discoverable: bool) -> Result<(), GattError> {
        self.set(bluez::PROP_DISCOVERABLE, PropertyValue::Bool(discoverable))
            .await
    }

    /// Seconds the adapter stays discoverable; 0 means forever
    pub async fn set_discoverable_timeout(&self, seconds: u32) -> Result<(), GattError> {
        self.set(bluez::PROP_DISCOVERABLE_TIMEOUT, PropertyValue::U32(seconds))
            .await
    }

    pub async fn alias(&self) -> Result<String, GattError> {
        self.get_string(bluez::PROP_ALIAS).await
    }

    pub async fn set_alias(&self, alias: &str) -> Result<(), GattError> {
        self.set(bluez::PROP_ALIAS, PropertyValue::from(alias)).await
    }

    pub async fn address(&self) -> Result<String, GattError> {
        self.get_string(bluez::PROP_ADDRESS).await
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::bus::PropertyMap;

    fn path(p: &str) -> ObjectPath {
        ObjectPath::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_locate_prefers_named_adapter() {
        let bus = MockBus::new();
        bus.add_managed_object(&path("/org/bluez/hci0"), bluez::ADAPTER_IFACE, PropertyMap::new());
        bus.add_managed_object(&path("/org/bluez/hci1"), bluez::ADAPTER_IFACE, PropertyMap::new());
        bus.add_managed_object(
            &path("/org/bluez/hci1/dev_00_11_22_33_44_55"),
            bluez::DEVICE_IFACE,
            PropertyMap::new(),
        );

        let adapter = Adapter::locate(bus.clone(), "hci1").await.unwrap();
        assert_eq!(adapter.path().as_str(), "/org/bluez/hci1");

        let fallback = Adapter::locate(bus, "hci7").await.unwrap();
        assert_eq!(fallback.path().as_str(), "/org/bluez/hci0");
    }

    #[tokio::test]
    async fn test_locate_without_adapters() {
        let bus = MockBus::new();
        let err = Adapter::locate(bus, "hci0").await.unwrap_err();
        assert_eq!(err, GattError::AdapterNotFound("hci0".into()));
    }

    #[tokio::test]
    async fn test_power_on_only_when_off() {
        let bus = MockBus::new();
        let hci0 = path("/org/bluez/hci0");
        bus.set_remote_property(&hci0, bluez::ADAPTER_IFACE, "Powered", PropertyValue::Bool(false));

        let adapter = Adapter::new(bus.clone(), hci0.clone());
        adapter.power_on().await.unwrap();
        assert!(adapter.is_powered().await.unwrap());
    }

    #[tokio::test]
    async fn test_alias_and_discoverable() {
        let bus = MockBus::new();
        let hci0 = path("/org/bluez/hci0");
        let adapter = Adapter::new(bus.clone(), hci0.clone());

        adapter.set_alias("GattKit").await.unwrap();
        adapter.set_discoverable(true).await.unwrap();
        adapter.set_discoverable_timeout(0).await.unwrap();

        assert_eq!(adapter.alias().await.unwrap(), "GattKit");
        assert!(adapter.is_discoverable().await.unwrap());
        assert_eq!(
            bus.remote_property(&hci0, bluez::ADAPTER_IFACE, "DiscoverableTimeout"),
            Some(PropertyValue::U32(0))
        );
    }
}
