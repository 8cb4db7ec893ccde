use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fallback::AdvertisingFallback;
use crate::bus::{BusConnection, ExportedObject, ManagerCall, ObjectKind, ObjectPath, PropertyMap};
use crate::context::BusContext;
use crate::gatt::GattUuid;
use crate::GattError;

pub const INCLUDE_LOCAL_NAME: &str = "local-name";
pub const INCLUDE_TX_POWER: &str = "tx-power";
pub const INCLUDE_APPEARANCE: &str = "appearance";
pub const INCLUDE_SERVICE_UUIDS: &str = "service-uuids";

/// `Appearance` value BlueZ reads as "not set"
pub const APPEARANCE_UNSET: u16 = 0xFFFF;

/// `TxPower` value meaning no preference
pub const TX_POWER_NO_PREFERENCE: i16 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvertisementType {
    #[default]
    Peripheral,
    Broadcast,
}

impl AdvertisementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peripheral => "peripheral",
            Self::Broadcast => "broadcast",
        }
    }
}

/// How advertising ended up enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingMode {
    /// RegisterAdvertisement succeeded
    Registered,
    /// A fallback step enabled advertising outside the manager
    Fallback(&'static str),
}

impl fmt::Display for AdvertisingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered with BlueZ"),
            Self::Fallback(step) => write!(f, "fallback ({})", step),
        }
    }
}

/// Advertising payload description.
///
/// Setting a field that BlueZ needs an include for (local name, appearance,
/// tx power, service identifiers) adds that include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    pub kind: AdvertisementType,
    local_name: Option<String>,
    service_uuids: Vec<GattUuid>,
    solicit_uuids: Vec<GattUuid>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    service_data: BTreeMap<GattUuid, Vec<u8>>,
    includes: Vec<String>,
    appearance: Option<u16>,
    duration: Option<u16>,
    timeout: Option<u16>,
    tx_power: Option<i16>,
    pub discoverable: bool,
}

impl Default for AdvertisementData {
    fn default() -> Self {
        Self {
            kind: AdvertisementType::Peripheral,
            local_name: None,
            service_uuids: Vec::new(),
            solicit_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            includes: Vec::new(),
            appearance: None,
            duration: None,
            timeout: None,
            tx_power: None,
            discoverable: true,
        }
    }
}

impl AdvertisementData {
    pub fn new(kind: AdvertisementType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn set_local_name(&mut self, name: impl Into<String>) {
        self.local_name = Some(name.into());
        self.add_include(INCLUDE_LOCAL_NAME);
    }

    pub fn service_uuids(&self) -> &[GattUuid] {
        &self.service_uuids
    }

    /// Add a service identifier; duplicates are ignored.
    pub fn add_service_uuid(&mut self, uuid: GattUuid) {
        if !self.service_uuids.contains(&uuid) {
            self.service_uuids.push(uuid);
        }
        self.add_include(INCLUDE_SERVICE_UUIDS);
    }

    pub fn solicit_uuids(&self) -> &[GattUuid] {
        &self.solicit_uuids
    }

    pub fn add_solicit_uuid(&mut self, uuid: GattUuid) {
        if !self.solicit_uuids.contains(&uuid) {
            self.solicit_uuids.push(uuid);
        }
    }

    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    pub fn set_manufacturer_data(&mut self, company_id: u16, data: Vec<u8>) {
        self.manufacturer_data.insert(company_id, data);
    }

    pub fn service_data(&self) -> &BTreeMap<GattUuid, Vec<u8>> {
        &self.service_data
    }

    pub fn set_service_data(&mut self, uuid: GattUuid, data: Vec<u8>) {
        self.service_data.insert(uuid, data);
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn add_include(&mut self, include: &str) {
        if !self.includes.iter().any(|i| i == include) {
            self.includes.push(include.to_string());
        }
    }

    pub fn appearance(&self) -> Option<u16> {
        self.appearance
    }

    /// Set the GAP appearance; 0 (unknown) clears it.
    pub fn set_appearance(&mut self, appearance: u16) {
        if appearance == 0 {
            self.appearance = None;
            self.includes.retain(|i| i != INCLUDE_APPEARANCE);
        } else {
            self.appearance = Some(appearance);
            self.add_include(INCLUDE_APPEARANCE);
        }
    }

    pub fn duration(&self) -> Option<u16> {
        self.duration
    }

    pub fn set_duration(&mut self, seconds: u16) {
        self.duration = Some(seconds);
    }

    pub fn timeout(&self) -> Option<u16> {
        self.timeout
    }

    pub fn set_timeout(&mut self, seconds: u16) {
        self.timeout = Some(seconds);
    }

    pub fn tx_power(&self) -> Option<i16> {
        self.tx_power
    }

    /// Request a transmit power and include it in the payload.
    pub fn set_tx_power(&mut self, dbm: i16) {
        self.tx_power = Some(dbm);
        self.add_include(INCLUDE_TX_POWER);
    }
}

/// An LE advertisement, registered independently of the GATT application.
pub struct Advertisement {
    path: ObjectPath,
    data: RwLock<AdvertisementData>,
    registered: AtomicBool,
    published: AtomicBool,
    fallbacks: Mutex<Vec<Arc<dyn AdvertisingFallback>>>,
    registration: tokio::sync::Mutex<()>,
}

impl Advertisement {
    pub fn new(path: ObjectPath, data: AdvertisementData) -> Arc<Self> {
        Arc::new(Self {
            path,
            data: RwLock::new(data),
            registered: AtomicBool::new(false),
            published: AtomicBool::new(false),
            fallbacks: Mutex::new(Vec::new()),
            registration: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn data(&self) -> AdvertisementData {
        self.data.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Change the payload. Only allowed while unregistered.
    pub fn configure(&self, update: impl FnOnce(&mut AdvertisementData)) -> Result<(), GattError> {
        if self.is_registered() {
            return Err(GattError::InvalidState(
                "advertisement can only be changed while unregistered".to_string(),
            ));
        }
        update(&mut *self.data.write());
        Ok(())
    }

    /// Steps tried, in order, when RegisterAdvertisement fails
    pub fn set_fallbacks(&self, fallbacks: Vec<Arc<dyn AdvertisingFallback>>) {
        *self.fallbacks.lock() = fallbacks;
    }

    /// BlueZ dropped the advertisement on its side.
    pub fn release(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            info!("Advertisement released by BlueZ: {}", self.path);
        }
    }

    pub async fn publish(self: &Arc<Self>, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        bus.export(&self.path, ExportedObject::Advertisement(Arc::downgrade(self)))
            .await?;
        self.published.store(true, Ordering::Release);
        debug!("Advertisement published: {}", self.path);
        Ok(())
    }

    pub async fn unpublish(&self, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        self.published.store(false, Ordering::Release);
        bus.unexport(&self.path, ObjectKind::Advertisement).await?;
        Ok(())
    }

    /// Register with the advertising manager, falling back to the configured
    /// steps if the manager refuses.
    pub async fn register(&self, ctx: &BusContext) -> Result<AdvertisingMode, GattError> {
        let _serial = self.registration.lock().await;

        if self.is_registered() {
            return Ok(AdvertisingMode::Registered);
        }
        if !self.is_published() {
            return Err(GattError::InvalidState(
                "advertisement must be published before registration".to_string(),
            ));
        }

        let err = match self.register_remote(ctx).await {
            Ok(()) => {
                self.registered.store(true, Ordering::Release);
                info!("Advertisement registered: {}", self.path);
                return Ok(AdvertisingMode::Registered);
            }
            Err(e) => e,
        };

        warn!("RegisterAdvertisement failed for {}: {}", self.path, err);
        let fallbacks = self.fallbacks.lock().clone();
        if !ctx.options().enable_fallbacks || fallbacks.is_empty() {
            return Err(err);
        }

        for step in fallbacks {
            match step.enable().await {
                Ok(()) => {
                    info!("Advertising enabled via {}", step.name());
                    return Ok(AdvertisingMode::Fallback(step.name()));
                }
                Err(e) => warn!("Advertising fallback {} failed: {}", step.name(), e),
            }
        }
        Err(GattError::AdvertisingUnavailable)
    }

    async fn register_remote(&self, ctx: &BusContext) -> Result<(), GattError> {
        let options = ctx.options();
        let call = ManagerCall::RegisterAdvertisement {
            path: self.path.clone(),
            options: PropertyMap::new(),
        };
        match ctx
            .bus()
            .call_manager(ctx.adapter_path(), call.clone(), options.timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                warn!("Stale advertisement for {}, retrying once", self.path);
                if let Err(e) = self.unregister_remote(ctx).await {
                    warn!("Clearing stale advertisement failed: {}", e);
                }
                tokio::time::sleep(options.retry_delay).await;
                Ok(ctx
                    .bus()
                    .call_manager(ctx.adapter_path(), call, options.timeout)
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unregister from the advertising manager. Local state is cleared even
    /// when the remote call fails.
    pub async fn unregister(&self, ctx: &BusContext) -> Result<(), GattError> {
        let _serial = self.registration.lock().await;

        if !self.is_registered() {
            return Ok(());
        }
        let result = self.unregister_remote(ctx).await;
        self.registered.store(false, Ordering::Release);
        match &result {
            Ok(()) => info!("Advertisement unregistered: {}", self.path),
            Err(e) => warn!("Advertisement unregister failed for {}: {}", self.path, e),
        }
        result
    }

    async fn unregister_remote(&self, ctx: &BusContext) -> Result<(), GattError> {
        let call = ManagerCall::UnregisterAdvertisement {
            path: self.path.clone(),
        };
        match ctx
            .bus()
            .call_manager(ctx.adapter_path(), call, ctx.options().unregister_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_does_not_exist() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for Advertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advertisement")
            .field("path", &self.path)
            .field("registered", &self.is_registered())
            .field("data", &*self.data.read())
            .finish()
    }
}
