//! GATT application root and its registration with BlueZ
//!
//! Lifecycle: `Unpublished → Published → Registered`. Unregistering returns
//! to `Published`; unpublishing returns to `Unpublished`. The tree topology
//! is frozen from publication until unpublish, so every node BlueZ can see
//! is exported.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::free_child_path;
use super::service::Service;
use super::uuid::GattUuid;
use crate::bluez;
use crate::bus::{
    BusConnection, ExportedObject, InterfaceMap, ManagedObjects, ManagerCall, ObjectKind,
    ObjectPath, PropertyMap,
};
use crate::context::BusContext;
use crate::GattError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationState {
    /// Nothing exported
    Unpublished,
    /// Exported locally, not known to BlueZ
    Published,
    /// Registered with the GATT manager
    Registered,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpublished => write!(f, "Unpublished"),
            Self::Published => write!(f, "Published"),
            Self::Registered => write!(f, "Registered"),
        }
    }
}

pub struct Application {
    path: ObjectPath,
    services: RwLock<Vec<Arc<Service>>>,
    frozen: Arc<AtomicBool>,
    state: Mutex<ApplicationState>,
    /// Serializes register/unregister pairs
    registration: tokio::sync::Mutex<()>,
}

impl Application {
    pub fn new(path: ObjectPath) -> Arc<Self> {
        Arc::new(Self {
            path,
            services: RwLock::new(Vec::new()),
            frozen: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ApplicationState::Unpublished),
            registration: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn state(&self) -> ApplicationState {
        *self.state.lock()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == ApplicationState::Registered
    }

    // ============ TOPOLOGY ============

    /// Add a service, or return the existing one with the same identifier.
    pub fn create_service(
        self: &Arc<Self>,
        uuid: GattUuid,
        primary: bool,
    ) -> Result<Arc<Service>, GattError> {
        let mut services = self.services.write();
        if let Some(existing) = services.iter().find(|s| s.uuid() == uuid) {
            return Ok(existing.clone());
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(GattError::TopologyFrozen);
        }

        let path = free_child_path(&self.path, "service", services.iter().map(|s| s.path()))?;
        let service = Arc::new(Service::new(uuid, path, primary, self.frozen.clone()));
        services.push(service.clone());
        debug!("Service {} added under {}", uuid, self.path);
        Ok(service)
    }

    pub fn service(&self, uuid: &GattUuid) -> Option<Arc<Service>> {
        self.services
            .read()
            .iter()
            .find(|s| s.uuid() == *uuid)
            .cloned()
    }

    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().clone()
    }

    /// Drop a service from an unpublished tree.
    pub fn remove_service(&self, uuid: &GattUuid) -> Result<Option<Arc<Service>>, GattError> {
        if self.state() != ApplicationState::Unpublished {
            return Err(GattError::InvalidState(format!(
                "cannot remove a service while {}",
                self.state()
            )));
        }
        let mut services = self.services.write();
        let removed = services
            .iter()
            .position(|s| s.uuid() == *uuid)
            .map(|idx| services.remove(idx));
        Ok(removed)
    }

    /// The `GetManagedObjects` reply for this application: one entry per
    /// service, characteristic and descriptor.
    pub fn managed_objects(&self) -> ManagedObjects {
        let services = self.services.read();
        let mut objects = ManagedObjects::new();

        for service in services.iter() {
            objects.insert(
                service.path().clone(),
                interface_entry(bluez::GATT_SERVICE_IFACE, service.properties()),
            );
            for characteristic in service.characteristics() {
                objects.insert(
                    characteristic.path().clone(),
                    interface_entry(bluez::GATT_CHARACTERISTIC_IFACE, characteristic.properties()),
                );
                for descriptor in characteristic.descriptors() {
                    objects.insert(
                        descriptor.path().clone(),
                        interface_entry(bluez::GATT_DESCRIPTOR_IFACE, descriptor.properties()),
                    );
                }
            }
        }
        objects
    }

    // ============ PUBLICATION ============

    /// Export every node bottom-up, finishing with the root object manager.
    ///
    /// The topology freezes before the walk starts. A failure stops the walk;
    /// nodes exported before it stay exported until
    /// [`unpublish`](Self::unpublish) is called.
    pub async fn publish(self: &Arc<Self>, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        if self.is_registered() {
            return Err(GattError::InvalidState(
                "application is registered; unregister before publishing".to_string(),
            ));
        }

        self.frozen.store(true, Ordering::Release);
        if let Err(e) = self.export_tree(bus).await {
            if self.state() == ApplicationState::Unpublished {
                self.frozen.store(false, Ordering::Release);
            }
            return Err(e);
        }

        *self.state.lock() = ApplicationState::Published;
        info!(
            "Application published: {} ({} objects)",
            self.path,
            self.managed_objects().len()
        );
        Ok(())
    }

    async fn export_tree(self: &Arc<Self>, bus: &Arc<dyn BusConnection>) -> Result<(), GattError> {
        for service in self.services() {
            service.publish(bus).await?;
        }
        bus.export(&self.path, ExportedObject::Application(Arc::downgrade(self)))
            .await?;
        Ok(())
    }

    /// Remove every node from the bus, unregistering first if needed.
    pub async fn unpublish(&self, ctx: &BusContext) -> Result<(), GattError> {
        if self.is_registered() {
            if let Err(e) = self.unregister(ctx).await {
                warn!("Unregister before unpublish failed: {}", e);
            }
        }

        let bus = ctx.bus();
        bus.unexport(&self.path, ObjectKind::Application).await?;
        for service in self.services() {
            service.unpublish(bus).await?;
        }
        *self.state.lock() = ApplicationState::Unpublished;
        self.frozen.store(false, Ordering::Release);
        info!("Application unpublished: {}", self.path);
        Ok(())
    }

    /// Best-effort teardown: unregister and unpublish, logging failures.
    pub async fn shutdown(&self, ctx: &BusContext) {
        if self.state() == ApplicationState::Unpublished {
            return;
        }
        if let Err(e) = self.unpublish(ctx).await {
            warn!("Application shutdown incomplete for {}: {}", self.path, e);
        }
    }

    // ============ REGISTRATION ============

    /// Register with the adapter's GATT manager.
    ///
    /// If BlueZ still holds a registration for this path, the stale one is
    /// dropped and the call retried once after the configured delay.
    pub async fn register(&self, ctx: &BusContext) -> Result<(), GattError> {
        let _serial = self.registration.lock().await;

        match self.state() {
            ApplicationState::Unpublished => {
                return Err(GattError::InvalidState(
                    "application must be published before registration".to_string(),
                ))
            }
            ApplicationState::Registered => {
                debug!("Application already registered: {}", self.path);
                return Ok(());
            }
            ApplicationState::Published => {}
        }

        let options = ctx.options();
        let call = ManagerCall::RegisterApplication {
            path: self.path.clone(),
            options: PropertyMap::new(),
        };

        match ctx
            .bus()
            .call_manager(ctx.adapter_path(), call.clone(), options.timeout)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                warn!("Stale registration for {}, retrying once: {}", self.path, e);
                if let Err(e) = self.unregister_remote(ctx).await {
                    warn!("Clearing stale registration failed: {}", e);
                }
                tokio::time::sleep(options.retry_delay).await;
                ctx.bus()
                    .call_manager(ctx.adapter_path(), call, options.timeout)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        *self.state.lock() = ApplicationState::Registered;
        info!("Application registered: {} on {}", self.path, ctx.adapter_path());
        Ok(())
    }

    /// Unregister from the GATT manager.
    ///
    /// Local state is cleared even when the remote call fails.
    pub async fn unregister(&self, ctx: &BusContext) -> Result<(), GattError> {
        let _serial = self.registration.lock().await;

        if !self.is_registered() {
            debug!("Application not registered: {}", self.path);
            return Ok(());
        }

        let result = self.unregister_remote(ctx).await;

        *self.state.lock() = ApplicationState::Published;
        match &result {
            Ok(()) => info!("Application unregistered: {}", self.path),
            Err(e) => warn!("Application unregister failed for {}: {}", self.path, e),
        }
        result
    }

    async fn unregister_remote(&self, ctx: &BusContext) -> Result<(), GattError> {
        let call = ManagerCall::UnregisterApplication {
            path: self.path.clone(),
        };
        match ctx
            .bus()
            .call_manager(ctx.adapter_path(), call, ctx.options().unregister_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_does_not_exist() => {
                debug!("No registration to remove for {}", self.path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn interface_entry(interface: &str, properties: PropertyMap) -> InterfaceMap {
    let mut entry = InterfaceMap::new();
    entry.insert(interface.to_string(), properties);
    entry
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("services", &self.services.read().len())
            .finish()
    }
}
