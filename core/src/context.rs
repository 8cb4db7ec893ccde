//! Explicit bus context
//!
//! Holds what used to be process-wide state: the bus handle, the adapter the
//! managers live on, registration timing and the connection tracker. The
//! entry point builds one and passes it to every component that talks to
//! BlueZ.

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::Adapter;
use crate::bus::{BusConnection, ObjectPath};
use crate::connection::ConnectionTracker;

/// Default timeout for RegisterApplication/RegisterAdvertisement
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the unregister calls
pub const DEFAULT_UNREGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between dropping a stale registration and retrying
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOptions {
    pub timeout: Duration,
    pub unregister_timeout: Duration,
    pub retry_delay: Duration,
    /// Try the advertising fallback chain when RegisterAdvertisement fails
    pub enable_fallbacks: bool,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REGISTER_TIMEOUT,
            unregister_timeout: DEFAULT_UNREGISTER_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            enable_fallbacks: true,
        }
    }
}

#[derive(Clone)]
pub struct BusContext {
    bus: Arc<dyn BusConnection>,
    adapter_path: ObjectPath,
    options: RegistrationOptions,
    tracker: Arc<ConnectionTracker>,
}

impl BusContext {
    pub fn new(bus: Arc<dyn BusConnection>, adapter_path: ObjectPath) -> Self {
        Self {
            bus,
            adapter_path,
            options: RegistrationOptions::default(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn with_options(mut self, options: RegistrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bus(&self) -> &Arc<dyn BusConnection> {
        &self.bus
    }

    pub fn adapter_path(&self) -> &ObjectPath {
        &self.adapter_path
    }

    pub fn options(&self) -> &RegistrationOptions {
        &self.options
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn adapter(&self) -> Adapter {
        Adapter::new(self.bus.clone(), self.adapter_path.clone())
    }
}

impl std::fmt::Debug for BusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusContext")
            .field("adapter_path", &self.adapter_path)
            .field("options", &self.options)
            .finish()
    }
}
