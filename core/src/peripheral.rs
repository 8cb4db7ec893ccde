//! Peripheral lifecycle
//!
//! Brings a GATT application, an optional advertisement and connection
//! tracking up and down as one unit on a single adapter.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::advertising::{default_chain, Advertisement, AdvertisingMode};
use crate::context::BusContext;
use crate::gatt::Application;
use crate::GattError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeripheralState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

pub struct Peripheral {
    context: BusContext,
    application: Arc<Application>,
    advertisement: Option<Arc<Advertisement>>,
    alias: Option<String>,
    state: RwLock<PeripheralState>,
    mode: RwLock<Option<AdvertisingMode>>,
    /// Serializes start/stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl Peripheral {
    pub fn new(context: BusContext, application: Arc<Application>) -> Self {
        Self {
            context,
            application,
            advertisement: None,
            alias: None,
            state: RwLock::new(PeripheralState::Stopped),
            mode: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_advertisement(mut self, advertisement: Arc<Advertisement>) -> Self {
        self.advertisement = Some(advertisement);
        self
    }

    /// Adapter alias to set on start
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn context(&self) -> &BusContext {
        &self.context
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn advertisement(&self) -> Option<&Arc<Advertisement>> {
        self.advertisement.as_ref()
    }

    pub fn state(&self) -> PeripheralState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PeripheralState::Running
    }

    /// How the radio is advertising, if it is
    pub fn advertising_mode(&self) -> Option<AdvertisingMode> {
        *self.mode.read()
    }

    /// Power the adapter, publish and register everything, then start
    /// tracking connections.
    ///
    /// Advertising failures are logged and leave the peripheral running
    /// without advertising. Any other failure rolls back what was done and
    /// leaves the peripheral stopped.
    pub async fn start(&self) -> Result<(), GattError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state() != PeripheralState::Stopped {
            return Err(GattError::InvalidState(format!(
                "peripheral is {}",
                self.state()
            )));
        }
        *self.state.write() = PeripheralState::Starting;
        info!("Peripheral starting on {}", self.context.adapter_path());

        match self.bring_up().await {
            Ok(()) => {
                *self.state.write() = PeripheralState::Running;
                info!("Peripheral running: {}", self.application.path());
                Ok(())
            }
            Err(e) => {
                warn!("Peripheral start failed: {}", e);
                *self.state.write() = PeripheralState::Stopping;
                if let Err(rollback) = self.tear_down().await {
                    warn!("Rollback after failed start incomplete: {}", rollback);
                }
                *self.state.write() = PeripheralState::Stopped;
                Err(e)
            }
        }
    }

    /// Undo [`start`](Self::start). Every step runs even if an earlier one
    /// fails; the first failure is returned and the peripheral ends stopped.
    pub async fn stop(&self) -> Result<(), GattError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state() == PeripheralState::Stopped {
            return Ok(());
        }
        *self.state.write() = PeripheralState::Stopping;
        info!("Peripheral stopping");

        let result = self.tear_down().await;
        *self.state.write() = PeripheralState::Stopped;
        info!("Peripheral stopped");
        result
    }

    async fn bring_up(&self) -> Result<(), GattError> {
        let ctx = &self.context;
        let adapter = ctx.adapter();
        adapter.power_on().await?;

        if let Some(alias) = &self.alias {
            if let Err(e) = adapter.set_alias(alias).await {
                warn!("Failed to set adapter alias to {}: {}", alias, e);
            }
        }

        self.application.publish(ctx.bus()).await?;
        self.application.register(ctx).await?;

        if let Some(advertisement) = &self.advertisement {
            advertisement.set_fallbacks(default_chain(ctx));
            advertisement.publish(ctx.bus()).await?;
            match advertisement.register(ctx).await {
                Ok(mode) => {
                    info!("Advertising: {}", mode);
                    *self.mode.write() = Some(mode);
                }
                Err(e) => warn!("Continuing without advertising: {}", e),
            }
        }

        ctx.tracker().initialize(ctx.bus().clone()).await
    }

    async fn tear_down(&self) -> Result<(), GattError> {
        let ctx = &self.context;
        let mut first_error: Option<GattError> = None;
        let mut record = |result: Result<(), GattError>, step: &str| {
            if let Err(e) = result {
                warn!("Peripheral stop: {} failed: {}", step, e);
                first_error.get_or_insert(e);
            }
        };

        ctx.tracker().shutdown().await;

        if let Some(advertisement) = &self.advertisement {
            record(advertisement.unregister(ctx).await, "advertisement unregister");
            if advertisement.is_published() {
                record(advertisement.unpublish(ctx.bus()).await, "advertisement unpublish");
            }
        }
        *self.mode.write() = None;

        record(self.application.unregister(ctx).await, "application unregister");
        // Also runs after a partial publish, which leaves the state Unpublished
        record(self.application.unpublish(ctx).await, "application unpublish");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral")
            .field("application", &self.application.path())
            .field("state", &self.state())
            .field("mode", &self.advertising_mode())
            .finish()
    }
}
