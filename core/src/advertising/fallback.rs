//! Ways to get the radio advertising when RegisterAdvertisement fails
//!
//! Each step is independent and best-effort. The advertisement tries them in
//! order and stops at the first that succeeds.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::adapter::Adapter;
use crate::context::BusContext;
use crate::GattError;

/// Upper bound for one helper process
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Script fed to `bluetoothctl` to switch advertising on
const BLUETOOTHCTL_SCRIPT: &str = "menu advertise\non\nback\n";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvertisingFallback: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enable(&self) -> Result<(), GattError>;
}

/// `bluetoothctl` advertise menu
pub struct BluetoothctlScript;

#[async_trait]
impl AdvertisingFallback for BluetoothctlScript {
    fn name(&self) -> &'static str {
        "bluetoothctl"
    }

    async fn enable(&self) -> Result<(), GattError> {
        run_command("bluetoothctl", &[], Some(BLUETOOTHCTL_SCRIPT)).await
    }
}

/// `hciconfig <dev> leadv 3`: non-connectable undirected advertising through
/// the legacy HCI interface
pub struct LegacyLeAdvertise {
    device: String,
}

impl LegacyLeAdvertise {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

#[async_trait]
impl AdvertisingFallback for LegacyLeAdvertise {
    fn name(&self) -> &'static str {
        "hciconfig"
    }

    async fn enable(&self) -> Result<(), GattError> {
        run_command("hciconfig", &[&self.device, "leadv", "3"], None).await
    }
}

/// Power the adapter on and make it discoverable
pub struct AdapterDiscoverable {
    adapter: Adapter,
}

impl AdapterDiscoverable {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl AdvertisingFallback for AdapterDiscoverable {
    fn name(&self) -> &'static str {
        "adapter-discoverable"
    }

    async fn enable(&self) -> Result<(), GattError> {
        self.adapter.power_on().await?;
        self.adapter.set_discoverable(true).await
    }
}

/// The standard chain for the context's adapter
pub fn default_chain(ctx: &BusContext) -> Vec<Arc<dyn AdvertisingFallback>> {
    vec![
        Arc::new(BluetoothctlScript),
        Arc::new(LegacyLeAdvertise::new(ctx.adapter_path().name())),
        Arc::new(AdapterDiscoverable::new(ctx.adapter())),
    ]
}

async fn run_command(program: &str, args: &[&str], input: Option<&str>) -> Result<(), GattError> {
    debug!("Running {} {:?}", program, args);
    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| GattError::Failed(format!("{}: {}", program, e)))?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| GattError::Failed(format!("{} stdin: {}", program, e)))?;
    }

    let status = tokio::time::timeout(COMMAND_TIMEOUT, child.wait())
        .await
        .map_err(|_| GattError::Failed(format!("{} timed out", program)))?
        .map_err(|e| GattError::Failed(format!("{}: {}", program, e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(GattError::Failed(format!("{} exited with {}", program, status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluez;
    use crate::bus::mock::MockBus;
    use crate::bus::{ObjectPath, PropertyValue};

    #[test]
    fn test_default_chain_order() {
        let bus = MockBus::new();
        let ctx = BusContext::new(bus, ObjectPath::new("/org/bluez/hci1").unwrap());
        let names: Vec<_> = default_chain(&ctx).iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["bluetoothctl", "hciconfig", "adapter-discoverable"]);
    }

    #[tokio::test]
    async fn test_adapter_discoverable_powers_on_first() {
        let bus = MockBus::new();
        let hci0 = ObjectPath::new("/org/bluez/hci0").unwrap();
        bus.set_remote_property(&hci0, bluez::ADAPTER_IFACE, "Powered", PropertyValue::Bool(false));

        let step = AdapterDiscoverable::new(Adapter::new(bus.clone(), hci0.clone()));
        step.enable().await.unwrap();

        assert_eq!(
            bus.remote_property(&hci0, bluez::ADAPTER_IFACE, "Powered"),
            Some(PropertyValue::Bool(true))
        );
        assert_eq!(
            bus.remote_property(&hci0, bluez::ADAPTER_IFACE, "Discoverable"),
            Some(PropertyValue::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_adapter_discoverable_reports_failure() {
        let bus = MockBus::new();
        bus.fail_property("Powered");
        let step = AdapterDiscoverable::new(Adapter::new(
            bus,
            ObjectPath::new("/org/bluez/hci0").unwrap(),
        ));
        assert!(step.enable().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let result = run_command("gattkit-no-such-helper", &[], Some("on\n")).await;
        assert!(matches!(result, Err(GattError::Failed(_))));
    }
}
