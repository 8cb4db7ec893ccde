// Profile builder — turns the configured services into a GATT tree and an
// advertisement.

use crate::config::{CharacteristicConfig, Config, ServiceConfig};
use anyhow::{Context, Result};
use gattkit_core::gatt::uuid;
use gattkit_core::{
    Advertisement, AdvertisementData, AdvertisementType, Application, Characteristic,
    CharacteristicFlags, GattUuid, ObjectPath, Permissions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Build the application tree described by `config.services`.
pub fn build_application(config: &Config) -> Result<Arc<Application>> {
    let path = ObjectPath::new(&config.application_path)
        .with_context(|| format!("Invalid application path {}", config.application_path))?;
    let app = Application::new(path);

    for service_config in &config.services {
        add_service(&app, service_config)
            .with_context(|| format!("Invalid service {}", service_config.uuid))?;
    }

    info!(
        "Profile built: {} service(s) under {}",
        app.services().len(),
        app.path()
    );
    Ok(app)
}

fn add_service(app: &Arc<Application>, config: &ServiceConfig) -> Result<()> {
    let service = app.create_service(GattUuid::parse(&config.uuid)?, config.primary)?;

    for chr_config in &config.characteristics {
        let chr = add_characteristic(&service, chr_config)
            .with_context(|| format!("Invalid characteristic {}", chr_config.uuid))?;
        debug!("Characteristic {} at {}", chr.uuid(), chr.path());
    }
    Ok(())
}

fn add_characteristic(
    service: &Arc<gattkit_core::Service>,
    config: &CharacteristicConfig,
) -> Result<Arc<Characteristic>> {
    let flags = CharacteristicFlags::parse_list(&config.flags)?;
    let chr =
        service.create_characteristic(GattUuid::parse(&config.uuid)?, flags, permissions_for(flags))?;
    chr.set_value(&decode_hex(&config.value)?);

    for desc_config in &config.descriptors {
        let permissions = Permissions::parse_list(&desc_config.permissions)?;
        let desc = chr.create_descriptor(GattUuid::parse(&desc_config.uuid)?, permissions)?;
        desc.set_value(&decode_hex(&desc_config.value)?)?;
    }
    Ok(chr)
}

/// Attribute permissions implied by the declared properties
fn permissions_for(flags: CharacteristicFlags) -> Permissions {
    let mut permissions = Permissions::empty();
    if flags.contains(CharacteristicFlags::READ) {
        permissions |= Permissions::READ;
    }
    if flags.intersects(CharacteristicFlags::WRITE | CharacteristicFlags::WRITE_WITHOUT_RESPONSE) {
        permissions |= Permissions::WRITE;
    }
    if flags.contains(CharacteristicFlags::ENCRYPT_READ) {
        permissions |= Permissions::READ_ENCRYPTED;
    }
    if flags.contains(CharacteristicFlags::ENCRYPT_WRITE) {
        permissions |= Permissions::WRITE_ENCRYPTED;
    }
    if flags.contains(CharacteristicFlags::ENCRYPT_AUTHENTICATED_READ) {
        permissions |= Permissions::READ_AUTHENTICATED;
    }
    if flags.contains(CharacteristicFlags::ENCRYPT_AUTHENTICATED_WRITE) {
        permissions |= Permissions::WRITE_AUTHENTICATED;
    }
    permissions
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).with_context(|| format!("Invalid hex value {:?}", value))
}

/// Advertisement at `<app>/advertisement0` carrying every service identifier.
pub fn build_advertisement(config: &Config, app: &Application) -> Result<Arc<Advertisement>> {
    let adv_config = &config.advertisement;
    let mut data = AdvertisementData::new(AdvertisementType::Peripheral);

    data.set_local_name(config.advertised_name());
    for service in app.services() {
        data.add_service_uuid(service.uuid());
    }
    data.discoverable = adv_config.discoverable;
    if adv_config.include_tx_power {
        data.add_include(gattkit_core::advertising::INCLUDE_TX_POWER);
    }
    if let Some(appearance) = adv_config.appearance {
        data.set_appearance(appearance);
    }
    if let Some(duration) = adv_config.duration {
        data.set_duration(duration);
    }
    if let Some(timeout) = adv_config.timeout {
        data.set_timeout(timeout);
    }
    for (company, payload) in &adv_config.manufacturer_data {
        data.set_manufacturer_data(*company, decode_hex(payload)?);
    }

    let path = app.path().child("advertisement0")?;
    Ok(Advertisement::new(path, data))
}

// ============================================================================
// BATTERY SIMULATOR
// ============================================================================

pub const SIMULATION_PERIOD: Duration = Duration::from_secs(10);
const LEVEL_STEP: u8 = 5;
const LEVEL_MIN: u8 = 20;
const LEVEL_MAX: u8 = 100;

/// Sawtooth between `LEVEL_MIN` and `LEVEL_MAX`. Starts downwards unless
/// already at the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryCycle {
    level: u8,
    falling: bool,
}

impl BatteryCycle {
    pub fn new(level: u8) -> Self {
        let level = level.clamp(LEVEL_MIN, LEVEL_MAX);
        Self {
            level,
            falling: level > LEVEL_MIN,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Advance one step and return the new level
    pub fn step(&mut self) -> u8 {
        if self.falling {
            self.level = self.level.saturating_sub(LEVEL_STEP).max(LEVEL_MIN);
            if self.level == LEVEL_MIN {
                self.falling = false;
            }
        } else {
            self.level = self.level.saturating_add(LEVEL_STEP).min(LEVEL_MAX);
            if self.level == LEVEL_MAX {
                self.falling = true;
            }
        }
        self.level
    }
}

/// Battery level characteristic, if the profile has one
pub fn battery_level(app: &Application) -> Option<Arc<Characteristic>> {
    app.service(&uuid::BATTERY_SERVICE)?
        .characteristic(&uuid::BATTERY_LEVEL)
}

/// Spawn a task stepping the battery level every `period`.
pub fn spawn_battery_simulator(chr: Arc<Characteristic>, period: Duration) -> JoinHandle<()> {
    let start = chr.value().first().copied().unwrap_or(LEVEL_MAX);
    tokio::spawn(async move {
        let mut cycle = BatteryCycle::new(start);
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let level = cycle.step();
            chr.set_value(&[level]);
            debug!("Battery level {}%", level);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DescriptorConfig;

    #[test]
    fn test_default_profile_builds() {
        let config = Config::default();
        let app = build_application(&config).unwrap();

        let services = app.services();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].path().as_str(), "/com/gattkit/service0");

        let level = battery_level(&app).unwrap();
        assert_eq!(level.value(), vec![100]);
        assert_eq!(
            level.flags(),
            CharacteristicFlags::READ | CharacteristicFlags::NOTIFY
        );
        assert_eq!(level.permissions(), Permissions::READ);

        let custom = services[1].characteristics()[0].clone();
        assert_eq!(custom.value(), vec![0x11, 0x22, 0x33, 0x44]);
        assert_eq!(
            custom.permissions(),
            Permissions::READ | Permissions::WRITE
        );
        let description = custom.descriptor(&uuid::USER_DESCRIPTION).unwrap();
        assert_eq!(description.value(), b"GattKit custom value".to_vec());
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let mut config = Config::default();
        config.services[0].characteristics[0]
            .flags
            .push("teleport".to_string());

        let err = build_application(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("teleport"));
    }

    #[test]
    fn test_bad_hex_is_rejected() {
        let mut config = Config::default();
        config.services[1].characteristics[0].descriptors = vec![DescriptorConfig {
            uuid: "2901".to_string(),
            permissions: vec!["read".to_string()],
            value: "zz".to_string(),
        }];
        assert!(build_application(&config).is_err());
    }

    #[test]
    fn test_advertisement_lists_services() {
        let mut config = Config::default();
        config.advertisement.local_name = Some("Sensor".to_string());
        config.advertisement.appearance = Some(0x00C0);
        config.advertisement.manufacturer_data.insert(0xFFFF, "0x0102".to_string());

        let app = build_application(&config).unwrap();
        let adv = build_advertisement(&config, &app).unwrap();
        assert_eq!(adv.path().as_str(), "/com/gattkit/advertisement0");

        let data = adv.data();
        assert_eq!(data.local_name(), Some("Sensor"));
        assert_eq!(data.service_uuids().len(), 2);
        assert_eq!(data.service_uuids()[0], uuid::BATTERY_SERVICE);
        assert_eq!(data.appearance(), Some(0x00C0));
        assert_eq!(data.manufacturer_data().get(&0xFFFF), Some(&vec![1, 2]));
    }

    #[test]
    fn test_battery_cycle_bounces() {
        let mut cycle = BatteryCycle::new(100);
        let falling: Vec<u8> = (0..16).map(|_| cycle.step()).collect();
        assert_eq!(falling[0], 95);
        assert_eq!(falling[15], 20);

        assert_eq!(cycle.step(), 25);
        for _ in 0..15 {
            cycle.step();
        }
        assert_eq!(cycle.level(), 100);
        assert_eq!(cycle.step(), 95);
    }

    #[test]
    fn test_battery_cycle_clamps_start() {
        assert_eq!(BatteryCycle::new(3).level(), 20);
        assert_eq!(BatteryCycle::new(250).level(), 100);
    }

    #[test]
    fn test_battery_cycle_from_floor_rises() {
        let mut cycle = BatteryCycle::new(LEVEL_MIN);
        assert_eq!(cycle.step(), 25);

        let mut clamped = BatteryCycle::new(3);
        assert_eq!(clamped.step(), 25);
        assert_eq!(clamped.step(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_updates_level() {
        let app = build_application(&Config::default()).unwrap();
        let level = battery_level(&app).unwrap();

        let handle = spawn_battery_simulator(level.clone(), SIMULATION_PERIOD);
        tokio::time::sleep(SIMULATION_PERIOD * 2 + Duration::from_millis(1)).await;
        handle.abort();

        assert_eq!(level.value(), vec![90]);
    }
}
