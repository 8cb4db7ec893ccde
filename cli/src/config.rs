// Configuration management for the GattKit CLI
//
// Cross-platform config stored in:
// - Linux: ~/.config/gattkit/config.json
// - macOS: ~/Library/Application Support/gattkit/config.json
//
// Scalar settings are editable through `gattkit config set`; the GATT
// profile (services, characteristics, descriptors) is edited in the file.

use anyhow::{Context, Result};
use gattkit_core::RegistrationOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter name (hci0) or full object path
    pub adapter: String,

    /// Alias set on the adapter and advertised as the local name
    pub device_name: String,

    /// Object path the GATT application is published under
    pub application_path: String,

    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,

    /// Directory for a daily rolling log file
    pub log_dir: Option<String>,

    /// Register an LE advertisement alongside the application
    pub advertise: bool,

    pub registration_timeout_secs: u64,

    pub retry_delay_ms: u64,

    /// Try bluetoothctl / hciconfig / Discoverable when BlueZ refuses
    pub enable_fallbacks: bool,

    pub advertisement: AdvertisementConfig,

    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisementConfig {
    /// Overrides device_name in the advertising payload
    pub local_name: Option<String>,
    pub discoverable: bool,
    pub include_tx_power: bool,
    pub appearance: Option<u16>,
    pub duration: Option<u16>,
    pub timeout: Option<u16>,
    /// Company identifier → hex payload
    pub manufacturer_data: BTreeMap<u16, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub uuid: String,
    #[serde(default = "default_primary")]
    pub primary: bool,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    pub uuid: String,
    pub flags: Vec<String>,
    /// Initial value as hex
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub descriptors: Vec<DescriptorConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorConfig {
    pub uuid: String,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub value: String,
}

fn default_primary() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: "hci0".to_string(),
            device_name: "GattKit".to_string(),
            application_path: "/com/gattkit".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
            advertise: true,
            registration_timeout_secs: 10,
            retry_delay_ms: 500,
            enable_fallbacks: true,
            advertisement: AdvertisementConfig::default(),
            services: default_services(),
        }
    }
}

impl Default for AdvertisementConfig {
    fn default() -> Self {
        Self {
            local_name: None,
            discoverable: true,
            include_tx_power: false,
            appearance: None,
            duration: None,
            timeout: None,
            manufacturer_data: BTreeMap::new(),
        }
    }
}

/// Battery service plus one read/write/notify custom service
fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            uuid: "180F".to_string(),
            primary: true,
            characteristics: vec![CharacteristicConfig {
                uuid: "2A19".to_string(),
                flags: vec!["read".to_string(), "notify".to_string()],
                value: "64".to_string(),
                descriptors: Vec::new(),
            }],
        },
        ServiceConfig {
            uuid: "11111111-2222-3333-4444-555555555555".to_string(),
            primary: true,
            characteristics: vec![CharacteristicConfig {
                uuid: "11111111-2222-3333-4444-666666666666".to_string(),
                flags: vec![
                    "read".to_string(),
                    "write".to_string(),
                    "notify".to_string(),
                ],
                value: "11223344".to_string(),
                descriptors: vec![DescriptorConfig {
                    uuid: "2901".to_string(),
                    permissions: vec!["read".to_string()],
                    value: hex::encode("GattKit custom value"),
                }],
            }],
        },
    ]
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("gattkit");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it on first use
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Timeouts and fallback switches handed to the bus context
    pub fn registration_options(&self) -> RegistrationOptions {
        RegistrationOptions {
            timeout: Duration::from_secs(self.registration_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            enable_fallbacks: self.enable_fallbacks,
            ..RegistrationOptions::default()
        }
    }

    /// Name placed in the advertising payload
    pub fn advertised_name(&self) -> &str {
        self.advertisement
            .local_name
            .as_deref()
            .unwrap_or(&self.device_name)
    }

    /// Update a scalar key in memory; call `save` to persist
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "adapter" => self.adapter = value.to_string(),
            "device_name" => self.device_name = value.to_string(),
            "application_path" => {
                gattkit_core::ObjectPath::new(value).context("Invalid object path")?;
                self.application_path = value.to_string();
            }
            "log_level" => self.log_level = value.to_string(),
            "log_dir" => self.log_dir = optional(value),
            "advertise" => {
                self.advertise = value.parse().context("Invalid boolean value")?;
            }
            "registration_timeout_secs" => {
                self.registration_timeout_secs = value.parse().context("Invalid number")?;
            }
            "retry_delay_ms" => {
                self.retry_delay_ms = value.parse().context("Invalid number")?;
            }
            "enable_fallbacks" => {
                self.enable_fallbacks = value.parse().context("Invalid boolean value")?;
            }
            "advertisement.local_name" => self.advertisement.local_name = optional(value),
            "advertisement.discoverable" => {
                self.advertisement.discoverable =
                    value.parse().context("Invalid boolean value")?;
            }
            "advertisement.include_tx_power" => {
                self.advertisement.include_tx_power =
                    value.parse().context("Invalid boolean value")?;
            }
            "advertisement.appearance" => {
                self.advertisement.appearance = parse_optional_u16(value)?;
            }
            "advertisement.duration" => {
                self.advertisement.duration = parse_optional_u16(value)?;
            }
            "advertisement.timeout" => {
                self.advertisement.timeout = parse_optional_u16(value)?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all scalar config values
    pub fn list(&self) -> Vec<(String, String)> {
        let unset = || "(unset)".to_string();
        let adv = &self.advertisement;
        vec![
            ("adapter".to_string(), self.adapter.clone()),
            ("device_name".to_string(), self.device_name.clone()),
            ("application_path".to_string(), self.application_path.clone()),
            ("log_level".to_string(), self.log_level.clone()),
            ("log_dir".to_string(), self.log_dir.clone().unwrap_or_else(unset)),
            ("advertise".to_string(), self.advertise.to_string()),
            (
                "registration_timeout_secs".to_string(),
                self.registration_timeout_secs.to_string(),
            ),
            ("retry_delay_ms".to_string(), self.retry_delay_ms.to_string()),
            ("enable_fallbacks".to_string(), self.enable_fallbacks.to_string()),
            (
                "advertisement.local_name".to_string(),
                adv.local_name.clone().unwrap_or_else(unset),
            ),
            (
                "advertisement.discoverable".to_string(),
                adv.discoverable.to_string(),
            ),
            (
                "advertisement.include_tx_power".to_string(),
                adv.include_tx_power.to_string(),
            ),
            (
                "advertisement.appearance".to_string(),
                adv.appearance
                    .map(|a| format!("0x{:04x}", a))
                    .unwrap_or_else(unset),
            ),
            (
                "advertisement.duration".to_string(),
                adv.duration.map(|d| format!("{}s", d)).unwrap_or_else(unset),
            ),
            (
                "advertisement.timeout".to_string(),
                adv.timeout.map(|t| format!("{}s", t)).unwrap_or_else(unset),
            ),
        ]
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Empty clears; `0x` prefix reads hex
fn parse_optional_u16(value: &str) -> Result<Option<u16>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(digits) => u16::from_str_radix(digits, 16),
        None => value.parse(),
    };
    Ok(Some(parsed.context("Invalid number")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.adapter, "hci0");
        assert_eq!(config.application_path, "/com/gattkit");
        assert!(config.advertise);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].characteristics[0].value, "64");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.device_name, "GattKit");
    }

    #[test]
    fn test_apply_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        config.apply("device_name", "Thermo").unwrap();
        config.apply("advertisement.appearance", "0x0341").unwrap();
        config.apply("retry_delay_ms", "250").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.device_name, "Thermo");
        assert_eq!(reloaded.advertisement.appearance, Some(0x0341));
        assert_eq!(
            reloaded.registration_options().retry_delay,
            Duration::from_millis(250)
        );
        assert_eq!(
            reloaded.get("advertisement.appearance").as_deref(),
            Some("0x0341")
        );
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.apply("advertise", "maybe").is_err());
        assert!(config.apply("application_path", "no/leading/slash").is_err());
        assert!(config.apply("listen_port", "1").is_err());
        assert_eq!(config.application_path, "/com/gattkit");
    }

    #[test]
    fn test_empty_value_clears_optional() {
        let mut config = Config::default();
        config.apply("log_dir", "/tmp/gattkit").unwrap();
        assert_eq!(config.get("log_dir").as_deref(), Some("/tmp/gattkit"));
        config.apply("log_dir", "").unwrap();
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"adapter": "hci1"}"#).unwrap();
        assert_eq!(config.adapter, "hci1");
        assert_eq!(config.registration_timeout_secs, 10);
        assert_eq!(config.advertised_name(), "GattKit");
    }
}
