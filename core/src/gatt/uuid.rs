//! Attribute identifiers
//!
//! Every GATT attribute is named by a 128-bit UUID. Standard attributes use
//! 16- or 32-bit aliases that expand against the Bluetooth base UUID
//! `00000000-0000-1000-8000-00805f9b34fb`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

use crate::GattError;

/// Bluetooth base UUID
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

const BASE_MASK: u128 = (1u128 << 96) - 1;

/// Width of the form an identifier was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UuidWidth {
    Bits16,
    Bits32,
    Bits128,
}

/// Canonical attribute identifier.
///
/// Equality, ordering and hashing use the 128-bit value only, so `"2902"`,
/// `"00002902"` and the full dashed form all compare equal.
#[derive(Debug, Clone, Copy)]
pub struct GattUuid {
    value: Uuid,
    width: UuidWidth,
}

impl GattUuid {
    /// Parse a 4-, 8- or 32-hex-digit identifier.
    ///
    /// Non-hex characters (dashes, braces, spaces) are dropped before the
    /// digits are counted.
    pub fn parse(input: &str) -> Result<Self, GattError> {
        let digits: String = input
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let malformed = || GattError::MalformedIdentifier(input.to_string());
        match digits.len() {
            4 => u16::from_str_radix(&digits, 16)
                .map(Self::from_u16)
                .map_err(|_| malformed()),
            8 => u32::from_str_radix(&digits, 16)
                .map(Self::from_u32)
                .map_err(|_| malformed()),
            32 => u128::from_str_radix(&digits, 16)
                .map(Self::from_u128)
                .map_err(|_| malformed()),
            _ => Err(malformed()),
        }
    }

    pub const fn from_u16(short: u16) -> Self {
        Self {
            value: Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)),
            width: UuidWidth::Bits16,
        }
    }

    pub const fn from_u32(medium: u32) -> Self {
        Self {
            value: Uuid::from_u128(BLUETOOTH_BASE_UUID | ((medium as u128) << 96)),
            width: UuidWidth::Bits32,
        }
    }

    pub const fn from_u128(value: u128) -> Self {
        Self {
            value: Uuid::from_u128(value),
            width: UuidWidth::Bits128,
        }
    }

    pub fn width(&self) -> UuidWidth {
        self.width
    }

    pub fn as_u128(&self) -> u128 {
        self.value.as_u128()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.value
    }

    /// Whether the identifier lies on the Bluetooth base UUID
    pub fn is_base_derived(&self) -> bool {
        self.as_u128() & BASE_MASK == BLUETOOTH_BASE_UUID
    }

    /// 16-bit alias, when the identifier has one
    pub fn short(&self) -> Option<u16> {
        self.medium().and_then(|v| u16::try_from(v).ok())
    }

    /// 32-bit alias, when the identifier has one
    pub fn medium(&self) -> Option<u32> {
        if self.is_base_derived() {
            Some((self.as_u128() >> 96) as u32)
        } else {
            None
        }
    }

    /// Dashed lowercase form, e.g. `00002902-0000-1000-8000-00805f9b34fb`
    pub fn to_display_string(&self) -> String {
        self.value.hyphenated().to_string()
    }

    /// Dash-free lowercase form, e.g. `0000290200001000800000805f9b34fb`
    pub fn to_wire_string(&self) -> String {
        self.value.simple().to_string()
    }
}

impl PartialEq for GattUuid {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for GattUuid {}

impl Hash for GattUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for GattUuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GattUuid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for GattUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value.hyphenated())
    }
}

impl FromStr for GattUuid {
    type Err = GattError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u16> for GattUuid {
    fn from(short: u16) -> Self {
        Self::from_u16(short)
    }
}

impl From<Uuid> for GattUuid {
    fn from(value: Uuid) -> Self {
        Self::from_u128(value.as_u128())
    }
}

impl Serialize for GattUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_display_string())
    }
}

impl<'de> Deserialize<'de> for GattUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ============ STANDARD IDENTIFIERS ============

pub const EXTENDED_PROPERTIES: GattUuid = GattUuid::from_u16(0x2900);
pub const USER_DESCRIPTION: GattUuid = GattUuid::from_u16(0x2901);
/// Client Characteristic Configuration Descriptor
pub const CCCD: GattUuid = GattUuid::from_u16(0x2902);
pub const SERVER_CONFIGURATION: GattUuid = GattUuid::from_u16(0x2903);
pub const PRESENTATION_FORMAT: GattUuid = GattUuid::from_u16(0x2904);
pub const AGGREGATE_FORMAT: GattUuid = GattUuid::from_u16(0x2905);

pub const DEVICE_INFORMATION_SERVICE: GattUuid = GattUuid::from_u16(0x180A);
pub const BATTERY_SERVICE: GattUuid = GattUuid::from_u16(0x180F);
pub const DEVICE_NAME: GattUuid = GattUuid::from_u16(0x2A00);
pub const BATTERY_LEVEL: GattUuid = GattUuid::from_u16(0x2A19);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_form() {
        let uuid = GattUuid::parse("2902").expect("valid short form");
        assert_eq!(uuid.to_display_string(), "00002902-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid.to_wire_string(), "0000290200001000800000805f9b34fb");
        assert_eq!(uuid.width(), UuidWidth::Bits16);
        assert_eq!(uuid.short(), Some(0x2902));
        assert_eq!(uuid, CCCD);
    }

    #[test]
    fn test_medium_form() {
        let uuid = GattUuid::parse("ABCD1234").expect("valid medium form");
        assert_eq!(uuid.to_display_string(), "abcd1234-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid.medium(), Some(0xabcd_1234));
        assert_eq!(uuid.short(), None);
    }

    #[test]
    fn test_full_form_with_and_without_dashes() {
        let dashed = GattUuid::parse("11111111-2222-3333-4444-555555555555").unwrap();
        let bare = GattUuid::parse("11111111222233334444555555555555").unwrap();
        assert_eq!(dashed, bare);
        assert_eq!(dashed.width(), UuidWidth::Bits128);
        assert_eq!(dashed.medium(), None);
        assert!(!dashed.is_base_derived());
    }

    #[test]
    fn test_full_form_of_standard_uuid_has_alias() {
        let uuid = GattUuid::parse("0000180F-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(uuid, BATTERY_SERVICE);
        assert_eq!(uuid.short(), Some(0x180f));
    }

    #[test]
    fn test_malformed() {
        for input in ["", "123", "12345", "xyz", "1234567890", "0x180f"] {
            assert!(
                matches!(GattUuid::parse(input), Err(GattError::MalformedIdentifier(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&BATTERY_LEVEL).unwrap();
        assert_eq!(json, "\"00002a19-0000-1000-8000-00805f9b34fb\"");
        let back: GattUuid = serde_json::from_str("\"2a19\"").unwrap();
        assert_eq!(back, BATTERY_LEVEL);
        assert!(serde_json::from_str::<GattUuid>("\"nope\"").is_err());
    }

    fn separated(hex: &str, upper: bool) -> String {
        let cased = if upper {
            hex.to_ascii_uppercase()
        } else {
            hex.to_string()
        };
        if cased.len() == 32 {
            format!(
                "{{{}-{}-{}-{}-{}}}",
                &cased[..8],
                &cased[8..12],
                &cased[12..16],
                &cased[16..20],
                &cased[20..]
            )
        } else {
            cased
        }
    }

    proptest! {
        #[test]
        fn prop_separators_and_case_do_not_change_identity(
            hex in prop_oneof!["[0-9a-f]{4}", "[0-9a-f]{8}", "[0-9a-f]{32}"],
            upper in any::<bool>(),
        ) {
            let plain = GattUuid::parse(&hex).unwrap();
            let decorated = GattUuid::parse(&separated(&hex, upper)).unwrap();
            prop_assert_eq!(plain.to_wire_string(), decorated.to_wire_string());
            prop_assert_eq!(plain.to_wire_string().len(), 32);
            prop_assert_eq!(
                GattUuid::parse(&plain.to_display_string()).unwrap(),
                plain
            );
        }
    }
}
