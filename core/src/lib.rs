// GattKit Core — BLE GATT peripheral object model
//
// Models Service → Characteristic → Descriptor trees, publishes them on the
// system bus and registers them with BlueZ. Advertising and connection
// tracking live alongside the tree but have their own lifecycles.

pub mod adapter;
pub mod advertising;
pub mod bluez;
pub mod bus;
pub mod connection;
pub mod context;
pub mod gatt;
pub mod peripheral;

use thiserror::Error;

pub use adapter::Adapter;
pub use advertising::{Advertisement, AdvertisementData, AdvertisementType, AdvertisingMode};
pub use bus::{BusConnection, BusError, ObjectPath, PropertyMap, PropertyValue};
pub use connection::{ConnectionDelegate, ConnectionTracker};
pub use context::{BusContext, RegistrationOptions};
pub use gatt::{
    AccessOptions, Application, ApplicationState, Characteristic, CharacteristicFlags, Descriptor,
    GattUuid, Permissions, Service,
};
pub use peripheral::{Peripheral, PeripheralState};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Malformed identifier: {0:?}")]
    MalformedIdentifier(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Operation not permitted: {0}")]
    NotPermitted(String),
    #[error("Operation failed: {0}")]
    Failed(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Topology is frozen while the application is published")]
    TopologyFrozen,
    #[error("Offset {0} is past the attribute length limit")]
    InvalidOffset(usize),
    #[error("Unknown flag: {0}")]
    UnknownFlag(String),
    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),
    #[error("All advertising methods failed")]
    AdvertisingUnavailable,
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl GattError {
    /// BlueZ error name sent back to a remote caller for this error
    pub fn dbus_name(&self) -> &'static str {
        match self {
            Self::NotSupported(_) => bluez::ERROR_NOT_SUPPORTED,
            Self::NotPermitted(_) | Self::TopologyFrozen => bluez::ERROR_NOT_PERMITTED,
            Self::MalformedIdentifier(_) | Self::UnknownFlag(_) => bluez::ERROR_INVALID_ARGUMENTS,
            Self::InvalidOffset(_) => bluez::ERROR_INVALID_OFFSET,
            Self::InvalidState(_) => bluez::ERROR_IN_PROGRESS,
            Self::AdapterNotFound(_) => bluez::ERROR_DOES_NOT_EXIST,
            Self::Failed(_) | Self::AdvertisingUnavailable | Self::Bus(_) => bluez::ERROR_FAILED,
        }
    }

    /// Collapse a provider error into a generic failure, keeping its message.
    pub(crate) fn into_failure(self) -> Self {
        match self {
            Self::Failed(reason) => Self::Failed(reason),
            other => Self::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbus_error_names() {
        assert_eq!(
            GattError::NotSupported("notify".into()).dbus_name(),
            "org.bluez.Error.NotSupported"
        );
        assert_eq!(GattError::Failed("x".into()).dbus_name(), "org.bluez.Error.Failed");
        assert_eq!(GattError::TopologyFrozen.dbus_name(), "org.bluez.Error.NotPermitted");
        assert_eq!(GattError::InvalidOffset(600).dbus_name(), "org.bluez.Error.InvalidOffset");
    }

    #[test]
    fn test_into_failure_keeps_message() {
        let err = GattError::NotPermitted("locked".into()).into_failure();
        assert_eq!(err, GattError::Failed("Operation not permitted: locked".into()));

        let err = GattError::Failed("refused".into()).into_failure();
        assert_eq!(err, GattError::Failed("refused".into()));
    }
}
