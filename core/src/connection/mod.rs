//! Remote device connection tracking

mod tracker;

pub use tracker::ConnectionTracker;

use crate::bus::{ObjectPath, PropertyValue};

/// Receives connection events from a [`ConnectionTracker`].
///
/// All methods default to no-ops.
pub trait ConnectionDelegate: Send + Sync {
    fn on_connected(&self, _address: &str, _path: &ObjectPath) {}

    fn on_disconnected(&self, _address: &str, _path: &ObjectPath) {}

    /// A `org.bluez.Device1` property changed on any device
    fn on_property_changed(
        &self,
        _path: &ObjectPath,
        _interface: &str,
        _property: &str,
        _value: &PropertyValue,
    ) {
    }
}
