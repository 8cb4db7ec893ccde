//! BlueZ wire names
//!
//! Interface, member and error names are part of the BlueZ D-Bus contract and
//! must match exactly.

/// Well-known bus name of the BlueZ daemon
pub const SERVICE: &str = "org.bluez";

/// Default adapter object path
pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";

/// Longest attribute value BlueZ accepts
pub const MAX_ATTRIBUTE_LEN: usize = 512;

// ============ INTERFACES ============

pub const GATT_SERVICE_IFACE: &str = "org.bluez.GattService1";
pub const GATT_CHARACTERISTIC_IFACE: &str = "org.bluez.GattCharacteristic1";
pub const GATT_DESCRIPTOR_IFACE: &str = "org.bluez.GattDescriptor1";
pub const GATT_MANAGER_IFACE: &str = "org.bluez.GattManager1";
pub const ADVERTISEMENT_IFACE: &str = "org.bluez.LEAdvertisement1";
pub const ADVERTISING_MANAGER_IFACE: &str = "org.bluez.LEAdvertisingManager1";
pub const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_IFACE: &str = "org.bluez.Device1";
pub const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

// ============ MEMBERS ============

pub const REGISTER_APPLICATION: &str = "RegisterApplication";
pub const UNREGISTER_APPLICATION: &str = "UnregisterApplication";
pub const REGISTER_ADVERTISEMENT: &str = "RegisterAdvertisement";
pub const UNREGISTER_ADVERTISEMENT: &str = "UnregisterAdvertisement";
pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
pub const GET_MANAGED_OBJECTS: &str = "GetManagedObjects";

// ============ PROPERTIES ============

pub const PROP_UUID: &str = "UUID";
pub const PROP_PRIMARY: &str = "Primary";
pub const PROP_SERVICE: &str = "Service";
pub const PROP_CHARACTERISTIC: &str = "Characteristic";
pub const PROP_CHARACTERISTICS: &str = "Characteristics";
pub const PROP_DESCRIPTORS: &str = "Descriptors";
pub const PROP_VALUE: &str = "Value";
pub const PROP_NOTIFYING: &str = "Notifying";
pub const PROP_FLAGS: &str = "Flags";

pub const PROP_POWERED: &str = "Powered";
pub const PROP_DISCOVERABLE: &str = "Discoverable";
pub const PROP_DISCOVERABLE_TIMEOUT: &str = "DiscoverableTimeout";
pub const PROP_ALIAS: &str = "Alias";
pub const PROP_ADDRESS: &str = "Address";
pub const PROP_CONNECTED: &str = "Connected";

// ============ ERRORS ============

pub const ERROR_FAILED: &str = "org.bluez.Error.Failed";
pub const ERROR_NOT_SUPPORTED: &str = "org.bluez.Error.NotSupported";
pub const ERROR_NOT_PERMITTED: &str = "org.bluez.Error.NotPermitted";
pub const ERROR_INVALID_ARGUMENTS: &str = "org.bluez.Error.InvalidArguments";
pub const ERROR_INVALID_OFFSET: &str = "org.bluez.Error.InvalidOffset";
pub const ERROR_IN_PROGRESS: &str = "org.bluez.Error.InProgress";
pub const ERROR_ALREADY_EXISTS: &str = "org.bluez.Error.AlreadyExists";
pub const ERROR_DOES_NOT_EXIST: &str = "org.bluez.Error.DoesNotExist";
