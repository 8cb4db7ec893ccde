use std::collections::BTreeMap;

use super::ObjectPath;

/// Property name → value
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Interface name → properties
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Object path → interfaces, the shape of `GetManagedObjects`
pub type ManagedObjects = BTreeMap<ObjectPath, InterfaceMap>;

/// Values that cross the bus as variant properties.
///
/// Only the shapes BlueZ uses for GATT, advertising, adapter and device
/// objects are represented; anything else is dropped on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Byte(u8),
    U16(u16),
    I16(i16),
    U32(u32),
    Str(String),
    Path(ObjectPath),
    Bytes(Vec<u8>),
    StrList(Vec<String>),
    PathList(Vec<ObjectPath>),
    /// `a{qv}` with byte-array values (manufacturer data)
    U16KeyedBytes(BTreeMap<u16, Vec<u8>>),
    /// `a{sv}` with byte-array values (service data)
    StrKeyedBytes(BTreeMap<String, Vec<u8>>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            Self::Path(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(v) => Some(v),
            _ => None,
        }
    }

    /// Unsigned integer view, widening `y`, `q` and `u`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Byte(v) => Some(u32::from(*v)),
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<i16> for PropertyValue {
    fn from(v: i16) -> Self {
        Self::I16(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<ObjectPath> for PropertyValue {
    fn from(v: ObjectPath) -> Self {
        Self::Path(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<Vec<ObjectPath>> for PropertyValue {
    fn from(v: Vec<ObjectPath>) -> Self {
        Self::PathList(v)
    }
}
