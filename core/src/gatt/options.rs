//! ReadValue/WriteValue option dictionaries

use crate::bluez;
use crate::bus::{ObjectPath, PropertyMap};
use crate::GattError;

/// How a remote write was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Command,
    Request,
    Reliable,
}

/// Options BlueZ passes with a read or write.
///
/// Unknown keys and keys with an unexpected type are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessOptions {
    pub offset: usize,
    /// Device object the request came from
    pub device: Option<ObjectPath>,
    pub mtu: Option<u16>,
    /// Link type, e.g. `LE` or `BR/EDR`
    pub link: Option<String>,
    pub write_kind: Option<WriteKind>,
    pub prepare_authorize: bool,
}

impl AccessOptions {
    pub fn with_offset(offset: usize) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn from_map(options: &PropertyMap) -> Self {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "offset" => {
                    if let Some(offset) = value.as_u32() {
                        parsed.offset = offset as usize;
                    }
                }
                "device" => parsed.device = value.as_path().cloned(),
                "mtu" => parsed.mtu = value.as_u32().and_then(|v| u16::try_from(v).ok()),
                "link" => parsed.link = value.as_str().map(str::to_string),
                "type" => {
                    parsed.write_kind = match value.as_str() {
                        Some("command") => Some(WriteKind::Command),
                        Some("request") => Some(WriteKind::Request),
                        Some("reliable") => Some(WriteKind::Reliable),
                        _ => None,
                    }
                }
                "prepare-authorize" => {
                    parsed.prepare_authorize = value.as_bool().unwrap_or(false);
                }
                _ => {}
            }
        }
        parsed
    }
}

/// Bytes `[offset, len)`, empty when the offset is past the end.
pub(crate) fn read_at(value: &[u8], offset: usize) -> Vec<u8> {
    value.get(offset..).map(<[u8]>::to_vec).unwrap_or_default()
}

/// Offsets past [`bluez::MAX_ATTRIBUTE_LEN`] are refused.
pub(crate) fn check_offset(offset: usize) -> Result<(), GattError> {
    if offset > bluez::MAX_ATTRIBUTE_LEN {
        return Err(GattError::InvalidOffset(offset));
    }
    Ok(())
}

/// Copy `bytes` in at `offset`, zero-extending the buffer as needed. A
/// refused offset leaves the buffer untouched.
pub(crate) fn write_at(buffer: &mut Vec<u8>, offset: usize, bytes: &[u8]) -> Result<(), GattError> {
    check_offset(offset)?;
    if offset == 0 {
        buffer.clear();
        buffer.extend_from_slice(bytes);
        return Ok(());
    }
    let end = offset + bytes.len();
    if buffer.len() < end {
        buffer.resize(end, 0);
    }
    buffer[offset..end].copy_from_slice(bytes);
    Ok(())
}
