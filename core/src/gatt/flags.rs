//! Characteristic properties and attribute permissions
//!
//! BlueZ takes both as string arrays (`Flags`); the bit values here follow the
//! Bluetooth characteristic properties field for the first eight bits.

use bitflags::bitflags;

use crate::GattError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicFlags: u32 {
        const BROADCAST = 0x0001;
        const READ = 0x0002;
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        const WRITE = 0x0008;
        const NOTIFY = 0x0010;
        const INDICATE = 0x0020;
        const AUTHENTICATED_SIGNED_WRITES = 0x0040;
        const EXTENDED_PROPERTIES = 0x0080;
        const RELIABLE_WRITE = 0x0100;
        const WRITABLE_AUXILIARIES = 0x0200;
        const ENCRYPT_READ = 0x0400;
        const ENCRYPT_WRITE = 0x0800;
        const ENCRYPT_AUTHENTICATED_READ = 0x1000;
        const ENCRYPT_AUTHENTICATED_WRITE = 0x2000;
    }
}

const CHARACTERISTIC_FLAG_NAMES: &[(CharacteristicFlags, &str)] = &[
    (CharacteristicFlags::BROADCAST, "broadcast"),
    (CharacteristicFlags::READ, "read"),
    (CharacteristicFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
    (CharacteristicFlags::WRITE, "write"),
    (CharacteristicFlags::NOTIFY, "notify"),
    (CharacteristicFlags::INDICATE, "indicate"),
    (CharacteristicFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
    (CharacteristicFlags::EXTENDED_PROPERTIES, "extended-properties"),
    (CharacteristicFlags::RELIABLE_WRITE, "reliable-write"),
    (CharacteristicFlags::WRITABLE_AUXILIARIES, "writable-auxiliaries"),
    (CharacteristicFlags::ENCRYPT_READ, "encrypt-read"),
    (CharacteristicFlags::ENCRYPT_WRITE, "encrypt-write"),
    (CharacteristicFlags::ENCRYPT_AUTHENTICATED_READ, "encrypt-authenticated-read"),
    (CharacteristicFlags::ENCRYPT_AUTHENTICATED_WRITE, "encrypt-authenticated-write"),
];

impl CharacteristicFlags {
    /// Wire flag strings in bit order
    pub fn to_strings(self) -> Vec<String> {
        CHARACTERISTIC_FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn from_flag_str(name: &str) -> Option<Self> {
        CHARACTERISTIC_FLAG_NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(flag, _)| *flag)
    }

    /// Combine a list of wire flag strings, rejecting unknown names.
    pub fn parse_list<I, S>(names: I) -> Result<Self, GattError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            let name = name.as_ref();
            Self::from_flag_str(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| GattError::UnknownFlag(name.to_string()))
        })
    }

    /// Notify or indicate is declared
    pub fn supports_notifications(self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const READ_ENCRYPTED = 0x04;
        const WRITE_ENCRYPTED = 0x08;
        const READ_AUTHENTICATED = 0x10;
        const WRITE_AUTHENTICATED = 0x20;
    }
}

const PERMISSION_FLAG_NAMES: &[(Permissions, &str)] = &[
    (Permissions::READ, "read"),
    (Permissions::WRITE, "write"),
    (Permissions::READ_ENCRYPTED, "encrypt-read"),
    (Permissions::WRITE_ENCRYPTED, "encrypt-write"),
    (Permissions::READ_AUTHENTICATED, "encrypt-authenticated-read"),
    (Permissions::WRITE_AUTHENTICATED, "encrypt-authenticated-write"),
];

impl Permissions {
    /// Descriptor `Flags` strings
    pub fn to_strings(self) -> Vec<String> {
        PERMISSION_FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn from_flag_str(name: &str) -> Option<Self> {
        PERMISSION_FLAG_NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(flag, _)| *flag)
    }

    pub fn parse_list<I, S>(names: I) -> Result<Self, GattError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            let name = name.as_ref();
            Self::from_flag_str(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| GattError::UnknownFlag(name.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_strings_in_bit_order() {
        let flags = CharacteristicFlags::NOTIFY | CharacteristicFlags::READ;
        assert_eq!(flags.to_strings(), vec!["read", "notify"]);

        let flags = CharacteristicFlags::ENCRYPT_AUTHENTICATED_WRITE
            | CharacteristicFlags::WRITE_WITHOUT_RESPONSE;
        assert_eq!(
            flags.to_strings(),
            vec!["write-without-response", "encrypt-authenticated-write"]
        );
        assert!(CharacteristicFlags::empty().to_strings().is_empty());
    }

    #[test]
    fn test_every_flag_has_a_name() {
        let all = CharacteristicFlags::all();
        assert_eq!(all.to_strings().len(), CHARACTERISTIC_FLAG_NAMES.len());
        assert_eq!(CharacteristicFlags::parse_list(all.to_strings()).unwrap(), all);
    }

    #[test]
    fn test_parse_list_rejects_unknown() {
        let err = CharacteristicFlags::parse_list(["read", "teleport"]).unwrap_err();
        assert_eq!(err, GattError::UnknownFlag("teleport".into()));
    }

    #[test]
    fn test_supports_notifications() {
        assert!(CharacteristicFlags::INDICATE.supports_notifications());
        assert!((CharacteristicFlags::READ | CharacteristicFlags::NOTIFY).supports_notifications());
        assert!(!CharacteristicFlags::READ.supports_notifications());
    }

    #[test]
    fn test_permission_strings() {
        let perms = Permissions::READ | Permissions::WRITE_AUTHENTICATED;
        assert_eq!(perms.to_strings(), vec!["read", "encrypt-authenticated-write"]);
        assert_eq!(
            Permissions::parse_list(["read", "write"]).unwrap(),
            Permissions::READ | Permissions::WRITE
        );
        assert!(Permissions::parse_list(["notify"]).is_err());
    }
}
