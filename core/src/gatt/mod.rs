//! GATT object tree
//!
//! Application → Service → Characteristic → Descriptor. Parents own their
//! children; children keep a weak back-reference plus a copy of the parent's
//! object path. Each child takes the lowest index not used by a sibling:
//! `<root>/serviceN/charM/descK`.

mod application;
mod characteristic;
mod descriptor;
pub mod flags;
pub mod options;
pub mod provider;
mod service;
pub mod uuid;

pub use application::{Application, ApplicationState};
pub use characteristic::Characteristic;
pub use descriptor::Descriptor;
pub use flags::{CharacteristicFlags, Permissions};
pub use options::{AccessOptions, WriteKind};
pub use provider::{NotifyObserver, ReadProvider, WriteProvider};
pub use service::Service;
pub use uuid::GattUuid;

use std::collections::HashSet;

use crate::bus::ObjectPath;
use crate::GattError;

/// `<parent>/<prefix>N` for the lowest `N` no sibling holds
pub(crate) fn free_child_path<'a>(
    parent: &ObjectPath,
    prefix: &str,
    siblings: impl IntoIterator<Item = &'a ObjectPath>,
) -> Result<ObjectPath, GattError> {
    let taken: HashSet<&str> = siblings.into_iter().map(ObjectPath::name).collect();
    let index = (0..=taken.len())
        .find(|i| !taken.contains(format!("{}{}", prefix, i).as_str()))
        .unwrap_or(taken.len());
    Ok(parent.child(&format!("{}{}", prefix, index))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_child_path_fills_gaps() {
        let root = ObjectPath::new("/app").unwrap();
        let taken = vec![root.child("service0").unwrap(), root.child("service2").unwrap()];
        assert_eq!(
            free_child_path(&root, "service", &taken).unwrap().as_str(),
            "/app/service1"
        );

        let dense = vec![root.child("service0").unwrap(), root.child("service1").unwrap()];
        assert_eq!(
            free_child_path(&root, "service", &dense).unwrap().as_str(),
            "/app/service2"
        );
        assert_eq!(
            free_child_path(&root, "char", std::iter::empty()).unwrap().as_str(),
            "/app/char0"
        );
    }
}
