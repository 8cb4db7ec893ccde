use std::fmt;
use std::str::FromStr;

use super::BusError;

/// A validated D-Bus object path.
///
/// Elements are `/`-separated and made of `[A-Za-z0-9_]`. The root path is
/// `/`; no other path may end with a slash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self, BusError> {
        let path = path.into();
        if is_valid(&path) {
            Ok(Self(path))
        } else {
            Err(BusError::InvalidPath(path))
        }
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Append one element, e.g. `/app` + `service0` = `/app/service0`.
    pub fn child(&self, element: &str) -> Result<Self, BusError> {
        if self.0 == "/" {
            Self::new(format!("/{}", element))
        } else {
            Self::new(format!("{}/{}", self.0, element))
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last element of the path, empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path[1..].split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ObjectPath {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = BusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(ObjectPath::new("/").is_ok());
        assert!(ObjectPath::new("/org/bluez/hci0").is_ok());
        assert!(ObjectPath::new("/com/gattkit/service0/char1").is_ok());

        assert!(ObjectPath::new("").is_err());
        assert!(ObjectPath::new("org/bluez").is_err());
        assert!(ObjectPath::new("/org/bluez/").is_err());
        assert!(ObjectPath::new("/org//bluez").is_err());
        assert!(ObjectPath::new("/org/blue-z").is_err());
    }

    #[test]
    fn test_child_and_parent() {
        let root = ObjectPath::root();
        let app = root.child("gattkit").expect("valid child");
        assert_eq!(app.as_str(), "/gattkit");

        let service = app.child("service0").expect("valid child");
        assert_eq!(service.as_str(), "/gattkit/service0");
        assert_eq!(service.name(), "service0");
        assert_eq!(service.parent(), Some(app.clone()));
        assert_eq!(app.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);

        assert!(app.child("bad name").is_err());
    }

    #[test]
    fn test_descendants() {
        let app = ObjectPath::new("/app").unwrap();
        let service = ObjectPath::new("/app/service0").unwrap();
        let sibling = ObjectPath::new("/application").unwrap();

        assert!(service.is_descendant_of(&app));
        assert!(!sibling.is_descendant_of(&app));
        assert!(!app.is_descendant_of(&app));
        assert!(app.is_descendant_of(&ObjectPath::root()));
    }
}
