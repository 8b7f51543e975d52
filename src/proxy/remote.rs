use std::fmt;

use crate::protocol::names::{check_bus_name, check_interface_name};
use crate::protocol::{ObjectPath, Result};

/// Names a remote object: where it lives and which interface calls default to.
///
/// A lookup key only; it owns no state on either side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObjectRef {
    destination: Option<String>,
    path: ObjectPath,
    interface: Option<String>,
    auto_start: bool,
}

impl RemoteObjectRef {
    /// Object at `path` owned by `destination` (unique or well-known name).
    pub fn new(destination: &str, path: &str) -> Result<Self> {
        check_bus_name(destination)?;
        Ok(Self {
            destination: Some(destination.to_owned()),
            path: ObjectPath::new(path)?,
            interface: None,
            auto_start: true,
        })
    }

    /// Object at `path` on the other end of a direct connection.
    pub fn peer(path: &str) -> Result<Self> {
        Ok(Self {
            destination: None,
            path: ObjectPath::new(path)?,
            interface: None,
            auto_start: false,
        })
    }

    /// Default interface for calls.
    pub fn with_interface(mut self, interface: &str) -> Result<Self> {
        check_interface_name(interface)?;
        self.interface = Some(interface.to_owned());
        Ok(self)
    }

    /// Let the bus start the destination if it is not running.
    #[must_use]
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Bus name calls are addressed to; `None` on a direct connection.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Object path.
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Default interface, if one was given.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Whether calls may start the destination.
    #[must_use]
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }
}

impl fmt::Display for RemoteObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.destination.as_deref().unwrap_or("<peer>"), self.path)?;
        if let Some(interface) = &self.interface {
            write!(f, " ({interface})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_validates() {
        let target = RemoteObjectRef::new("org.example.Service", "/org/example/Obj")
            .unwrap()
            .with_interface("org.example.Iface")
            .unwrap();
        assert_eq!(target.destination(), Some("org.example.Service"));
        assert_eq!(target.interface(), Some("org.example.Iface"));
        assert!(target.auto_start());
        assert_eq!(target.to_string(), "org.example.Service:/org/example/Obj (org.example.Iface)");

        assert!(RemoteObjectRef::new("not a name", "/x").is_err());
        assert!(RemoteObjectRef::new("org.example.S", "no-slash").is_err());
        assert!(target.clone().with_interface("bad").is_err());
    }

    #[test]
    fn peer_refs_have_no_destination() {
        let target = RemoteObjectRef::peer("/Test").unwrap();
        assert_eq!(target.destination(), None);
        assert!(!target.auto_start());
        assert_eq!(target.to_string(), "<peer>:/Test");
    }
}
