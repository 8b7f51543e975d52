//! Type-erased exported objects as stored in the path registry.

use std::sync::{Arc, Weak};

use crate::protocol::introspect::InterfaceInfo;
use crate::protocol::{DBusError, Result, Value};

use super::interface::{Interface, MethodResult};
use super::CallContext;

/// A type whose values can be exported: lists the interfaces it implements.
pub trait Object: Send + Sync + Sized + 'static {
    /// Interface tables for every value of this type.
    fn interfaces() -> Vec<Interface<Self>>;
}

enum Holder<T> {
    Strong(Arc<T>),
    Weak(Weak<T>),
}

impl<T> Holder<T> {
    fn get(&self) -> Option<Arc<T>> {
        match self {
            Self::Strong(obj) => Some(Arc::clone(obj)),
            Self::Weak(obj) => obj.upgrade(),
        }
    }
}

/// What the dispatcher needs from an exported object, independent of its type.
pub(crate) trait ErasedObject: Send + Sync {
    /// False once a weakly held object was dropped.
    fn is_alive(&self) -> bool;

    fn interfaces(&self) -> Vec<&InterfaceInfo>;

    fn has_interface(&self, name: &str) -> bool;

    fn invoke(
        &self,
        ctx: &CallContext,
        interface: Option<&str>,
        member: &str,
        signature: &str,
        args: Vec<Value>,
    ) -> MethodResult;

    /// `None` if no interface declares the property.
    fn get_property(&self, interface: &str, name: &str) -> Option<std::result::Result<Value, DBusError>>;

    /// `None` if no interface declares the property.
    fn set_property(&self, interface: &str, name: &str, value: Value) -> Option<std::result::Result<(), DBusError>>;

    fn get_all(&self, interface: &str) -> std::result::Result<Vec<(String, Value)>, DBusError>;
}

/// Shared handle to a registered object.
pub(crate) type ExportedObject = Arc<dyn ErasedObject>;

struct Registered<T> {
    holder: Holder<T>,
    interfaces: Vec<Interface<T>>,
}

impl<T: Send + Sync + 'static> Registered<T> {
    fn matching<'a>(&'a self, interface: &'a str) -> impl Iterator<Item = &'a Interface<T>> + 'a {
        self.interfaces
            .iter()
            .filter(move |iface| interface.is_empty() || iface.name() == interface)
    }

    fn alive(&self) -> std::result::Result<Arc<T>, DBusError> {
        self.holder
            .get()
            .ok_or_else(|| DBusError::unknown_object("object no longer exists"))
    }
}

impl<T: Send + Sync + 'static> ErasedObject for Registered<T> {
    fn is_alive(&self) -> bool {
        match &self.holder {
            Holder::Strong(_) => true,
            Holder::Weak(obj) => obj.strong_count() > 0,
        }
    }

    fn interfaces(&self) -> Vec<&InterfaceInfo> {
        self.interfaces.iter().map(Interface::info).collect()
    }

    fn has_interface(&self, name: &str) -> bool {
        self.interfaces.iter().any(|iface| iface.name() == name)
    }

    fn invoke(
        &self,
        ctx: &CallContext,
        interface: Option<&str>,
        member: &str,
        signature: &str,
        args: Vec<Value>,
    ) -> MethodResult {
        let obj = self.alive()?;
        let wanted = interface.unwrap_or_default();
        if !wanted.is_empty() && !self.has_interface(wanted) {
            return Err(DBusError::unknown_interface(format!(
                "no interface {wanted} at {}",
                ctx.path()
            )));
        }
        let mut member_seen = false;
        for iface in self.matching(wanted) {
            if let Some(method) = iface.find_method(member, signature) {
                return (method.handler)(&obj, ctx, args);
            }
            member_seen |= iface.has_member(member);
        }
        Err(if member_seen {
            DBusError::unknown_method(format!(
                "method {member} does not take signature \"{signature}\""
            ))
        } else {
            DBusError::unknown_method(format!("no method {member} at {}", ctx.path()))
        })
    }

    fn get_property(&self, interface: &str, name: &str) -> Option<std::result::Result<Value, DBusError>> {
        let obj = match self.alive() {
            Ok(obj) => obj,
            Err(err) => return Some(Err(err)),
        };
        self.matching(interface)
            .find_map(|iface| iface.get_property(&obj, name))
    }

    fn set_property(&self, interface: &str, name: &str, value: Value) -> Option<std::result::Result<(), DBusError>> {
        let obj = match self.alive() {
            Ok(obj) => obj,
            Err(err) => return Some(Err(err)),
        };
        let iface = self.matching(interface).find(|iface| iface.has_property(name))?;
        iface.set_property(&obj, name, value)
    }

    fn get_all(&self, interface: &str) -> std::result::Result<Vec<(String, Value)>, DBusError> {
        let obj = self.alive()?;
        let mut all = Vec::new();
        for iface in self.matching(interface) {
            all.extend(iface.get_all(&obj)?);
        }
        Ok(all)
    }
}

/// Wrap `obj` with its interface tables, holding it strongly or weakly.
pub(crate) fn erase<T: Send + Sync + 'static>(
    obj: &Arc<T>,
    interfaces: Vec<Interface<T>>,
    weak: bool,
) -> Result<ExportedObject> {
    for iface in &interfaces {
        iface.validate()?;
    }
    let holder = if weak {
        Holder::Weak(Arc::downgrade(obj))
    } else {
        Holder::Strong(Arc::clone(obj))
    };
    Ok(Arc::new(Registered { holder, interfaces }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing;

    fn thing_interfaces() -> Vec<Interface<Thing>> {
        vec![Interface::new("org.example.Thing")
            .unwrap()
            .property("Size", |_t: &Thing| 4u32)]
    }

    #[test]
    fn weak_holder_dies_with_the_object() {
        let obj = Arc::new(Thing);
        let exported = erase(&obj, thing_interfaces(), true).unwrap();
        assert!(exported.is_alive());
        assert_eq!(exported.get_property("", "Size").unwrap().unwrap(), Value::UInt32(4));
        drop(obj);
        assert!(!exported.is_alive());
        assert!(exported.get_all("org.example.Thing").is_err());
    }

    #[test]
    fn strong_holder_keeps_the_object() {
        let obj = Arc::new(Thing);
        let exported = erase(&obj, thing_interfaces(), false).unwrap();
        drop(obj);
        assert!(exported.is_alive());
        assert!(exported.has_interface("org.example.Thing"));
        assert!(exported.get_property("org.other.Iface", "Size").is_none());
    }
}
