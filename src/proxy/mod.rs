//! Calling remote objects.
//!
//! A [`Proxy`] pairs a connection with a [`RemoteObjectRef`] and turns
//! typed calls into method-call messages. Typed wrappers implement
//! [`RemoteInterface`] around a proxy:
//!
//! ```no_run
//! use dbuslink::proxy::{Proxy, RemoteInterface};
//!
//! struct Test(Proxy);
//!
//! impl RemoteInterface for Test {
//!     const INTERFACE: &'static str = "org.example.Test";
//!     fn from_proxy(proxy: Proxy) -> Self {
//!         Test(proxy)
//!     }
//! }
//!
//! impl Test {
//!     fn get_name(&self) -> dbuslink::Result<String> {
//!         let (name,): (String,) = self.0.call("getName", ())?;
//!         Ok(name)
//!     }
//! }
//!
//! let conn = dbuslink::ConnectionBuilder::new().session().build()?;
//! let test: Test = conn.get_remote_object("org.example.Service", "/Test")?;
//! println!("{}", test.get_name()?);
//! # Ok::<(), dbuslink::Error>(())
//! ```

mod remote;
mod reply;

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use tracing::trace;

use crate::connection::Connection;
use crate::protocol::introspect::{
    INTROSPECTABLE_INTERFACE, IntrospectedNode, PEER_INTERFACE, PROPERTIES_INTERFACE, parse_node,
};
use crate::protocol::{Error, FromBody, FromValue, IntoBody, Message, MessageBuilder, Result, Value, Variant};

pub use remote::RemoteObjectRef;
pub use reply::{AsyncReply, CallbackHandler};

/// A typed view over a [`Proxy`] for one interface.
pub trait RemoteInterface: Sized {
    /// Interface the wrapper calls.
    const INTERFACE: &'static str;

    /// Wrap a proxy whose default interface is [`Self::INTERFACE`].
    fn from_proxy(proxy: Proxy) -> Self;
}

/// Whether `name` is one of the interfaces every object answers.
#[must_use]
pub fn is_standard_interface(name: &str) -> bool {
    matches!(name, PEER_INTERFACE | INTROSPECTABLE_INTERFACE | PROPERTIES_INTERFACE)
}

/// Invokes methods on one remote object.
#[derive(Debug, Clone)]
pub struct Proxy {
    connection: Connection,
    target: RemoteObjectRef,
}

impl Proxy {
    pub(crate) fn new(connection: Connection, target: RemoteObjectRef) -> Self {
        Self { connection, target }
    }

    /// The object this proxy calls.
    #[must_use]
    pub fn target(&self) -> &RemoteObjectRef {
        &self.target
    }

    /// Connection the calls go out on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn builder(&self, interface: Option<&str>, member: &str, args: Vec<Value>) -> MessageBuilder {
        let mut builder = Message::method_call(self.target.path().clone(), member)
            .endian(self.connection.endianness())
            .body(args);
        if let Some(destination) = self.target.destination() {
            builder = builder.destination(destination);
        }
        if let Some(interface) = interface.or(self.target.interface()) {
            builder = builder.interface(interface);
        }
        if !self.target.auto_start() {
            builder = builder.no_auto_start();
        }
        builder
    }

    fn message(&self, interface: Option<&str>, member: &str, args: Vec<Value>, no_reply: bool) -> Result<Message> {
        let mut builder = self.builder(interface, member, args);
        if no_reply {
            builder = builder.no_reply();
        }
        let message = builder.build()?;
        trace!(object = %self.target, member, signature = message.signature().as_str(), "calling");
        Ok(message)
    }

    /// Call `member` on the default interface and wait for the reply.
    pub fn call<A: IntoBody, R: FromBody>(&self, member: &str, args: A) -> Result<R> {
        self.call_interface(None, member, args)
    }

    /// Call `member` on an explicit interface and wait for the reply.
    pub fn call_interface<A: IntoBody, R: FromBody>(&self, interface: Option<&str>, member: &str, args: A) -> Result<R> {
        let message = self.message(interface, member, args.into_body(), false)?;
        reply::decode(self.connection.call(message))
    }

    /// Call with descriptors attached; the reply message is returned whole
    /// so received descriptors can be taken from it.
    pub fn call_with_fds<A: IntoBody>(&self, member: &str, args: A, fds: Vec<OwnedFd>) -> Result<Message> {
        let message = self.builder(None, member, args.into_body()).fds(fds).build()?;
        self.connection.call(message)
    }

    /// Send without asking for a reply.
    pub fn call_no_reply<A: IntoBody>(&self, member: &str, args: A) -> Result<()> {
        let message = self.message(None, member, args.into_body(), true)?;
        self.connection.send_message(message).map(|_| ())
    }

    /// Send now, collect the reply later.
    pub fn call_async<A: IntoBody, R: FromBody>(&self, member: &str, args: A) -> Result<AsyncReply<R>> {
        let message = self.message(None, member, args.into_body(), false)?;
        let (serial, slot) = self.connection.call_deferred(message)?;
        Ok(AsyncReply::new(serial, slot, self.connection.clone()))
    }

    /// Send now; `handler` gets the outcome on a worker thread.
    pub fn call_with_callback<A, R, H>(&self, member: &str, args: A, handler: H) -> Result<()>
    where
        A: IntoBody,
        R: FromBody,
        H: CallbackHandler<R>,
    {
        let message = self.message(None, member, args.into_body(), false)?;
        self.connection
            .call_with(
                message,
                Box::new(move |result| match reply::decode::<R>(result) {
                    Ok(value) => handler.handle(value),
                    Err(err) => handler.handle_error(err),
                }),
            )
            .map(|_| ())
    }

    fn property_interface(&self) -> Result<&str> {
        self.target
            .interface()
            .ok_or_else(|| Error::Other(format!("{} has no default interface for properties", self.target)))
    }

    /// Read a property of the default interface.
    pub fn get_property<V: FromValue>(&self, name: &str) -> Result<V> {
        let interface = self.property_interface()?;
        let (value,): (Variant,) = self.call_interface(Some(PROPERTIES_INTERFACE), "Get", (interface, name))?;
        Ok(V::from_value(value.into_inner())?)
    }

    /// Write a property of the default interface.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let interface = self.property_interface()?;
        self.call_interface(
            Some(PROPERTIES_INTERFACE),
            "Set",
            (interface, name, Variant::new(value)),
        )
    }

    /// Every readable property of the default interface.
    pub fn get_all(&self) -> Result<HashMap<String, Value>> {
        let interface = self.property_interface()?;
        let (all,): (HashMap<String, Variant>,) =
            self.call_interface(Some(PROPERTIES_INTERFACE), "GetAll", (interface,))?;
        Ok(all.into_iter().map(|(k, v)| (k, v.into_inner())).collect())
    }

    /// Raw introspection document.
    pub fn introspect_xml(&self) -> Result<String> {
        let (xml,): (String,) = self.call_interface(Some(INTROSPECTABLE_INTERFACE), "Introspect", ())?;
        Ok(xml)
    }

    /// Interfaces and child nodes of the remote object.
    pub fn introspect(&self) -> Result<IntrospectedNode> {
        self.introspect_xml().map(|xml| parse_node(&xml))
    }

    /// `org.freedesktop.DBus.Peer.Ping`.
    pub fn ping(&self) -> Result<()> {
        self.call_interface(Some(PEER_INTERFACE), "Ping", ())
    }

    /// `org.freedesktop.DBus.Peer.GetMachineId`.
    pub fn machine_id(&self) -> Result<String> {
        let (id,): (String,) = self.call_interface(Some(PEER_INTERFACE), "GetMachineId", ())?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_interfaces() {
        assert!(is_standard_interface(PEER_INTERFACE));
        assert!(is_standard_interface(PROPERTIES_INTERFACE));
        assert!(!is_standard_interface("org.example.Test"));
    }
}
