//! dbuslink - a userspace D-Bus engine
//!
//! Connects to a message bus (or directly to a peer), exports local objects,
//! calls remote ones and routes signals. Everything runs on plain threads:
//! one reader per connection, one FIFO sender and small worker pools for
//! dispatch.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dbuslink::ConnectionBuilder;
//!
//! let conn = ConnectionBuilder::new().session().build()?;
//! let bus = conn.proxy("org.freedesktop.DBus", "/org/freedesktop/DBus", Some("org.freedesktop.DBus"))?;
//! let (names,): (Vec<String>,) = bus.call("ListNames", ())?;
//! println!("{} names on the bus", names.len());
//! # Ok::<(), dbuslink::Error>(())
//! ```
//!
//! # Layers
//!
//! - [`protocol`] - signatures, values, the marshalling codec and messages
//! - [`transport`] - addresses, sockets, SASL and framed message I/O
//! - [`connection`] - lifecycle, serials, pending calls and dispatch
//! - [`object`] - exporting local objects
//! - [`proxy`] - calling remote objects

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod object;
pub mod protocol;
pub mod proxy;
pub mod transport;

pub use connection::{Connection, ConnectionBuilder, ConnectionConfig, ConnectionMode, ConnectionState};
pub use object::{CallContext, Interface, Object};
pub use protocol::{
    DBusError, Error, MatchRule, Message, MessageType, MetricsSnapshot, ObjectPath, Result, Signature, Value,
};
pub use proxy::{Proxy, RemoteInterface};

/// Process-wide message counters.
#[must_use]
pub fn metrics() -> MetricsSnapshot {
    protocol::metrics::Metrics::totals()
}
