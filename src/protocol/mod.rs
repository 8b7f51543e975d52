//! Wire protocol core
//!
//! Signatures, values, the marshalling codec, message headers and messages,
//! plus the name, match-rule and introspection helpers built on them.

pub mod codec;
pub mod convert;
mod error;
pub mod header;
pub mod introspect;
mod match_rule;
mod message;
pub(crate) mod metrics;
pub mod names;
pub mod signature;
mod types;
mod value;

pub use convert::{BodyType, FromBody, FromValue, IntoBody, Type, Variant};
pub use error::{DBusError, Error, MarshalError, RemoteError, Result, names as error_names};
pub use header::{FieldCode, HeaderFields, MessageHeader};
pub use match_rule::MatchRule;
pub use message::{Message, MessageBuilder};
pub use metrics::MetricsSnapshot;
pub use names::ObjectPath;
pub use signature::{Signature, SignatureType};
pub use types::{Endianness, Flags, MessageType};
pub use value::{Array, Dict, Value};

/// Protocol major version carried in every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest array body accepted (64 MiB).
pub const MAX_ARRAY_LENGTH: usize = 64 * 1024 * 1024;

/// Largest message accepted (128 MiB).
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Well-known name of the message bus itself.
pub const BUS_NAME: &str = "org.freedesktop.DBus";
/// Object path of the message bus.
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
/// Interface of the message bus.
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";
