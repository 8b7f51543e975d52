//! Error types shared by every layer of the engine.

use std::fmt;

use thiserror::Error;

use crate::transport::{AuthError, TransportError};

/// Well-known error names used by message buses.
pub mod names {
    /// Generic failure.
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    /// No exported object at the requested path.
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    /// The object has no method with this name and signature.
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// The object does not implement the interface.
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    /// The property does not exist.
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    /// The property cannot be written.
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    /// The arguments did not match the method.
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    /// No reply could be obtained.
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    /// The connection is gone.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
    /// The destination name has no owner.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// Security policy forbids the operation.
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    /// The bus name has no owner.
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    /// The match rule was malformed or unknown.
    pub const MATCH_RULE_NOT_FOUND: &str = "org.freedesktop.DBus.Error.MatchRuleNotFound";
}

/// Marshalling failures raised while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Not enough bytes left for the value being decoded.
    #[error("buffer underrun: need {needed} bytes at offset {offset}, have {available}")]
    Underrun {
        /// Offset at which decoding stopped.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Type signature failed validation.
    #[error("invalid signature {signature:?}: {reason}")]
    InvalidSignature {
        /// Offending signature text.
        signature: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A value does not have the type the signature demands.
    #[error("value does not match signature: expected {expected}, found {found}")]
    SignatureMismatch {
        /// Signature required by the context.
        expected: String,
        /// Signature of the supplied value.
        found: String,
    },

    /// Array length above the configured ceiling.
    #[error("array length {length} exceeds maximum {max}")]
    ArrayTooLong {
        /// Declared length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Message bigger than the protocol allows.
    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Declared size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// String payload was not valid UTF-8 or had a missing terminator.
    #[error("invalid string data: {0}")]
    InvalidString(&'static str),

    /// Boolean encoded as something other than 0 or 1.
    #[error("invalid boolean value {0}")]
    InvalidBoolean(u32),

    /// Object path failed validation.
    #[error("invalid object path {0:?}")]
    InvalidObjectPath(String),

    /// An array's elements did not end exactly at its declared length.
    #[error("array declared {declared} bytes but elements consumed {consumed}")]
    ArrayLengthMismatch {
        /// Length prefix.
        declared: usize,
        /// Bytes actually read by the elements.
        consumed: usize,
    },

    /// Bytes left over after the last value of a signature.
    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),

    /// Padding bytes were not zero.
    #[error("non-zero padding at offset {0}")]
    NonZeroPadding(usize),

    /// Variant or container nesting too deep.
    #[error("nesting depth exceeds {0}")]
    DepthExceeded(usize),

    /// Message header is structurally invalid.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A unix fd index points outside the received descriptor list.
    #[error("unix fd index {index} out of range ({available} received)")]
    FdOutOfRange {
        /// Index carried in the body.
        index: u32,
        /// Descriptors actually received.
        available: usize,
    },
}

/// A named error as carried by an Error message.
///
/// Every protocol error (unknown object, unknown method, invalid args) and
/// every application error raised by an exported method travels in this
/// form. The message text is the first string argument of the reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DBusError {
    name: String,
    message: String,
}

impl DBusError {
    /// Create an error with an explicit name.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error carries the given name.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Generic execution failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(names::FAILED, message)
    }

    /// No object exported at a path.
    pub fn unknown_object(message: impl Into<String>) -> Self {
        Self::new(names::UNKNOWN_OBJECT, message)
    }

    /// No method for a member/signature pair.
    pub fn unknown_method(message: impl Into<String>) -> Self {
        Self::new(names::UNKNOWN_METHOD, message)
    }

    /// Interface not implemented.
    pub fn unknown_interface(message: impl Into<String>) -> Self {
        Self::new(names::UNKNOWN_INTERFACE, message)
    }

    /// Property not found.
    pub fn unknown_property(message: impl Into<String>) -> Self {
        Self::new(names::UNKNOWN_PROPERTY, message)
    }

    /// Property is read-only.
    pub fn property_read_only(message: impl Into<String>) -> Self {
        Self::new(names::PROPERTY_READ_ONLY, message)
    }

    /// Arguments could not be decoded or did not fit.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(names::INVALID_ARGS, message)
    }

    /// Connection went away while the call was outstanding.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(names::DISCONNECTED, message)
    }

    /// Convert into a locally known typed error, if the name matches.
    pub fn into_typed<E: RemoteError>(self) -> std::result::Result<E, Self> {
        if self.name == E::NAME {
            Ok(E::from_message(&self.message))
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for DBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for DBusError {}

impl From<MarshalError> for DBusError {
    fn from(err: MarshalError) -> Self {
        Self::invalid_args(err.to_string())
    }
}

/// A domain error type that can travel as a named Error message.
///
/// Implement this for application error enums/structs to have them sent with
/// their own name by exported methods (via `From<E> for DBusError`) and to
/// recover them on the calling side with [`Error::remote_as`].
pub trait RemoteError: Sized + Send + Sync + 'static {
    /// Error name on the wire.
    const NAME: &'static str;

    /// Rebuild the error from the message text of an Error reply.
    fn from_message(message: &str) -> Self;

    /// Message text sent in the Error reply.
    fn message(&self) -> String;

    /// Wire form of this error.
    fn to_dbus_error(&self) -> DBusError {
        DBusError::new(Self::NAME, self.message())
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Socket or I/O failure; fatal for the connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// SASL negotiation was rejected; no connection was produced.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Malformed signature, value or buffer.
    #[error("marshalling error: {0}")]
    Marshalling(#[from] MarshalError),

    /// Named error received from (or produced for) a peer.
    #[error("{0}")]
    Remote(DBusError),

    /// Operation attempted on, or interrupted by, a closed connection.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Bus address could not be parsed or is unsupported.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A bus, interface, member or error name failed validation.
    #[error("invalid {kind} name {name:?}")]
    InvalidName {
        /// Which kind of name was checked.
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// `RequestName`/`ReleaseName` did not give us what we asked for.
    #[error("bus name request for {name} failed (reply code {reply})")]
    NameRequest {
        /// Requested name.
        name: String,
        /// Reply code from the bus.
        reply: u32,
    },

    /// Export collision and other local usage errors.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Return the remote error, if this is one.
    #[must_use]
    pub fn as_remote(&self) -> Option<&DBusError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Name of the remote error, if this is one.
    #[must_use]
    pub fn remote_name(&self) -> Option<&str> {
        self.as_remote().map(DBusError::name)
    }

    /// Whether this error reports a lost connection.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        match self {
            Self::Disconnected(_) => true,
            Self::Remote(err) => err.is(names::DISCONNECTED),
            _ => false,
        }
    }

    /// Re-raise a remote error as a typed error, if its name matches.
    pub fn remote_as<E: RemoteError>(self) -> std::result::Result<E, Self> {
        match self {
            Self::Remote(err) => err.into_typed::<E>().map_err(Self::Remote),
            other => Err(other),
        }
    }

    /// Wire form used when this error has to be sent back to a caller.
    #[must_use]
    pub fn to_dbus_error(&self) -> DBusError {
        match self {
            Self::Remote(err) => err.clone(),
            Self::Marshalling(err) => DBusError::invalid_args(err.to_string()),
            Self::Disconnected(msg) => DBusError::disconnected(msg.clone()),
            other => DBusError::failed(other.to_string()),
        }
    }
}

impl From<DBusError> for Error {
    fn from(err: DBusError) -> Self {
        Self::Remote(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
