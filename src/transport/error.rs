//! Transport-level error types covering socket, framing and authentication failures.

use std::io;

use thiserror::Error;

use crate::protocol::MarshalError;

/// Failure of the byte channel; fatal for the connection using it.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the channel in the middle of a message.
    #[error("connection closed by peer")]
    Closed,

    /// Address names a transport this build cannot use.
    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),

    /// A message carried descriptors but the channel cannot pass them.
    #[error("unix fd passing not negotiated on this transport")]
    FdPassingUnsupported,

    /// A frame could not be parsed; the stream position is lost.
    #[error("malformed frame: {0}")]
    Malformed(#[from] MarshalError),
}

impl TransportError {
    /// Whether this is an orderly or abrupt end of stream rather than a local fault.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// The authentication handshake did not produce a connection.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Every mechanism we offered or tried was refused.
    #[error("authentication rejected (server offers: {0})")]
    Rejected(String),

    /// The two sides share no enabled mechanism.
    #[error("no common authentication mechanism")]
    NoCommonMechanism,

    /// The peer sent something the handshake does not allow here.
    #[error("authentication protocol violation: {0}")]
    Protocol(String),

    /// No usable cookie for a `DBUS_COOKIE_SHA1` challenge.
    #[error("no cookie {id} in keyring context {context}")]
    CookieNotFound {
        /// Keyring context.
        context: String,
        /// Cookie id.
        id: String,
    },

    /// Keyring file or socket failure during the handshake.
    #[error("authentication I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_detection() {
        assert!(TransportError::Closed.is_closed());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_closed());
        assert!(!TransportError::FdPassingUnsupported.is_closed());
    }
}
