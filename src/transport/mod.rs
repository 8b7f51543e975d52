//! Byte channels under the message layer: addresses, sockets, SASL
//! authentication and framed message I/O.

mod address;
pub mod auth;
#[cfg(feature = "debug-tools")]
mod debug;
mod error;
mod keyring;
mod socket;
mod transport;

pub use address::{BusAddress, DEFAULT_SYSTEM_BUS_ADDRESS, Endpoint, machine_id};
pub use auth::{AuthConfig, AuthOutcome, Mechanism};
#[cfg(feature = "debug-tools")]
pub use debug::WireRecorder;
pub use error::{AuthError, TransportError};
pub use keyring::{COOKIE_EXPIRY, COOKIE_TIMEOUT, Cookie, DEFAULT_COOKIE_CONTEXT, Keyring, MAX_TIME_TRAVEL};
pub use socket::{Listener, Stream};
pub use transport::{CloseHandle, MessageReader, MessageWriter, Transport, TransportConfig};
