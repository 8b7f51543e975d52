use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::connection::{Connection, ReplySlot};
use crate::protocol::{Error, FromBody, Message, Result};

/// Receives the outcome of a call made with
/// [`Proxy::call_with_callback`](super::Proxy::call_with_callback).
///
/// Both methods run on a worker thread, never on the reader.
pub trait CallbackHandler<R>: Send + 'static {
    /// The call returned.
    fn handle(self, value: R);

    /// The call failed or the connection went away.
    fn handle_error(self, error: Error);
}

/// Handle to a reply that has not necessarily arrived yet.
pub struct AsyncReply<R> {
    serial: u32,
    slot: Arc<ReplySlot>,
    connection: Connection,
    _reply: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for AsyncReply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncReply")
            .field("serial", &self.serial)
            .field("ready", &self.slot.is_ready())
            .finish()
    }
}

impl<R: FromBody> AsyncReply<R> {
    pub(crate) fn new(serial: u32, slot: Arc<ReplySlot>, connection: Connection) -> Self {
        Self {
            serial,
            slot,
            connection,
            _reply: PhantomData,
        }
    }

    /// Serial of the call.
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Whether the reply (or a failure) is available.
    #[must_use]
    pub fn has_reply(&self) -> bool {
        self.slot.is_ready()
    }

    /// Block until the reply arrives or the connection goes away.
    pub fn wait(self) -> Result<R> {
        decode(self.slot.wait())
    }

    /// Take the reply if it is there; `None` while still waiting.
    pub fn try_take(&self) -> Option<Result<R>> {
        self.slot.try_take().map(decode)
    }

    /// Stop waiting. A reply arriving later counts as spurious.
    pub fn cancel(self) -> bool {
        self.connection.cancel_call(self.serial)
    }
}

pub(crate) fn decode<R: FromBody>(reply: Result<Message>) -> Result<R> {
    Ok(reply?.body_as()?)
}
