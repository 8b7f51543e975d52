use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::connection::Connection;
use crate::protocol::{Message, ObjectPath};

/// Per-invocation information handed to exported methods.
#[derive(Debug)]
pub struct CallContext {
    message: Message,
    path: ObjectPath,
    connection: Connection,
}

impl CallContext {
    pub(crate) fn new(message: Message, path: ObjectPath, connection: Connection) -> Self {
        Self {
            message,
            path,
            connection,
        }
    }

    /// Unique name of the caller, when the bus supplied one.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.message.sender()
    }

    /// Path the call was addressed to; below the export path for fallback objects.
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Interface named by the caller, if any.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.message.interface()
    }

    /// Member being invoked.
    #[must_use]
    pub fn member(&self) -> &str {
        self.message.member().unwrap_or_default()
    }

    /// Serial of the call.
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.message.serial()
    }

    /// Whether the caller expects no reply.
    #[must_use]
    pub fn no_reply_expected(&self) -> bool {
        self.message.flags().no_reply_expected()
    }

    /// The whole call message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Connection the call arrived on, for emitting signals or calling back.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Descriptor `index` attached to the call.
    #[must_use]
    pub fn fd(&self, index: u32) -> Option<BorrowedFd<'_>> {
        self.message.fd(index)
    }

    /// Owned duplicate of descriptor `index`.
    pub fn dup_fd(&self, index: u32) -> io::Result<OwnedFd> {
        self.fd(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such descriptor"))?
            .try_clone_to_owned()
    }
}
