use std::fmt;

/// Connection lifecycle.
///
/// `Disconnected` is terminal; every state before `Disconnecting` may move
/// straight to it when the transport fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Not yet connected.
    Unconnected,
    /// Transport being established.
    Connecting,
    /// Handshake done, reader running.
    Authenticated,
    /// `Hello` answered; unique name known.
    Registered,
    /// Accepting traffic.
    Active,
    /// Teardown in progress.
    Disconnecting,
    /// Closed for good.
    Disconnected,
}

impl ConnectionState {
    /// Whether new messages may still be sent.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Authenticated | Self::Registered | Self::Active)
    }

    /// Whether teardown has started or finished.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// `disconnect()` was called by the application.
    Requested,
    /// The channel failed or the peer hung up.
    Transport(String),
}

impl DisconnectCause {
    /// Whether the outbound queue may still be flushed.
    #[must_use]
    pub const fn can_flush(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Transport(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}
