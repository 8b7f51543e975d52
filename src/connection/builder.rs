use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::protocol::{Error, Result};
use crate::transport::{BusAddress, Transport};

use super::{Connection, ConnectionConfig, ConnectionMode, DisconnectCause, ReceivingConfig};

#[derive(Debug, Clone)]
enum Target {
    Session,
    System,
    Starter,
    Bus(String),
    Direct(String),
}

/// Fluent construction of a [`Connection`].
///
/// ```no_run
/// use dbuslink::ConnectionBuilder;
///
/// let conn = ConnectionBuilder::new().session().shared(false).build()?;
/// println!("connected as {:?}", conn.unique_name());
/// # Ok::<(), dbuslink::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    target: Target,
    shared: bool,
    register: bool,
    config: ConnectionConfig,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder {
    /// Session bus, shared, registered with `Hello`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: Target::Session,
            shared: true,
            register: true,
            config: ConnectionConfig::default(),
        }
    }

    /// Connect to the session bus.
    #[must_use]
    pub fn session(mut self) -> Self {
        self.target = Target::Session;
        self
    }

    /// Connect to the system bus.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.target = Target::System;
        self
    }

    /// Connect to the bus that activated this process.
    #[must_use]
    pub fn starter(mut self) -> Self {
        self.target = Target::Starter;
        self
    }

    /// Connect to a bus daemon at `address`.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.target = Target::Bus(address.to_owned());
        self
    }

    /// Connect peer-to-peer. A `listen=true` address waits for one peer.
    #[must_use]
    pub fn direct(mut self, address: &str) -> Self {
        self.target = Target::Direct(address.to_owned());
        self
    }

    /// Reuse one connection per bus address across builders (bus mode only).
    #[must_use]
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Whether to send `Hello` after connecting (bus mode only).
    #[must_use]
    pub fn register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch pool sizes.
    #[must_use]
    pub fn receiving(mut self, receiving: ReceivingConfig) -> Self {
        self.config.receiving = receiving;
        self
    }

    /// Hold exported objects weakly.
    #[must_use]
    pub fn weak_exports(mut self, weak: bool) -> Self {
        self.config.weak_exports = weak;
        self
    }

    /// Bound on the disconnect sequence.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Connect, authenticate and (for buses) register.
    #[instrument(level = "debug", skip(self), fields(target = ?self.target))]
    pub fn build(self) -> Result<Connection> {
        let (mode, addresses) = match &self.target {
            Target::Session => (ConnectionMode::Bus, vec![BusAddress::session()?]),
            Target::System => (ConnectionMode::Bus, vec![BusAddress::system()?]),
            Target::Starter => {
                let address = BusAddress::starter()?
                    .ok_or_else(|| Error::InvalidAddress("DBUS_STARTER_ADDRESS is not set".into()))?;
                (ConnectionMode::Bus, vec![address])
            }
            Target::Bus(text) => (ConnectionMode::Bus, BusAddress::parse_list(text)?),
            Target::Direct(text) => (ConnectionMode::Direct, BusAddress::parse_list(text)?),
        };
        let key = addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");
        let shared = self.shared && mode == ConnectionMode::Bus;
        if shared {
            if let Some(conn) = acquire_shared(&key) {
                debug!(address = %key, "reusing shared connection");
                return Ok(conn);
            }
        }

        let transport = Transport::connect_any(&addresses, &self.config.transport_config())?;
        let conn = Connection::start(transport, mode, key.clone(), shared.then(|| key.clone()), self.config)?;
        if mode == ConnectionMode::Bus && self.register {
            if let Err(err) = conn.register() {
                conn.inner.teardown(DisconnectCause::Transport(err.to_string()));
                return Err(err);
            }
        }
        if shared {
            return Ok(insert_shared(key, conn));
        }
        Ok(conn)
    }
}

struct SharedEntry {
    connection: Connection,
    holders: usize,
}

fn registry() -> &'static Mutex<HashMap<String, SharedEntry>> {
    static SHARED: OnceLock<Mutex<HashMap<String, SharedEntry>>> = OnceLock::new();
    SHARED.get_or_init(|| Mutex::new(HashMap::new()))
}

fn acquire_shared(key: &str) -> Option<Connection> {
    let mut shared = registry().lock();
    let entry = shared.get_mut(key)?;
    if !entry.connection.is_connected() {
        return None;
    }
    entry.holders += 1;
    Some(entry.connection.clone())
}

// Another builder may have connected the same address meanwhile; the first
// one registered wins and the loser is closed.
fn insert_shared(key: String, conn: Connection) -> Connection {
    let winner = {
        let mut shared = registry().lock();
        match shared.get_mut(&key) {
            Some(entry) if entry.connection.is_connected() => {
                entry.holders += 1;
                Some(entry.connection.clone())
            }
            _ => {
                shared.insert(
                    key,
                    SharedEntry {
                        connection: conn.clone(),
                        holders: 1,
                    },
                );
                None
            }
        }
    };
    match winner {
        Some(winner) => {
            conn.inner.teardown(DisconnectCause::Requested);
            winner
        }
        None => conn,
    }
}

/// Drop one holder. `true` when the caller was the last and must tear down.
pub(super) fn release_shared(key: &str, id: u64) -> bool {
    let mut shared = registry().lock();
    let Some(entry) = shared.get_mut(key) else {
        return true;
    };
    if entry.connection.inner.id != id {
        return true;
    }
    entry.holders = entry.holders.saturating_sub(1);
    if entry.holders > 0 {
        return false;
    }
    shared.remove(key);
    true
}

/// Remove the entry for a connection that went away on its own.
pub(super) fn forget_shared(key: &str, id: u64) {
    let removed = {
        let mut shared = registry().lock();
        match shared.get(key) {
            Some(entry) if entry.connection.inner.id == id => shared.remove(key),
            _ => None,
        }
    };
    drop(removed);
}
