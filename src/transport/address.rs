//! Bus address strings: `unix:path=…`, `unix:abstract=…`, `tcp:host=…,port=…`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::trace;

use crate::protocol::{Error, Result};

/// Address of the system bus when the environment names none.
pub const DEFAULT_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

const MACHINE_ID_FILES: [&str; 3] = [
    "/etc/machine-id",
    "/var/lib/dbus/machine-id",
    "/usr/local/var/lib/dbus/machine-id",
];

/// Where the byte channel goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endpoint {
    /// Filesystem Unix socket.
    UnixPath(PathBuf),
    /// Linux abstract-namespace Unix socket.
    UnixAbstract(String),
    /// TCP socket.
    Tcp {
        /// Host name or literal address.
        host: String,
        /// Port; `0` lets a listener pick one.
        port: u16,
    },
}

impl Endpoint {
    /// Whether the endpoint is a Unix socket (credentials and fd passing available).
    #[must_use]
    pub fn is_unix(&self) -> bool {
        !matches!(self, Self::Tcp { .. })
    }
}

/// One parsed address entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusAddress {
    endpoint: Endpoint,
    guid: Option<String>,
    listen: bool,
}

impl BusAddress {
    /// Address of a filesystem Unix socket.
    pub fn unix_path(path: impl Into<PathBuf>) -> Self {
        Self::from_endpoint(Endpoint::UnixPath(path.into()))
    }

    /// Address of an abstract Unix socket.
    pub fn unix_abstract(name: impl Into<String>) -> Self {
        Self::from_endpoint(Endpoint::UnixAbstract(name.into()))
    }

    /// Address of a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::from_endpoint(Endpoint::Tcp {
            host: host.into(),
            port,
        })
    }

    fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            guid: None,
            listen: false,
        }
    }

    /// Parse the first entry of a `;`-separated address list.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_list(text)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidAddress("bus address is blank".into()))
    }

    /// Parse every entry of a `;`-separated address list, in order.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        let entries: Vec<Self> = text
            .split(';')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| parse_entry(entry.trim()))
            .collect::<Result<_>>()?;
        if entries.is_empty() {
            return Err(Error::InvalidAddress("bus address is blank".into()));
        }
        Ok(entries)
    }

    /// Session bus from `DBUS_SESSION_BUS_ADDRESS`, else `$XDG_RUNTIME_DIR/bus`.
    pub fn session() -> Result<Self> {
        if let Ok(text) = std::env::var("DBUS_SESSION_BUS_ADDRESS") {
            return Self::parse(text.trim_matches('\''));
        }
        if let Some(runtime) = std::env::var_os("XDG_RUNTIME_DIR") {
            let socket = Path::new(&runtime).join("bus");
            if socket.exists() {
                return Ok(Self::unix_path(socket));
            }
        }
        Err(Error::InvalidAddress(
            "cannot resolve session bus address".into(),
        ))
    }

    /// System bus from `DBUS_SYSTEM_BUS_ADDRESS`, else the well-known socket.
    pub fn system() -> Result<Self> {
        let text = std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_BUS_ADDRESS.to_owned());
        Self::parse(&text)
    }

    /// Bus that activated this process, from `DBUS_STARTER_ADDRESS`.
    pub fn starter() -> Result<Option<Self>> {
        std::env::var("DBUS_STARTER_ADDRESS")
            .ok()
            .map(|text| Self::parse(&text))
            .transpose()
    }

    /// Socket endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Server GUID the peer is expected to announce.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Whether this address asks to listen rather than connect.
    #[must_use]
    pub fn is_listen(&self) -> bool {
        self.listen
    }

    /// Attach an expected server GUID.
    #[must_use]
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Same address in listening mode.
    #[must_use]
    pub fn listening(mut self) -> Self {
        self.listen = true;
        self
    }

    /// Same address in connecting mode, as handed to clients of a listener.
    #[must_use]
    pub fn connecting(mut self) -> Self {
        self.listen = false;
        self
    }
}

fn parse_entry(entry: &str) -> Result<BusAddress> {
    trace!(address = entry, "parsing bus address");
    let (kind, params) = entry
        .split_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("missing transport in {entry:?}")))?;

    let mut path = None;
    let mut abstract_name = None;
    let mut host = None;
    let mut port = None;
    let mut guid = None;
    let mut listen = false;

    for pair in params.split(',').filter(|p| !p.is_empty()) {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidAddress(format!("parameter without value: {pair:?}")))?;
        let value = unescape(raw)?;
        match key {
            "path" => path = Some(value),
            "abstract" => abstract_name = Some(value),
            "host" | "bind" => host = Some(value),
            "port" => {
                port = Some(value.parse::<u16>().map_err(|_| {
                    Error::InvalidAddress(format!("invalid port {value:?}"))
                })?);
            }
            "guid" => guid = Some(value),
            "listen" => listen = value != "false",
            other => trace!(key = other, "ignoring address parameter"),
        }
    }

    let endpoint = match kind.to_ascii_lowercase().as_str() {
        "unix" => match (path, abstract_name) {
            (Some(path), None) => Endpoint::UnixPath(PathBuf::from(path)),
            (None, Some(name)) => Endpoint::UnixAbstract(name),
            _ => {
                return Err(Error::InvalidAddress(format!(
                    "unix address needs exactly one of path/abstract: {entry:?}"
                )));
            }
        },
        "tcp" => Endpoint::Tcp {
            host: host.unwrap_or_else(|| "localhost".to_owned()),
            port: port.ok_or_else(|| Error::InvalidAddress(format!("tcp address without port: {entry:?}")))?,
        },
        other => {
            return Err(Error::InvalidAddress(format!(
                "unsupported transport type {other:?}"
            )));
        }
    };

    Ok(BusAddress {
        endpoint,
        guid,
        listen,
    })
}

fn is_unescaped(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'/' | b'.' | b'\\' | b'*')
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        if is_unescaped(byte) {
            out.push(char::from(byte));
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([byte]));
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let pair = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::InvalidAddress(format!("truncated escape in {value:?}")))?;
            let decoded = hex::decode(pair)
                .map_err(|_| Error::InvalidAddress(format!("bad escape in {value:?}")))?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidAddress(format!("non-UTF-8 value {value:?}")))
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Endpoint::UnixPath(path) => {
                write!(f, "unix:path={}", escape(&path.to_string_lossy()))?;
            }
            Endpoint::UnixAbstract(name) => write!(f, "unix:abstract={}", escape(name))?,
            Endpoint::Tcp { host, port } => write!(f, "tcp:host={},port={port}", escape(host))?,
        }
        if let Some(guid) = &self.guid {
            write!(f, ",guid={}", escape(guid))?;
        }
        if self.listen {
            f.write_str(",listen=true")?;
        }
        Ok(())
    }
}

impl FromStr for BusAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Machine id answered by `org.freedesktop.DBus.Peer.GetMachineId`.
///
/// Read from the usual machine-id files; a random id is generated when none
/// exists.
#[must_use]
pub fn machine_id() -> String {
    MACHINE_ID_FILES
        .iter()
        .filter_map(|file| fs::read_to_string(file).ok())
        .map(|text| text.trim().to_owned())
        .find(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}
