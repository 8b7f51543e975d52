//! Line-based SASL handshake run before any binary traffic.
//!
//! [`SaslClient`] and [`SaslServer`] are pure state machines fed one parsed
//! [`Command`] at a time; [`client_handshake`] and [`server_handshake`] drive
//! them over a byte channel.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use super::error::AuthError;
use super::keyring::{DEFAULT_COOKIE_CONTEXT, Keyring, random_hex, sha1_hex};

const MAX_LINE_LEN: usize = 16 * 1024;
const MAX_REJECTIONS: u32 = 8;

/// Authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// Kernel-verified peer credentials (Unix sockets).
    External,
    /// Shared-secret challenge through the user's cookie keyring.
    CookieSha1,
    /// No authentication.
    Anonymous,
}

impl Mechanism {
    /// Wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::External => "EXTERNAL",
            Self::CookieSha1 => "DBUS_COOKIE_SHA1",
            Self::Anonymous => "ANONYMOUS",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EXTERNAL" => Some(Self::External),
            "DBUS_COOKIE_SHA1" => Some(Self::CookieSha1),
            "ANONYMOUS" => Some(Self::Anonymous),
            _ => None,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handshake settings, used on both client and server side.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Enabled mechanisms, in client preference order.
    pub mechanisms: Vec<Mechanism>,
    /// Ask for (client) or grant (server) descriptor passing on Unix sockets.
    pub negotiate_unix_fd: bool,
    /// Keyring location; `$HOME/.dbus-keyrings` when unset.
    pub keyring_dir: Option<PathBuf>,
    /// Keyring context a server issues cookies in.
    pub cookie_context: String,
    /// GUID a server announces; random when unset.
    pub guid: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mechanisms: vec![Mechanism::External, Mechanism::CookieSha1],
            negotiate_unix_fd: true,
            keyring_dir: None,
            cookie_context: DEFAULT_COOKIE_CONTEXT.to_owned(),
            guid: None,
        }
    }
}

impl AuthConfig {
    fn keyring(&self) -> Result<Keyring, AuthError> {
        match &self.keyring_dir {
            Some(dir) => Ok(Keyring::new(dir)),
            None => Keyring::user_default(),
        }
    }

    /// GUID a server should announce.
    #[must_use]
    pub fn server_guid(&self) -> String {
        self.guid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }
}

/// One handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AUTH [mechanism [initial-response]]`
    Auth {
        /// Requested mechanism, absent to ask for the list.
        mechanism: Option<String>,
        /// Decoded initial response.
        initial: Option<Vec<u8>>,
    },
    /// `DATA [hex]`
    Data(Vec<u8>),
    /// `REJECTED mech…`
    Rejected(Vec<String>),
    /// `OK guid`
    Ok(String),
    /// `BEGIN`
    Begin,
    /// `CANCEL`
    Cancel,
    /// `ERROR [text]`
    Error(String),
    /// `NEGOTIATE_UNIX_FD`
    NegotiateUnixFd,
    /// `AGREE_UNIX_FD`
    AgreeUnixFd,
}

impl Command {
    /// Parse one line without its terminator.
    pub fn parse(line: &str) -> Result<Self, AuthError> {
        let mut words = line.split(' ').filter(|w| !w.is_empty());
        let verb = words.next().unwrap_or_default();
        let hex_arg = |word: Option<&str>| -> Result<Option<Vec<u8>>, AuthError> {
            word.map(|w| {
                hex::decode(w).map_err(|_| AuthError::Protocol(format!("bad hex in {line:?}")))
            })
            .transpose()
        };
        Ok(match verb {
            "AUTH" => {
                let mechanism = words.next().map(str::to_owned);
                let initial = hex_arg(words.next())?;
                Self::Auth { mechanism, initial }
            }
            "DATA" => Self::Data(hex_arg(words.next())?.unwrap_or_default()),
            "REJECTED" => Self::Rejected(words.map(str::to_owned).collect()),
            "OK" => Self::Ok(
                words
                    .next()
                    .ok_or_else(|| AuthError::Protocol("OK without guid".into()))?
                    .to_owned(),
            ),
            "BEGIN" => Self::Begin,
            "CANCEL" => Self::Cancel,
            "ERROR" => Self::Error(words.collect::<Vec<_>>().join(" ")),
            "NEGOTIATE_UNIX_FD" => Self::NegotiateUnixFd,
            "AGREE_UNIX_FD" => Self::AgreeUnixFd,
            _ => return Err(AuthError::Protocol(format!("unknown command {line:?}"))),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth { mechanism, initial } => {
                f.write_str("AUTH")?;
                if let Some(mechanism) = mechanism {
                    write!(f, " {mechanism}")?;
                    if let Some(initial) = initial {
                        write!(f, " {}", hex::encode(initial))?;
                    }
                }
                Ok(())
            }
            Self::Data(data) if data.is_empty() => f.write_str("DATA"),
            Self::Data(data) => write!(f, "DATA {}", hex::encode(data)),
            Self::Rejected(mechs) => {
                f.write_str("REJECTED")?;
                for m in mechs {
                    write!(f, " {m}")?;
                }
                Ok(())
            }
            Self::Ok(guid) => write!(f, "OK {guid}"),
            Self::Begin => f.write_str("BEGIN"),
            Self::Cancel => f.write_str("CANCEL"),
            Self::Error(text) if text.is_empty() => f.write_str("ERROR"),
            Self::Error(text) => write!(f, "ERROR {text}"),
            Self::NegotiateUnixFd => f.write_str("NEGOTIATE_UNIX_FD"),
            Self::AgreeUnixFd => f.write_str("AGREE_UNIX_FD"),
        }
    }
}

/// Result of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Server GUID.
    pub guid: String,
    /// Whether both sides agreed on descriptor passing.
    pub unix_fd: bool,
    /// Mechanism that succeeded.
    pub mechanism: Mechanism,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStage {
    Ready,
    WaitingForReject,
    WaitingForData(Mechanism),
    WaitingForOk(Mechanism),
    WaitingForAgree(Mechanism),
    Complete(Mechanism),
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct SaslClient {
    stage: ClientStage,
    config: AuthConfig,
    uid: u32,
    fd_capable: bool,
    expected_guid: Option<String>,
    tried: Vec<Mechanism>,
    guid: Option<String>,
    unix_fd: bool,
}

impl SaslClient {
    /// Client authenticating as `uid`; `fd_capable` when the channel can carry descriptors.
    #[must_use]
    pub fn new(config: AuthConfig, uid: u32, fd_capable: bool, expected_guid: Option<String>) -> Self {
        Self {
            stage: ClientStage::Ready,
            config,
            uid,
            fd_capable,
            expected_guid,
            tried: Vec::new(),
            guid: None,
            unix_fd: false,
        }
    }

    /// First command: a bare `AUTH` asking for the server's mechanisms.
    pub fn initiate(&mut self) -> Result<Command, AuthError> {
        if self.stage != ClientStage::Ready {
            return Err(AuthError::Protocol("handshake already started".into()));
        }
        self.stage = ClientStage::WaitingForReject;
        Ok(Command::Auth {
            mechanism: None,
            initial: None,
        })
    }

    /// Whether `BEGIN` has been produced.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, ClientStage::Complete(_))
    }

    /// Negotiated outcome once complete.
    #[must_use]
    pub fn outcome(&self) -> Option<AuthOutcome> {
        match self.stage {
            ClientStage::Complete(mechanism) => Some(AuthOutcome {
                guid: self.guid.clone()?,
                unix_fd: self.unix_fd,
                mechanism,
            }),
            _ => None,
        }
    }

    /// Answer one server command.
    pub fn handle(&mut self, command: Command) -> Result<Command, AuthError> {
        trace!(stage = ?self.stage, %command, "sasl client received");
        match (self.stage, command) {
            (ClientStage::Ready | ClientStage::Complete(_), command) => Err(AuthError::Protocol(
                format!("unexpected {command} outside handshake"),
            )),
            (_, Command::Rejected(offered)) => {
                if let ClientStage::WaitingForData(m) | ClientStage::WaitingForOk(m) = self.stage {
                    self.tried.push(m);
                }
                self.next_mechanism(&offered)
            }
            (ClientStage::WaitingForData(Mechanism::CookieSha1), Command::Data(challenge)) => {
                match self.cookie_response(&challenge) {
                    Ok(response) => {
                        self.stage = ClientStage::WaitingForOk(Mechanism::CookieSha1);
                        Ok(Command::Data(response))
                    }
                    Err(err) => {
                        warn!(error = %err, "cookie challenge failed");
                        self.tried.push(Mechanism::CookieSha1);
                        self.stage = ClientStage::WaitingForReject;
                        Ok(Command::Cancel)
                    }
                }
            }
            (ClientStage::WaitingForData(m) | ClientStage::WaitingForOk(m), Command::Data(_))
                if m != Mechanism::CookieSha1 =>
            {
                self.stage = ClientStage::WaitingForOk(m);
                Ok(Command::Data(self.initial_response(m).unwrap_or_default()))
            }
            (ClientStage::WaitingForData(m) | ClientStage::WaitingForOk(m), Command::Ok(guid)) => {
                if let Some(expected) = &self.expected_guid {
                    if *expected != guid {
                        return Err(AuthError::Protocol(format!(
                            "server guid {guid} does not match expected {expected}"
                        )));
                    }
                }
                self.guid = Some(guid);
                if self.config.negotiate_unix_fd && self.fd_capable {
                    self.stage = ClientStage::WaitingForAgree(m);
                    Ok(Command::NegotiateUnixFd)
                } else {
                    self.stage = ClientStage::Complete(m);
                    Ok(Command::Begin)
                }
            }
            (ClientStage::WaitingForAgree(m), Command::AgreeUnixFd) => {
                self.unix_fd = true;
                self.stage = ClientStage::Complete(m);
                Ok(Command::Begin)
            }
            (ClientStage::WaitingForAgree(m), Command::Error(_)) => {
                self.unix_fd = false;
                self.stage = ClientStage::Complete(m);
                Ok(Command::Begin)
            }
            (_, Command::Error(_) | Command::Data(_)) => {
                self.stage = ClientStage::WaitingForReject;
                Ok(Command::Cancel)
            }
            (_, other) => Ok(Command::Error(format!("unexpected {other}"))),
        }
    }

    fn next_mechanism(&mut self, offered: &[String]) -> Result<Command, AuthError> {
        let choice = self.config.mechanisms.iter().copied().find(|m| {
            !self.tried.contains(m) && (offered.is_empty() || offered.iter().any(|o| o == m.name()))
        });
        let Some(mechanism) = choice else {
            let common = self
                .config
                .mechanisms
                .iter()
                .any(|m| offered.iter().any(|o| o == m.name()));
            return Err(if common || offered.is_empty() {
                AuthError::Rejected(offered.join(" "))
            } else {
                AuthError::NoCommonMechanism
            });
        };
        debug!(%mechanism, "trying sasl mechanism");
        self.stage = match mechanism {
            Mechanism::CookieSha1 => ClientStage::WaitingForData(mechanism),
            _ => ClientStage::WaitingForOk(mechanism),
        };
        Ok(Command::Auth {
            mechanism: Some(mechanism.name().to_owned()),
            initial: self.initial_response(mechanism),
        })
    }

    fn initial_response(&self, mechanism: Mechanism) -> Option<Vec<u8>> {
        match mechanism {
            Mechanism::External | Mechanism::CookieSha1 => Some(self.uid.to_string().into_bytes()),
            Mechanism::Anonymous => None,
        }
    }

    fn cookie_response(&self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        let text = std::str::from_utf8(challenge)
            .map_err(|_| AuthError::Protocol("challenge is not UTF-8".into()))?;
        let mut parts = text.split(' ');
        let (Some(context), Some(id), Some(server_challenge), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Protocol(format!("malformed cookie challenge {text:?}")));
        };
        let secret = self.config.keyring()?.find(context, id)?;
        let client_challenge = random_hex();
        let digest = sha1_hex(&format!("{server_challenge}:{client_challenge}:{secret}"));
        Ok(format!("{client_challenge} {digest}").into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerStage {
    WaitingForAuth,
    WaitingForExternalData,
    WaitingForCookieData { challenge: String, secret: String },
    WaitingForBegin(Mechanism),
    Complete(Mechanism),
}

/// Server side of the handshake.
#[derive(Debug)]
pub struct SaslServer {
    stage: ServerStage,
    config: AuthConfig,
    guid: String,
    peer_uid: Option<u32>,
    fd_capable: bool,
    rejections: u32,
    unix_fd: bool,
}

impl SaslServer {
    /// Server announcing `guid` to a peer whose kernel-reported uid is `peer_uid`.
    #[must_use]
    pub fn new(config: AuthConfig, guid: String, peer_uid: Option<u32>, fd_capable: bool) -> Self {
        Self {
            stage: ServerStage::WaitingForAuth,
            config,
            guid,
            peer_uid,
            fd_capable,
            rejections: 0,
            unix_fd: false,
        }
    }

    /// Negotiated outcome once `BEGIN` was received.
    #[must_use]
    pub fn outcome(&self) -> Option<AuthOutcome> {
        match self.stage {
            ServerStage::Complete(mechanism) => Some(AuthOutcome {
                guid: self.guid.clone(),
                unix_fd: self.unix_fd,
                mechanism,
            }),
            _ => None,
        }
    }

    /// Answer one client command; `None` once the client sent `BEGIN`.
    pub fn handle(&mut self, command: Command) -> Result<Option<Command>, AuthError> {
        trace!(stage = ?self.stage, %command, "sasl server received");
        let stage = std::mem::replace(&mut self.stage, ServerStage::WaitingForAuth);
        let reply = match (stage, command) {
            (ServerStage::Complete(m), _) => {
                self.stage = ServerStage::Complete(m);
                return Err(AuthError::Protocol("command after BEGIN".into()));
            }
            (ServerStage::WaitingForBegin(m), Command::Begin) => {
                self.stage = ServerStage::Complete(m);
                return Ok(None);
            }
            (ServerStage::WaitingForBegin(m), Command::NegotiateUnixFd) => {
                self.stage = ServerStage::WaitingForBegin(m);
                if self.fd_capable && self.config.negotiate_unix_fd {
                    self.unix_fd = true;
                    Command::AgreeUnixFd
                } else {
                    Command::Error("unix fd passing not supported".into())
                }
            }
            (ServerStage::WaitingForAuth, Command::Auth { mechanism, initial }) => {
                self.start(mechanism.as_deref(), initial)?
            }
            (ServerStage::WaitingForExternalData, Command::Data(data)) => self.check_external(&data)?,
            (ServerStage::WaitingForCookieData { challenge, secret }, Command::Data(data)) => {
                if verify_cookie(&challenge, &secret, &data) {
                    self.accept(Mechanism::CookieSha1)
                } else {
                    self.reject()?
                }
            }
            (_, Command::Cancel | Command::Error(_)) => self.reject()?,
            (ServerStage::WaitingForAuth, Command::Begin) => {
                Command::Error("not authenticated".into())
            }
            (stage @ ServerStage::WaitingForBegin(_), other) => {
                self.stage = stage;
                Command::Error(format!("unexpected {other}"))
            }
            (_, _) => self.reject()?,
        };
        Ok(Some(reply))
    }

    fn allowed(&self) -> Vec<String> {
        self.config
            .mechanisms
            .iter()
            .filter(|m| **m != Mechanism::External || self.peer_uid.is_some())
            .map(|m| m.name().to_owned())
            .collect()
    }

    fn reject(&mut self) -> Result<Command, AuthError> {
        self.rejections += 1;
        self.stage = ServerStage::WaitingForAuth;
        if self.rejections > MAX_REJECTIONS {
            return Err(AuthError::Rejected("too many failed attempts".into()));
        }
        Ok(Command::Rejected(self.allowed()))
    }

    fn accept(&mut self, mechanism: Mechanism) -> Command {
        debug!(%mechanism, "sasl peer authenticated");
        self.stage = ServerStage::WaitingForBegin(mechanism);
        Command::Ok(self.guid.clone())
    }

    fn start(&mut self, mechanism: Option<&str>, initial: Option<Vec<u8>>) -> Result<Command, AuthError> {
        let Some(name) = mechanism else {
            return Ok(Command::Rejected(self.allowed()));
        };
        let chosen = Mechanism::from_name(name).filter(|m| self.allowed().iter().any(|a| a == m.name()));
        match chosen {
            None => self.reject(),
            Some(Mechanism::Anonymous) => Ok(self.accept(Mechanism::Anonymous)),
            Some(Mechanism::External) => match initial {
                Some(data) => self.check_external(&data),
                None => {
                    self.stage = ServerStage::WaitingForExternalData;
                    Ok(Command::Data(Vec::new()))
                }
            },
            Some(Mechanism::CookieSha1) => {
                let keyring = self.config.keyring()?;
                let cookie = keyring.add(&self.config.cookie_context)?;
                let challenge = random_hex();
                let payload = format!("{} {} {challenge}", self.config.cookie_context, cookie.id());
                self.stage = ServerStage::WaitingForCookieData {
                    challenge,
                    secret: cookie.secret().to_owned(),
                };
                Ok(Command::Data(payload.into_bytes()))
            }
        }
    }

    fn check_external(&mut self, data: &[u8]) -> Result<Command, AuthError> {
        let claimed = std::str::from_utf8(data).ok().and_then(|s| s.parse::<u32>().ok());
        match (claimed, self.peer_uid) {
            (Some(claimed), Some(actual)) if claimed == actual => Ok(self.accept(Mechanism::External)),
            _ => {
                debug!(?claimed, peer = ?self.peer_uid, "external credentials refused");
                self.reject()
            }
        }
    }
}

fn verify_cookie(server_challenge: &str, secret: &str, response: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(response) else {
        return false;
    };
    let Some((client_challenge, digest)) = text.split_once(' ') else {
        return false;
    };
    sha1_hex(&format!("{server_challenge}:{client_challenge}:{secret}")) == digest
}

struct LineChannel<S> {
    io: S,
}

impl<S: Read + Write> LineChannel<S> {
    fn send(&mut self, command: &Command) -> Result<(), AuthError> {
        trace!(%command, "sasl send");
        self.io.write_all(format!("{command}\r\n").as_bytes())?;
        self.io.flush()?;
        Ok(())
    }

    // Byte-at-a-time so nothing past the final line is consumed.
    fn receive(&mut self) -> Result<Command, AuthError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.io.read(&mut byte)? == 0 {
                return Err(AuthError::Protocol("connection closed during handshake".into()));
            }
            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                other => line.push(other),
            }
            if line.len() > MAX_LINE_LEN {
                return Err(AuthError::Protocol("handshake line too long".into()));
            }
        }
        let text = String::from_utf8(line)
            .map_err(|_| AuthError::Protocol("handshake line is not UTF-8".into()))?;
        Command::parse(&text)
    }
}

/// Run the client handshake over `io`.
pub fn client_handshake<S: Read + Write>(
    io: S,
    client: &mut SaslClient,
) -> Result<AuthOutcome, AuthError> {
    let mut channel = LineChannel { io };
    channel.io.write_all(&[0])?;
    let first = client.initiate()?;
    channel.send(&first)?;
    while !client.is_complete() {
        let incoming = channel.receive()?;
        let reply = client.handle(incoming)?;
        channel.send(&reply)?;
    }
    client
        .outcome()
        .ok_or_else(|| AuthError::Protocol("handshake ended without guid".into()))
}

/// Run the server handshake over `io`.
pub fn server_handshake<S: Read + Write>(
    io: S,
    server: &mut SaslServer,
) -> Result<AuthOutcome, AuthError> {
    let mut channel = LineChannel { io };
    let mut nul = [0u8; 1];
    channel.io.read_exact(&mut nul)?;
    if nul[0] != 0 {
        return Err(AuthError::Protocol("missing initial NUL byte".into()));
    }
    loop {
        let incoming = channel.receive()?;
        match server.handle(incoming)? {
            Some(reply) => channel.send(&reply)?,
            None => break,
        }
    }
    server
        .outcome()
        .ok_or_else(|| AuthError::Protocol("handshake ended early".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::thread;

    fn config(mechanisms: Vec<Mechanism>, keyring: &std::path::Path) -> AuthConfig {
        AuthConfig {
            mechanisms,
            keyring_dir: Some(keyring.to_path_buf()),
            cookie_context: "test_ctx".into(),
            ..AuthConfig::default()
        }
    }

    fn run(
        client_config: AuthConfig,
        server_config: AuthConfig,
        client_uid: u32,
        peer_uid: Option<u32>,
    ) -> (Result<AuthOutcome, AuthError>, Result<AuthOutcome, AuthError>) {
        let (a, b) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || {
            let mut server = SaslServer::new(server_config, "0123abcd".into(), peer_uid, true);
            let result = server_handshake(&b, &mut server);
            drop(b);
            result
        });
        let mut client = SaslClient::new(client_config, client_uid, true, None);
        let client_result = client_handshake(&a, &mut client);
        drop(a);
        (client_result, server.join().unwrap())
    }

    #[test]
    fn commands_render_and_parse() {
        for line in ["AUTH", "AUTH EXTERNAL 31303030", "DATA", "REJECTED EXTERNAL ANONYMOUS", "OK abc", "BEGIN", "ERROR oops", "NEGOTIATE_UNIX_FD", "AGREE_UNIX_FD"] {
            let command = Command::parse(line).unwrap();
            assert_eq!(command.to_string(), line);
        }
        assert_eq!(
            Command::parse("AUTH EXTERNAL 31303030").unwrap(),
            Command::Auth {
                mechanism: Some("EXTERNAL".into()),
                initial: Some(b"1000".to_vec())
            }
        );
        assert!(Command::parse("HELLO").is_err());
        assert!(Command::parse("DATA zz").is_err());
    }

    #[test]
    fn external_with_fd_negotiation() {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = run(
            config(vec![Mechanism::External], dir.path()),
            config(vec![Mechanism::External], dir.path()),
            1000,
            Some(1000),
        );
        let client = client.unwrap();
        assert_eq!(client.guid, "0123abcd");
        assert!(client.unix_fd);
        assert_eq!(client.mechanism, Mechanism::External);
        assert!(server.unwrap().unix_fd);
    }

    #[test]
    fn wrong_uid_falls_back_to_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let both = vec![Mechanism::External, Mechanism::CookieSha1];
        let (client, server) = run(
            config(both.clone(), dir.path()),
            config(both, dir.path()),
            1000,
            Some(2000),
        );
        assert_eq!(client.unwrap().mechanism, Mechanism::CookieSha1);
        assert_eq!(server.unwrap().mechanism, Mechanism::CookieSha1);
    }

    #[test]
    fn no_common_mechanism_fails_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = run(
            config(vec![Mechanism::Anonymous], dir.path()),
            config(vec![Mechanism::External], dir.path()),
            1000,
            Some(1000),
        );
        assert!(matches!(client, Err(AuthError::NoCommonMechanism)));
        assert!(server.is_err());
    }

    #[test]
    fn cookie_with_wrong_secret_is_rejected() {
        let mut server = SaslServer::new(
            config(vec![Mechanism::CookieSha1], tempfile::tempdir().unwrap().path()),
            "g".into(),
            None,
            false,
        );
        server.stage = ServerStage::WaitingForCookieData {
            challenge: "abc".into(),
            secret: "secret".into(),
        };
        let reply = server.handle(Command::Data(b"def 0000".to_vec())).unwrap();
        assert_eq!(reply, Some(Command::Rejected(vec!["DBUS_COOKIE_SHA1".into()])));
        assert!(verify_cookie("abc", "secret", format!("def {}", sha1_hex("abc:def:secret")).as_bytes()));
    }

    #[test]
    fn server_refuses_fds_without_capability() {
        let mut server = SaslServer::new(config(vec![Mechanism::Anonymous], std::path::Path::new("/")), "g".into(), None, false);
        let ok = server
            .handle(Command::Auth {
                mechanism: Some("ANONYMOUS".into()),
                initial: None,
            })
            .unwrap();
        assert_eq!(ok, Some(Command::Ok("g".into())));
        assert!(matches!(
            server.handle(Command::NegotiateUnixFd).unwrap(),
            Some(Command::Error(_))
        ));
        assert_eq!(server.handle(Command::Begin).unwrap(), None);
        assert!(!server.outcome().unwrap().unix_fd);
    }

    #[test]
    fn client_rejects_guid_mismatch() {
        let mut client = SaslClient::new(AuthConfig::default(), 0, false, Some("expected".into()));
        client.initiate().unwrap();
        client
            .handle(Command::Rejected(vec!["EXTERNAL".into()]))
            .unwrap();
        assert!(matches!(
            client.handle(Command::Ok("other".into())),
            Err(AuthError::Protocol(_))
        ));
    }
}
