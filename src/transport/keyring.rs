//! Cookie keyring backing the `DBUS_COOKIE_SHA1` mechanism.
//!
//! Each context is a file `<dir>/<context>` holding `id created secret`
//! lines. Writers serialize through `<context>.lock` and replace the file
//! atomically via `<context>.temp`.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use super::error::AuthError;

/// Default context used by this library's servers.
pub const DEFAULT_COOKIE_CONTEXT: &str = "org_freedesktop_general";

/// Cookies older than this are dropped when a new one is added.
pub const COOKIE_TIMEOUT: Duration = Duration::from_secs(240);
/// Cookies older than this are not accepted.
pub const COOKIE_EXPIRY: Duration = Duration::from_secs(420);
/// Tolerated clock skew for cookies created "in the future".
pub const MAX_TIME_TRAVEL: Duration = Duration::from_secs(300);

const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// One keyring entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    id: u64,
    created: u64,
    secret: String,
}

impl Cookie {
    /// Numeric cookie id, unique within its context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Creation time in seconds since the epoch.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Hex secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let id = parts.next()?.parse().ok()?;
        let created = parts.next()?.parse().ok()?;
        let secret = parts.next()?.to_owned();
        Some(Self {
            id,
            created,
            secret,
        })
    }

    fn usable_at(&self, now: u64) -> bool {
        self.created <= now + MAX_TIME_TRAVEL.as_secs()
            && self.created + COOKIE_EXPIRY.as_secs() >= now
    }
}

/// Directory of cookie files.
#[derive(Debug, Clone)]
pub struct Keyring {
    dir: PathBuf,
}

impl Keyring {
    /// Keyring rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$HOME/.dbus-keyrings`.
    pub fn user_default() -> Result<Self, AuthError> {
        dirs::home_dir()
            .map(|home| Self::new(home.join(".dbus-keyrings")))
            .ok_or_else(|| AuthError::Io(io::Error::new(io::ErrorKind::NotFound, "no home directory")))
    }

    /// Directory holding the context files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Secret of cookie `id` in `context`, if present and not expired.
    pub fn find(&self, context: &str, id: &str) -> Result<String, AuthError> {
        check_context(context)?;
        let not_found = || AuthError::CookieNotFound {
            context: context.to_owned(),
            id: id.to_owned(),
        };
        let text = match fs::read_to_string(self.dir.join(context)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };
        let now = unix_now();
        text.lines()
            .filter_map(Cookie::parse)
            .find(|cookie| cookie.id.to_string() == id)
            .filter(|cookie| cookie.usable_at(now))
            .map(|cookie| cookie.secret)
            .ok_or_else(not_found)
    }

    /// Create a fresh cookie in `context`, pruning stale ones.
    pub fn add(&self, context: &str) -> Result<Cookie, AuthError> {
        check_context(context)?;
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)?;

        let file = self.dir.join(context);
        let _lock = LockFile::acquire(self.dir.join(format!("{context}.lock")))?;

        let now = unix_now();
        let mut cookies: Vec<Cookie> = match fs::read_to_string(&file) {
            Ok(text) => text.lines().filter_map(Cookie::parse).collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        cookies.retain(|cookie| {
            cookie.created + COOKIE_TIMEOUT.as_secs() > now
                && cookie.created <= now + MAX_TIME_TRAVEL.as_secs()
        });

        let cookie = Cookie {
            id: cookies.iter().map(|c| c.id).max().map_or(1, |max| max + 1),
            created: now,
            secret: random_hex(),
        };
        cookies.push(cookie.clone());

        let temp = self.dir.join(format!("{context}.temp"));
        {
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp)?;
            for entry in &cookies {
                writeln!(out, "{} {} {}", entry.id, entry.created, entry.secret)?;
            }
            out.sync_all()?;
        }
        fs::rename(&temp, &file)?;
        debug!(context, id = cookie.id, "added keyring cookie");
        Ok(cookie)
    }
}

struct LockFile(PathBuf);

impl LockFile {
    fn acquire(path: PathBuf) -> Result<Self, AuthError> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match OpenOptions::new().write(true).create_new(true).mode(0o600).open(&path) {
                Ok(_) => return Ok(Self(path)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        // A stale lock from a crashed writer; take it over.
                        warn!(lock = %path.display(), "breaking stale keyring lock");
                        fs::remove_file(&path)?;
                        continue;
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn check_context(context: &str) -> Result<(), AuthError> {
    let bad = context.is_empty()
        || context
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '.' | ' ' | '\n' | '\r' | '\t'));
    if bad {
        return Err(AuthError::Protocol(format!(
            "invalid keyring context {context:?}"
        )));
    }
    Ok(())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Hex SHA-1 of `input`.
pub(crate) fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}

/// Fresh random hex token for cookies and challenges.
pub(crate) fn random_hex() -> String {
    let mut hasher = Sha1::new();
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_cookie_can_be_found() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path().join("keyrings"));

        let first = keyring.add("ctx").unwrap();
        let second = keyring.add("ctx").unwrap();
        assert_eq!(second.id(), first.id() + 1);

        assert_eq!(keyring.find("ctx", &first.id().to_string()).unwrap(), first.secret());
        assert_eq!(keyring.find("ctx", &second.id().to_string()).unwrap(), second.secret());
        assert!(!dir.path().join("keyrings/ctx.lock").exists());
        assert!(!dir.path().join("keyrings/ctx.temp").exists());
    }

    #[test]
    fn expired_and_future_cookies_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path());
        let now = unix_now();
        let old = now - COOKIE_EXPIRY.as_secs() - 10;
        let future = now + MAX_TIME_TRAVEL.as_secs() + 10;
        fs::write(
            dir.path().join("ctx"),
            format!("1 {old} aaaa\n2 {future} bbbb\n3 {now} cccc\n"),
        )
        .unwrap();

        assert!(matches!(keyring.find("ctx", "1"), Err(AuthError::CookieNotFound { .. })));
        assert!(matches!(keyring.find("ctx", "2"), Err(AuthError::CookieNotFound { .. })));
        assert_eq!(keyring.find("ctx", "3").unwrap(), "cccc");
    }

    #[test]
    fn add_prunes_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path());
        let stale = unix_now() - COOKIE_TIMEOUT.as_secs() - 1;
        fs::write(dir.path().join("ctx"), format!("7 {stale} dead\n")).unwrap();

        let cookie = keyring.add("ctx").unwrap();
        let text = fs::read_to_string(dir.path().join("ctx")).unwrap();
        assert!(!text.contains("dead"));
        assert_eq!(text.lines().count(), 1);
        assert_eq!(cookie.id(), 1);
    }

    #[test]
    fn bad_context_names_are_refused() {
        let keyring = Keyring::new("/nonexistent");
        assert!(matches!(keyring.find("../etc", "1"), Err(AuthError::Protocol(_))));
        assert!(matches!(keyring.add("a b"), Err(AuthError::Protocol(_))));
    }

    #[test]
    fn random_tokens_differ() {
        assert_ne!(random_hex(), random_hex());
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
