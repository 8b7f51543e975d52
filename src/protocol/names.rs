//! Object paths and bus/interface/member/error name validation.

use std::fmt;
use std::str::FromStr;

use super::{Error, MarshalError, Result};

/// Longest name (bus, interface, member, error) the protocol allows.
pub const MAX_NAME_LEN: usize = 255;

/// A validated object path such as `/org/example/Thing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate and wrap a path.
    pub fn new(path: impl Into<String>) -> std::result::Result<Self, MarshalError> {
        let path = path.into();
        if is_valid_object_path(&path) {
            Ok(Self(path))
        } else {
            Err(MarshalError::InvalidObjectPath(path))
        }
    }

    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Path text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Parent path, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_owned())),
            None => None,
        }
    }

    /// Non-empty path segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Append one segment.
    pub fn join(&self, segment: &str) -> std::result::Result<Self, MarshalError> {
        if self.is_root() {
            Self::new(format!("/{segment}"))
        } else {
            Self::new(format!("{}/{segment}", self.0))
        }
    }

    /// Whether `other` equals this path or lies below it.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &ObjectPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectPath {
    type Err = MarshalError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = MarshalError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = MarshalError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `/` or `/seg(/seg)*` with segments of `[A-Za-z0-9_]+`.
#[must_use]
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/')
        .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
}

fn is_element_char(b: u8, allow_dash: bool) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || (allow_dash && b == b'-')
}

fn dotted_name(name: &str, allow_dash: bool, allow_leading_digit: bool) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut count = 0;
    for element in name.split('.') {
        count += 1;
        let bytes = element.as_bytes();
        let Some(first) = bytes.first() else {
            return false;
        };
        if first.is_ascii_digit() && !allow_leading_digit {
            return false;
        }
        if !bytes.iter().all(|&b| is_element_char(b, allow_dash)) {
            return false;
        }
    }
    count >= 2
}

/// Interface names: at least two dot-separated elements, none starting with a digit.
#[must_use]
pub fn is_valid_interface_name(name: &str) -> bool {
    dotted_name(name, false, false)
}

/// Error names follow the interface name grammar.
#[must_use]
pub fn is_valid_error_name(name: &str) -> bool {
    is_valid_interface_name(name)
}

/// Member names: one element of `[A-Za-z0-9_]`, not starting with a digit.
#[must_use]
pub fn is_valid_member_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some(_) => name.len() <= MAX_NAME_LEN && bytes.iter().all(|&b| is_element_char(b, false)),
    }
}

/// Unique connection names such as `:1.42`.
#[must_use]
pub fn is_valid_unique_name(name: &str) -> bool {
    name.strip_prefix(':')
        .is_some_and(|rest| dotted_name(rest, true, true) && name.len() <= MAX_NAME_LEN)
}

/// Well-known or unique bus names.
#[must_use]
pub fn is_valid_bus_name(name: &str) -> bool {
    if name.starts_with(':') {
        is_valid_unique_name(name)
    } else {
        dotted_name(name, true, false)
    }
}

fn check(valid: bool, kind: &'static str, name: &str) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName {
            kind,
            name: name.to_owned(),
        })
    }
}

/// Fail with [`Error::InvalidName`] unless `name` is a bus name.
pub fn check_bus_name(name: &str) -> Result<()> {
    check(is_valid_bus_name(name), "bus", name)
}

/// Fail with [`Error::InvalidName`] unless `name` is an interface name.
pub fn check_interface_name(name: &str) -> Result<()> {
    check(is_valid_interface_name(name), "interface", name)
}

/// Fail with [`Error::InvalidName`] unless `name` is a member name.
pub fn check_member_name(name: &str) -> Result<()> {
    check(is_valid_member_name(name), "member", name)
}

/// Fail with [`Error::InvalidName`] unless `name` is an error name.
pub fn check_error_name(name: &str) -> Result<()> {
    check(is_valid_error_name(name), "error", name)
}
