//! Message kinds, header flags and byte order

use std::fmt;

/// Message kinds carried in the second header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageType {
    /// Method invocation, expects a reply unless flagged otherwise
    MethodCall = 1,
    /// Successful reply to a method call
    MethodReturn = 2,
    /// Error reply to a method call
    Error = 3,
    /// Broadcast or unicast notification
    Signal = 4,
}

impl MessageType {
    /// Kind for a header byte; `None` for unknown kinds, which receivers skip.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::MethodCall),
            2 => Some(Self::MethodReturn),
            3 => Some(Self::Error),
            4 => Some(Self::Signal),
            _ => None,
        }
    }

    /// Header byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this message type is a reply to a call
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::MethodReturn | Self::Error)
    }

    /// Name used in match rules (`type='signal'`)
    #[must_use]
    pub const fn rule_name(self) -> &'static str {
        match self {
            Self::MethodCall => "method_call",
            Self::MethodReturn => "method_return",
            Self::Error => "error",
            Self::Signal => "signal",
        }
    }

    /// Parse the match-rule spelling of a message type
    #[must_use]
    pub fn from_rule_name(name: &str) -> Option<Self> {
        match name {
            "method_call" => Some(Self::MethodCall),
            "method_return" => Some(Self::MethodReturn),
            "error" => Some(Self::Error),
            "signal" => Some(Self::Signal),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MethodCall => "method call",
            Self::MethodReturn => "method return",
            Self::Error => "error",
            Self::Signal => "signal",
        })
    }
}

/// Header flag byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    /// Bits this engine understands.
    pub const VALID_MASK: u8 =
        Self::NO_REPLY_EXPECTED | Self::NO_AUTO_START | Self::ALLOW_INTERACTIVE_AUTHORIZATION;
    /// Caller does not want a reply
    pub const NO_REPLY_EXPECTED: u8 = 0x1;
    /// The bus must not launch an owner for the destination
    pub const NO_AUTO_START: u8 = 0x2;
    /// Caller is prepared to wait for interactive authorization
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: u8 = 0x4;

    /// No flags set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from byte, ignoring unknown bits as the protocol requires
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        Self(value & Self::VALID_MASK)
    }

    /// Raw byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Add `flag`.
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        debug_assert!(flag & !Self::VALID_MASK == 0, "invalid flag bit");
        self.0 |= flag;
        self
    }

    /// Whether `flag` is set.
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Check if the sender expects no reply
    #[must_use]
    pub const fn no_reply_expected(self) -> bool {
        self.has(Self::NO_REPLY_EXPECTED)
    }

    /// Check if auto-start is suppressed
    #[must_use]
    pub const fn no_auto_start(self) -> bool {
        self.has(Self::NO_AUTO_START)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u8, &str); 3] = [
            (Flags::NO_REPLY_EXPECTED, "NO_REPLY_EXPECTED"),
            (Flags::NO_AUTO_START, "NO_AUTO_START"),
            (Flags::ALLOW_INTERACTIVE_AUTHORIZATION, "ALLOW_INTERACTIVE_AUTHORIZATION"),
        ];
        let mut set = NAMES.iter().filter(|(bit, _)| self.has(*bit)).map(|(_, name)| *name);
        match set.next() {
            None => f.write_str("NONE"),
            Some(first) => {
                f.write_str(first)?;
                set.try_for_each(|name| write!(f, " | {name}"))
            }
        }
    }
}

/// Byte order of a message, announced by its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    /// `'l'`
    Little,
    /// `'B'`
    Big,
}

impl Endianness {
    /// Byte order of the running machine
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Marker byte written at offset 0
    #[must_use]
    pub const fn marker(self) -> u8 {
        match self {
            Self::Little => b'l',
            Self::Big => b'B',
        }
    }

    /// Parse the marker byte
    #[must_use]
    pub const fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'l' => Some(Self::Little),
            b'B' => Some(Self::Big),
            _ => None,
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Self::native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_header_bytes_and_rule_names() {
        for (byte, kind) in [
            (1, MessageType::MethodCall),
            (2, MessageType::MethodReturn),
            (3, MessageType::Error),
            (4, MessageType::Signal),
        ] {
            assert_eq!(kind.as_u8(), byte);
            assert_eq!(MessageType::from_u8(byte), Some(kind));
            assert_eq!(MessageType::from_rule_name(kind.rule_name()), Some(kind));
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(5), None);
        assert!(MessageType::Error.is_reply());
        assert!(!MessageType::Signal.is_reply());
    }

    #[test]
    fn unknown_flag_bits_are_dropped() {
        let flags = Flags::new().with(Flags::NO_REPLY_EXPECTED);
        assert!(flags.no_reply_expected());
        assert!(!flags.no_auto_start());
        assert_eq!(Flags::from_u8(0xF1).as_u8(), 0x1);
        assert_eq!(flags.to_string(), "NO_REPLY_EXPECTED");
        assert_eq!(Flags::new().to_string(), "NONE");
        assert_eq!(
            Flags::from_u8(0x3).to_string(),
            "NO_REPLY_EXPECTED | NO_AUTO_START"
        );
    }

    #[test]
    fn endian_markers() {
        assert_eq!(Endianness::from_marker(b'l'), Some(Endianness::Little));
        assert_eq!(Endianness::from_marker(b'B'), Some(Endianness::Big));
        assert_eq!(Endianness::from_marker(b'x'), None);
        assert_eq!(Endianness::native().marker(), if cfg!(target_endian = "big") { b'B' } else { b'l' });
    }
}
