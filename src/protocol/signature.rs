//! Type signatures: parsing, validation and alignment rules.

use std::fmt;
use std::str::FromStr;

use super::MarshalError;

/// Longest signature the protocol allows.
pub const MAX_SIGNATURE_LEN: usize = 255;
/// Deepest array or struct nesting the protocol allows (each).
pub const MAX_CONTAINER_DEPTH: usize = 32;

/// One complete type out of a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// `y`
    Byte,
    /// `b`
    Bool,
    /// `n`
    Int16,
    /// `q`
    UInt16,
    /// `i`
    Int32,
    /// `u`
    UInt32,
    /// `x`
    Int64,
    /// `t`
    UInt64,
    /// `d`
    Double,
    /// `s`
    String,
    /// `o`
    ObjectPath,
    /// `g`
    Signature,
    /// `h`
    UnixFd,
    /// `v`
    Variant,
    /// `aX`
    Array(Box<SignatureType>),
    /// `a{KV}`
    Dict(Box<SignatureType>, Box<SignatureType>),
    /// `(...)`
    Struct(Vec<SignatureType>),
}

impl SignatureType {
    /// Boundary the value must start on.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        match self {
            Self::Byte | Self::Signature | Self::Variant => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Bool
            | Self::Int32
            | Self::UInt32
            | Self::UnixFd
            | Self::String
            | Self::ObjectPath
            | Self::Array(_)
            | Self::Dict(..) => 4,
            Self::Int64 | Self::UInt64 | Self::Double | Self::Struct(_) => 8,
        }
    }

    /// Whether this is a basic (non-container) type usable as a dict key.
    #[must_use]
    pub const fn is_basic(&self) -> bool {
        !matches!(
            self,
            Self::Variant | Self::Array(_) | Self::Dict(..) | Self::Struct(_)
        )
    }

    /// Whether values of this type always occupy the same number of bytes.
    #[must_use]
    pub fn is_fixed_size(&self) -> bool {
        match self {
            Self::Byte
            | Self::Bool
            | Self::Int16
            | Self::UInt16
            | Self::Int32
            | Self::UInt32
            | Self::Int64
            | Self::UInt64
            | Self::Double
            | Self::UnixFd => true,
            Self::Struct(fields) => fields.iter().all(Self::is_fixed_size),
            _ => false,
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Self::Byte => out.push('y'),
            Self::Bool => out.push('b'),
            Self::Int16 => out.push('n'),
            Self::UInt16 => out.push('q'),
            Self::Int32 => out.push('i'),
            Self::UInt32 => out.push('u'),
            Self::Int64 => out.push('x'),
            Self::UInt64 => out.push('t'),
            Self::Double => out.push('d'),
            Self::String => out.push('s'),
            Self::ObjectPath => out.push('o'),
            Self::Signature => out.push('g'),
            Self::UnixFd => out.push('h'),
            Self::Variant => out.push('v'),
            Self::Array(inner) => {
                out.push('a');
                inner.write_to(out);
            }
            Self::Dict(key, value) => {
                out.push_str("a{");
                key.write_to(out);
                value.write_to(out);
                out.push('}');
            }
            Self::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write_to(out);
                }
                out.push(')');
            }
        }
    }

    /// Signature text of this single type.
    #[must_use]
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_signature_string())
    }
}

/// A validated signature string (zero or more complete types).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signature(String);

impl Signature {
    /// Validate and wrap a signature string.
    pub fn new(text: impl Into<String>) -> Result<Self, MarshalError> {
        let text = text.into();
        parse_signature(&text)?;
        Ok(Self(text))
    }

    /// The empty signature (no body).
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Build from already parsed types.
    #[must_use]
    pub fn from_types(types: &[SignatureType]) -> Self {
        let mut out = String::new();
        for ty in types {
            ty.write_to(&mut out);
        }
        Self(out)
    }

    pub(crate) fn from_string_unchecked(text: String) -> Self {
        Self(text)
    }

    /// Signature text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the signature describes no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse into complete types.
    pub fn types(&self) -> Result<Vec<SignatureType>, MarshalError> {
        parse_signature(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Signature {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Signature {
    type Error = MarshalError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse a signature into its sequence of complete types.
pub fn parse_signature(text: &str) -> Result<Vec<SignatureType>, MarshalError> {
    if text.len() > MAX_SIGNATURE_LEN {
        return Err(invalid(text, "longer than 255 bytes"));
    }
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    };
    let mut types = Vec::new();
    while parser.pos < parser.bytes.len() {
        types.push(parser.parse_one(0, 0)?);
    }
    Ok(types)
}

/// Parse a signature that must hold exactly one complete type.
pub fn parse_single(text: &str) -> Result<SignatureType, MarshalError> {
    let mut types = parse_signature(text)?;
    if types.len() != 1 {
        return Err(invalid(text, "expected exactly one complete type"));
    }
    Ok(types.remove(0))
}

fn invalid(text: &str, reason: &'static str) -> MarshalError {
    MarshalError::InvalidSignature {
        signature: text.to_owned(),
        reason,
    }
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<u8, MarshalError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| invalid(self.text, "truncated type"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn parse_one(
        &mut self,
        array_depth: usize,
        struct_depth: usize,
    ) -> Result<SignatureType, MarshalError> {
        let code = self.next()?;
        let ty = match code {
            b'y' => SignatureType::Byte,
            b'b' => SignatureType::Bool,
            b'n' => SignatureType::Int16,
            b'q' => SignatureType::UInt16,
            b'i' => SignatureType::Int32,
            b'u' => SignatureType::UInt32,
            b'x' => SignatureType::Int64,
            b't' => SignatureType::UInt64,
            b'd' => SignatureType::Double,
            b's' => SignatureType::String,
            b'o' => SignatureType::ObjectPath,
            b'g' => SignatureType::Signature,
            b'h' => SignatureType::UnixFd,
            b'v' => SignatureType::Variant,
            b'a' => {
                if array_depth + 1 > MAX_CONTAINER_DEPTH {
                    return Err(invalid(self.text, "array nesting too deep"));
                }
                if self.bytes.get(self.pos) == Some(&b'{') {
                    self.pos += 1;
                    let key = self.parse_one(array_depth + 1, struct_depth)?;
                    if !key.is_basic() {
                        return Err(invalid(self.text, "dict key must be a basic type"));
                    }
                    let value = self.parse_one(array_depth + 1, struct_depth)?;
                    if self.next()? != b'}' {
                        return Err(invalid(self.text, "dict entry must have exactly two types"));
                    }
                    SignatureType::Dict(Box::new(key), Box::new(value))
                } else {
                    SignatureType::Array(Box::new(self.parse_one(array_depth + 1, struct_depth)?))
                }
            }
            b'(' => {
                if struct_depth + 1 > MAX_CONTAINER_DEPTH {
                    return Err(invalid(self.text, "struct nesting too deep"));
                }
                let mut fields = Vec::new();
                loop {
                    match self.bytes.get(self.pos) {
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => fields.push(self.parse_one(array_depth, struct_depth + 1)?),
                        None => return Err(invalid(self.text, "unterminated struct")),
                    }
                }
                if fields.is_empty() {
                    return Err(invalid(self.text, "empty struct"));
                }
                SignatureType::Struct(fields)
            }
            b'{' => return Err(invalid(self.text, "dict entry outside of array")),
            b')' | b'}' => return Err(invalid(self.text, "unbalanced closing bracket")),
            _ => return Err(invalid(self.text, "unknown type code")),
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_containers() {
        let types = parse_signature("a{sv}(ius)aay").unwrap();
        assert_eq!(types.len(), 3);
        assert_eq!(
            types[0],
            SignatureType::Dict(Box::new(SignatureType::String), Box::new(SignatureType::Variant))
        );
        assert_eq!(Signature::from_types(&types).as_str(), "a{sv}(ius)aay");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["a", "(", "()", "a{vs}", "{ss}", "a{sss}", "z", "(i", "i)"] {
            assert!(Signature::new(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_excessive_nesting() {
        let deep = "a".repeat(33) + "y";
        assert!(Signature::new(deep).is_err());
        let ok = "a".repeat(32) + "y";
        assert!(Signature::new(ok).is_ok());
        let structs = "(".repeat(33) + "y" + &")".repeat(33);
        assert!(Signature::new(structs).is_err());
    }

    #[test]
    fn fixed_size_classification() {
        assert!(parse_single("(iyd)").unwrap().is_fixed_size());
        assert!(!parse_single("(is)").unwrap().is_fixed_size());
        assert_eq!(parse_single("(y)").unwrap().alignment(), 8);
        assert_eq!(parse_single("ay").unwrap().alignment(), 4);
    }
}
