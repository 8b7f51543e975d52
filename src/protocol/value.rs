//! Dynamically typed values as carried in message bodies.

use std::fmt;

use super::signature::{Signature, SignatureType};
use super::{MarshalError, ObjectPath};

/// A single marshallable value.
///
/// Containers remember their element types so that empty arrays and dicts
/// still have a signature.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `y`
    Byte(u8),
    /// `b`
    Bool(bool),
    /// `n`
    Int16(i16),
    /// `q`
    UInt16(u16),
    /// `i`
    Int32(i32),
    /// `u`
    UInt32(u32),
    /// `x`
    Int64(i64),
    /// `t`
    UInt64(u64),
    /// `d`
    Double(f64),
    /// `s`
    Str(String),
    /// `o`
    ObjectPath(ObjectPath),
    /// `g`
    Signature(Signature),
    /// `aX` (other than dicts)
    Array(Array),
    /// `a{KV}`
    Dict(Dict),
    /// `(...)`
    Struct(Vec<Value>),
    /// `v`
    Variant(Box<Value>),
    /// `h`, an index into the message's descriptor list
    UnixFd(u32),
}

/// Homogeneous array of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element: SignatureType,
    items: Vec<Value>,
}

impl Array {
    /// Build an array, checking every item against `element`.
    pub fn new(element: SignatureType, items: Vec<Value>) -> Result<Self, MarshalError> {
        for item in &items {
            let found = item.signature_type();
            if found != element {
                return Err(MarshalError::SignatureMismatch {
                    expected: element.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(Self { element, items })
    }

    pub(crate) fn from_parts_unchecked(element: SignatureType, items: Vec<Value>) -> Self {
        Self { element, items }
    }

    /// Element type.
    #[must_use]
    pub fn element(&self) -> &SignatureType {
        &self.element
    }

    /// Items in order.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Take the items.
    #[must_use]
    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}

/// Dictionary as an ordered list of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Dict {
    key: SignatureType,
    value: SignatureType,
    entries: Vec<(Value, Value)>,
}

impl Dict {
    /// Build a dict, checking every entry against the key and value types.
    pub fn new(
        key: SignatureType,
        value: SignatureType,
        entries: Vec<(Value, Value)>,
    ) -> Result<Self, MarshalError> {
        if !key.is_basic() {
            return Err(MarshalError::InvalidSignature {
                signature: key.to_string(),
                reason: "dict key must be a basic type",
            });
        }
        for (k, v) in &entries {
            for (want, have) in [(&key, k), (&value, v)] {
                let found = have.signature_type();
                if &found != want {
                    return Err(MarshalError::SignatureMismatch {
                        expected: want.to_string(),
                        found: found.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            key,
            value,
            entries,
        })
    }

    pub(crate) fn from_parts_unchecked(
        key: SignatureType,
        value: SignatureType,
        entries: Vec<(Value, Value)>,
    ) -> Self {
        Self {
            key,
            value,
            entries,
        }
    }

    /// Key type.
    #[must_use]
    pub fn key_type(&self) -> &SignatureType {
        &self.key
    }

    /// Value type.
    #[must_use]
    pub fn value_type(&self) -> &SignatureType {
        &self.value
    }

    /// Entries in wire order.
    #[must_use]
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Take the entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Value, Value)> {
        self.entries
    }

    /// First value stored under a string key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl Value {
    /// Type of this value.
    #[must_use]
    pub fn signature_type(&self) -> SignatureType {
        match self {
            Self::Byte(_) => SignatureType::Byte,
            Self::Bool(_) => SignatureType::Bool,
            Self::Int16(_) => SignatureType::Int16,
            Self::UInt16(_) => SignatureType::UInt16,
            Self::Int32(_) => SignatureType::Int32,
            Self::UInt32(_) => SignatureType::UInt32,
            Self::Int64(_) => SignatureType::Int64,
            Self::UInt64(_) => SignatureType::UInt64,
            Self::Double(_) => SignatureType::Double,
            Self::Str(_) => SignatureType::String,
            Self::ObjectPath(_) => SignatureType::ObjectPath,
            Self::Signature(_) => SignatureType::Signature,
            Self::Array(array) => SignatureType::Array(Box::new(array.element.clone())),
            Self::Dict(dict) => {
                SignatureType::Dict(Box::new(dict.key.clone()), Box::new(dict.value.clone()))
            }
            Self::Struct(fields) => {
                SignatureType::Struct(fields.iter().map(Self::signature_type).collect())
            }
            Self::Variant(_) => SignatureType::Variant,
            Self::UnixFd(_) => SignatureType::UnixFd,
        }
    }

    /// Signature of a sequence of values, as written in a message header.
    #[must_use]
    pub fn signature_of(values: &[Value]) -> Signature {
        let types: Vec<SignatureType> = values.iter().map(Self::signature_type).collect();
        Signature::from_types(&types)
    }

    /// Wrap in a variant.
    #[must_use]
    pub fn into_variant(self) -> Self {
        Self::Variant(Box::new(self))
    }

    /// Borrow string-like contents (`s`, `o`, `g`).
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::ObjectPath(p) => Some(p.as_str()),
            Self::Signature(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric contents widened to `i64`, `None` for non-integers and `t` above `i64::MAX`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Byte(v) => Some(i64::from(v)),
            Self::Int16(v) => Some(i64::from(v)),
            Self::UInt16(v) => Some(i64::from(v)),
            Self::Int32(v) => Some(i64::from(v)),
            Self::UInt32(v) => Some(i64::from(v)),
            Self::Int64(v) => Some(v),
            Self::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Look through any number of variant wrappers.
    #[must_use]
    pub fn peel(&self) -> &Self {
        let mut current = self;
        while let Self::Variant(inner) = current {
            current = inner;
        }
        current
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::ObjectPath(v) => write!(f, "{v}"),
            Self::Signature(v) => write!(f, "<{v}>"),
            Self::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Dict(dict) => {
                f.write_str("{")?;
                for (i, (k, v)) in dict.entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Struct(fields) => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            Self::Variant(inner) => write!(f, "<{}: {inner}>", inner.signature_type()),
            Self::UnixFd(idx) => write!(f, "fd#{idx}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_signatures() {
        let arr = Array::new(SignatureType::Int32, vec![Value::Int32(1), Value::Int32(2)]).unwrap();
        assert_eq!(Value::Array(arr).signature_type().to_string(), "ai");

        let empty = Dict::new(SignatureType::String, SignatureType::Variant, vec![]).unwrap();
        assert_eq!(Value::Dict(empty).signature_type().to_string(), "a{sv}");

        let body = [
            Value::Str("x".into()),
            Value::Struct(vec![Value::Byte(1), Value::Double(2.0)]),
        ];
        assert_eq!(Value::signature_of(&body).as_str(), "s(yd)");
    }

    #[test]
    fn heterogeneous_array_rejected() {
        let err = Array::new(SignatureType::Int32, vec![Value::Int32(1), Value::Str("no".into())]);
        assert!(matches!(err, Err(MarshalError::SignatureMismatch { .. })));
        assert!(Dict::new(SignatureType::Variant, SignatureType::Int32, vec![]).is_err());
    }

    #[test]
    fn peel_nested_variants() {
        let v = Value::UInt32(7).into_variant().into_variant();
        assert_eq!(v.peel(), &Value::UInt32(7));
        assert_eq!(v.signature_type(), SignatureType::Variant);
    }
}
