//! Conversions between Rust types and [`Value`].
//!
//! [`Type`] gives the static signature of a Rust type, `Into<Value>` builds
//! the dynamic form and [`FromValue`] takes it apart again. Message bodies are
//! converted as a whole through [`IntoBody`] and [`FromBody`], implemented for
//! tuples so that `(u32, String)` maps to the body signature `us`.

use std::collections::HashMap;
use std::hash::Hash;

use super::signature::{Signature, SignatureType};
use super::value::{Array, Dict};
use super::{MarshalError, ObjectPath, Value};

/// Rust types with a fixed wire type.
pub trait Type {
    /// Wire type of every value of `Self`.
    fn signature_type() -> SignatureType;

    /// Single-type signature of `Self`.
    fn signature() -> Signature {
        Signature::from_types(&[Self::signature_type()])
    }
}

/// Extract a Rust value from a [`Value`].
pub trait FromValue: Sized {
    /// Convert, failing when the value has a different type.
    fn from_value(value: Value) -> Result<Self, MarshalError>;
}

fn mismatch(expected: &SignatureType, found: &Value) -> MarshalError {
    MarshalError::SignatureMismatch {
        expected: expected.to_string(),
        found: found.signature_type().to_string(),
    }
}

macro_rules! impl_basic {
    ($($ty:ty => $variant:ident, $sig:ident;)*) => {
        $(
            impl Type for $ty {
                fn signature_type() -> SignatureType {
                    SignatureType::$sig
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, MarshalError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(&SignatureType::$sig, &other)),
                    }
                }
            }
        )*
    };
}

impl_basic! {
    u8 => Byte, Byte;
    bool => Bool, Bool;
    i16 => Int16, Int16;
    u16 => UInt16, UInt16;
    i32 => Int32, Int32;
    u32 => UInt32, UInt32;
    i64 => Int64, Int64;
    u64 => UInt64, UInt64;
    f64 => Double, Double;
    String => Str, String;
    ObjectPath => ObjectPath, ObjectPath;
    Signature => Signature, Signature;
}

impl Type for &str {
    fn signature_type() -> SignatureType {
        SignatureType::String
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        Ok(value)
    }
}

/// A value that travels as `v`, carrying its own signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant(pub Value);

impl Variant {
    /// Wrap anything convertible into a value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Unwrap the carried value.
    #[must_use]
    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl Type for Variant {
    fn signature_type() -> SignatureType {
        SignatureType::Variant
    }
}

impl From<Variant> for Value {
    fn from(v: Variant) -> Self {
        Value::Variant(Box::new(v.0))
    }
}

impl FromValue for Variant {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Variant(inner) => Ok(Self(*inner)),
            other => Err(mismatch(&SignatureType::Variant, &other)),
        }
    }
}

impl<T: Type> Type for Vec<T> {
    fn signature_type() -> SignatureType {
        SignatureType::Array(Box::new(T::signature_type()))
    }
}

impl<T: Type + Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(Array::from_parts_unchecked(
            T::signature_type(),
            items.into_iter().map(Into::into).collect(),
        ))
    }
}

impl<T: Type + FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Array(array) => array.into_items().into_iter().map(T::from_value).collect(),
            other => Err(mismatch(&Self::signature_type(), &other)),
        }
    }
}

impl<K: Type, V: Type, S> Type for HashMap<K, V, S> {
    fn signature_type() -> SignatureType {
        SignatureType::Dict(Box::new(K::signature_type()), Box::new(V::signature_type()))
    }
}

impl<K, V, S> From<HashMap<K, V, S>> for Value
where
    K: Type + Into<Value>,
    V: Type + Into<Value>,
{
    fn from(map: HashMap<K, V, S>) -> Self {
        Value::Dict(Dict::from_parts_unchecked(
            K::signature_type(),
            V::signature_type(),
            map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

impl<K, V, S> FromValue for HashMap<K, V, S>
where
    K: Type + FromValue + Eq + Hash,
    V: Type + FromValue,
    S: std::hash::BuildHasher + Default,
{
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Dict(dict) => dict
                .into_entries()
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch(&Self::signature_type(), &other)),
        }
    }
}

/// Types that form a whole message body.
pub trait IntoBody {
    /// Body values in order.
    fn into_body(self) -> Vec<Value>;
}

/// Types a whole message body converts into.
pub trait FromBody: Sized {
    /// Convert the decoded body.
    fn from_body(values: Vec<Value>) -> Result<Self, MarshalError>;
}

/// Bodies whose signature is known statically.
pub trait BodyType {
    /// Wire type of each body value, in order.
    fn body_types() -> Vec<SignatureType>;

    /// Concatenated body signature.
    fn body_signature() -> Signature {
        Signature::from_types(&Self::body_types())
    }
}

impl BodyType for () {
    fn body_types() -> Vec<SignatureType> {
        Vec::new()
    }
}

impl IntoBody for Vec<Value> {
    fn into_body(self) -> Vec<Value> {
        self
    }
}

impl FromBody for Vec<Value> {
    fn from_body(values: Vec<Value>) -> Result<Self, MarshalError> {
        Ok(values)
    }
}

impl IntoBody for () {
    fn into_body(self) -> Vec<Value> {
        Vec::new()
    }
}

impl FromBody for () {
    fn from_body(values: Vec<Value>) -> Result<Self, MarshalError> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(MarshalError::SignatureMismatch {
                expected: String::new(),
                found: Value::signature_of(&values).to_string(),
            })
        }
    }
}

macro_rules! impl_tuple {
    ($len:expr; $($name:ident),+) => {
        impl<$($name: Type),+> Type for ($($name,)+) {
            fn signature_type() -> SignatureType {
                SignatureType::Struct(vec![$($name::signature_type()),+])
            }
        }

        impl<$($name: Into<Value>),+> From<($($name,)+)> for Value {
            #[allow(non_snake_case)]
            fn from(tuple: ($($name,)+)) -> Self {
                let ($($name,)+) = tuple;
                Value::Struct(vec![$($name.into()),+])
            }
        }

        impl<$($name: FromValue),+> FromValue for ($($name,)+) {
            fn from_value(value: Value) -> Result<Self, MarshalError> {
                match value {
                    Value::Struct(fields) if fields.len() == $len => {
                        FromBody::from_body(fields)
                    }
                    other => Err(MarshalError::SignatureMismatch {
                        expected: format!("struct of {} fields", $len),
                        found: other.signature_type().to_string(),
                    }),
                }
            }
        }

        impl<$($name: Type),+> BodyType for ($($name,)+) {
            fn body_types() -> Vec<SignatureType> {
                vec![$($name::signature_type()),+]
            }
        }

        impl<$($name: Into<Value>),+> IntoBody for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_body(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }

        impl<$($name: FromValue),+> FromBody for ($($name,)+) {
            #[allow(non_snake_case)]
            fn from_body(values: Vec<Value>) -> Result<Self, MarshalError> {
                let [$($name),+]: [Value; $len] = values.try_into().map_err(|values: Vec<Value>| {
                    MarshalError::SignatureMismatch {
                        expected: format!("{} body values", $len),
                        found: Value::signature_of(&values).to_string(),
                    }
                })?;
                Ok(($($name::from_value($name)?,)+))
            }
        }
    };
}

impl_tuple!(1; A);
impl_tuple!(2; A, B);
impl_tuple!(3; A, B, C);
impl_tuple!(4; A, B, C, D);
impl_tuple!(5; A, B, C, D, E);
impl_tuple!(6; A, B, C, D, E, F);
impl_tuple!(7; A, B, C, D, E, F, G);
impl_tuple!(8; A, B, C, D, E, F, G, H);
