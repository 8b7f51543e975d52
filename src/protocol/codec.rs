//! Wire marshalling of values (encode/decode)
//!
//! Every value starts on its natural boundary, counted from the start of the
//! buffer. Message bodies start 8-aligned on the wire, so encoding a body into
//! a fresh buffer gives the same padding it has inside the full message.
//!
//! # Format
//!
//! ```text
//! y b n q i u x t d   fixed-size, aligned to their size (b as u32)
//! s o                 u32 length, bytes, NUL
//! g                   u8 length, bytes, NUL
//! a                   u32 byte length, padding to element boundary, elements
//! a{..}               as arrays, each entry 8-aligned
//! (..)                8-aligned, fields in order
//! v                   signature (as g), then the value
//! h                   u32 index into the out-of-band descriptor list
//! ```

use super::signature::{Signature, SignatureType, parse_single};
use super::types::Endianness;
use super::value::{Array, Dict};
use super::{MAX_ARRAY_LENGTH, MarshalError, ObjectPath, Value};

/// Deepest combined container nesting accepted, variants included.
pub const MAX_TOTAL_DEPTH: usize = 64;

/// Encode values into a buffer according to a signature.
///
/// # Errors
///
/// Fails if the values do not match the signature or an array exceeds the
/// protocol maximum.
pub fn encode(
    values: &[Value],
    signature: &Signature,
    endian: Endianness,
) -> Result<Vec<u8>, MarshalError> {
    let types = signature.types()?;
    if types.len() != values.len() {
        return Err(MarshalError::SignatureMismatch {
            expected: signature.to_string(),
            found: Value::signature_of(values).to_string(),
        });
    }
    let mut encoder = Encoder::new(endian);
    for (value, ty) in values.iter().zip(&types) {
        encoder.write_value(value, ty)?;
    }
    Ok(encoder.finish())
}

/// Decode a complete buffer according to a signature.
///
/// # Errors
///
/// Returns an error if:
/// - The buffer ends before the signature is satisfied
/// - The signature is malformed
/// - An array length exceeds `max_array_length`
/// - Bytes are left over after the last value
pub fn decode(
    bytes: &[u8],
    signature: &Signature,
    endian: Endianness,
    max_array_length: usize,
) -> Result<Vec<Value>, MarshalError> {
    let types = signature.types()?;
    let mut decoder = Decoder::new(bytes, endian).with_max_array_length(max_array_length);
    let mut values = Vec::with_capacity(types.len());
    for ty in &types {
        values.push(decoder.read_value(ty)?);
    }
    let left = decoder.remaining();
    if left != 0 {
        return Err(MarshalError::TrailingBytes(left));
    }
    Ok(values)
}

/// Streaming encoder over a growable buffer.
#[derive(Debug)]
pub struct Encoder {
    buf: Vec<u8>,
    endian: Endianness,
    depth: usize,
}

impl Encoder {
    /// Create an empty encoder.
    #[must_use]
    pub fn new(endian: Endianness) -> Self {
        Self {
            buf: Vec::with_capacity(128),
            endian,
            depth: 0,
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Pad with zeros to the next multiple of `align`.
    pub fn align(&mut self, align: usize) {
        let padded = self.buf.len().next_multiple_of(align);
        self.buf.resize(padded, 0);
    }

    /// Write a raw byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write an aligned `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.align(2);
        match self.endian {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    /// Write an aligned `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.align(4);
        match self.endian {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    /// Write an aligned `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.align(8);
        match self.endian {
            Endianness::Little => self.buf.extend_from_slice(&v.to_le_bytes()),
            Endianness::Big => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        let bytes = match self.endian {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        };
        self.buf[at..at + 4].copy_from_slice(&bytes);
    }

    fn put_str(&mut self, s: &str) -> Result<(), MarshalError> {
        if s.as_bytes().contains(&0) {
            return Err(MarshalError::InvalidString("embedded NUL"));
        }
        let len = u32::try_from(s.len()).map_err(|_| MarshalError::MessageTooLarge {
            size: s.len(),
            max: u32::MAX as usize,
        })?;
        self.put_u32(len);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn put_signature(&mut self, s: &str) -> Result<(), MarshalError> {
        let len = u8::try_from(s.len()).map_err(|_| MarshalError::InvalidSignature {
            signature: s.to_owned(),
            reason: "longer than 255 bytes",
        })?;
        self.buf.push(len);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn enter(&mut self) -> Result<(), MarshalError> {
        self.depth += 1;
        if self.depth > MAX_TOTAL_DEPTH {
            return Err(MarshalError::DepthExceeded(MAX_TOTAL_DEPTH));
        }
        Ok(())
    }

    /// Write one value, checking it against `ty`.
    pub fn write_value(&mut self, value: &Value, ty: &SignatureType) -> Result<(), MarshalError> {
        match (ty, value) {
            (SignatureType::Byte, Value::Byte(v)) => self.put_u8(*v),
            (SignatureType::Bool, Value::Bool(v)) => self.put_u32(u32::from(*v)),
            (SignatureType::Int16, Value::Int16(v)) => self.put_u16(*v as u16),
            (SignatureType::UInt16, Value::UInt16(v)) => self.put_u16(*v),
            (SignatureType::Int32, Value::Int32(v)) => self.put_u32(*v as u32),
            (SignatureType::UInt32, Value::UInt32(v)) => self.put_u32(*v),
            (SignatureType::Int64, Value::Int64(v)) => self.put_u64(*v as u64),
            (SignatureType::UInt64, Value::UInt64(v)) => self.put_u64(*v),
            (SignatureType::Double, Value::Double(v)) => self.put_u64(v.to_bits()),
            (SignatureType::UnixFd, Value::UnixFd(v)) => self.put_u32(*v),
            (SignatureType::String, Value::Str(s)) => self.put_str(s)?,
            (SignatureType::ObjectPath, Value::ObjectPath(p)) => self.put_str(p.as_str())?,
            (SignatureType::Signature, Value::Signature(s)) => self.put_signature(s.as_str())?,
            (SignatureType::Array(elem), Value::Array(array)) if **elem == *array.element() => {
                self.enter()?;
                self.write_array(elem, array.items().len(), |enc, i| {
                    enc.write_value(&array.items()[i], elem)
                })?;
                self.depth -= 1;
            }
            (SignatureType::Dict(key, val), Value::Dict(dict))
                if **key == *dict.key_type() && **val == *dict.value_type() =>
            {
                self.enter()?;
                let entry = SignatureType::Struct(Vec::new());
                self.write_array(&entry, dict.entries().len(), |enc, i| {
                    let (k, v) = &dict.entries()[i];
                    enc.align(8);
                    enc.write_value(k, key)?;
                    enc.write_value(v, val)
                })?;
                self.depth -= 1;
            }
            (SignatureType::Struct(field_types), Value::Struct(fields))
                if field_types.len() == fields.len() =>
            {
                self.enter()?;
                self.align(8);
                for (field, field_ty) in fields.iter().zip(field_types) {
                    self.write_value(field, field_ty)?;
                }
                self.depth -= 1;
            }
            (SignatureType::Variant, Value::Variant(inner)) => {
                self.enter()?;
                let inner_ty = inner.signature_type();
                self.put_signature(&inner_ty.to_signature_string())?;
                self.write_value(inner, &inner_ty)?;
                self.depth -= 1;
            }
            (expected, found) => {
                return Err(MarshalError::SignatureMismatch {
                    expected: expected.to_string(),
                    found: found.signature_type().to_string(),
                });
            }
        }
        Ok(())
    }

    fn write_array<F>(
        &mut self,
        elem: &SignatureType,
        count: usize,
        mut write: F,
    ) -> Result<(), MarshalError>
    where
        F: FnMut(&mut Self, usize) -> Result<(), MarshalError>,
    {
        self.put_u32(0);
        let len_at = self.buf.len() - 4;
        // padding after the length is not counted, even for empty arrays
        self.align(elem.alignment());
        let start = self.buf.len();
        for i in 0..count {
            write(self, i)?;
        }
        let length = self.buf.len() - start;
        if length > MAX_ARRAY_LENGTH {
            return Err(MarshalError::ArrayTooLong {
                length,
                max: MAX_ARRAY_LENGTH,
            });
        }
        self.patch_u32(len_at, length as u32);
        Ok(())
    }
}

/// Cursor-based decoder over a borrowed buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endianness,
    max_array_length: usize,
    unix_fds: Option<u32>,
    depth: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder positioned at offset 0.
    #[must_use]
    pub fn new(buf: &'a [u8], endian: Endianness) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
            max_array_length: MAX_ARRAY_LENGTH,
            unix_fds: None,
            depth: 0,
        }
    }

    /// Override the array length ceiling.
    #[must_use]
    pub fn with_max_array_length(mut self, max: usize) -> Self {
        self.max_array_length = max;
        self
    }

    /// Reject `h` indexes at or above `count`.
    #[must_use]
    pub fn with_unix_fds(mut self, count: u32) -> Self {
        self.unix_fds = Some(count);
        self
    }

    /// Current offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MarshalError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(MarshalError::Underrun {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Skip padding up to `align`, which must be zero bytes.
    pub fn align(&mut self, align: usize) -> Result<(), MarshalError> {
        let target = self.pos.next_multiple_of(align);
        let start = self.pos;
        let padding = self.take(target - start)?;
        if let Some(idx) = padding.iter().position(|&b| b != 0) {
            return Err(MarshalError::NonZeroPadding(start + idx));
        }
        Ok(())
    }

    /// Read a raw byte.
    pub fn get_u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    /// Read an aligned `u16`.
    pub fn get_u16(&mut self) -> Result<u16, MarshalError> {
        self.align(2)?;
        let raw: [u8; 2] = self.take(2)?.try_into().map_err(|_| self.underrun(2))?;
        Ok(match self.endian {
            Endianness::Little => u16::from_le_bytes(raw),
            Endianness::Big => u16::from_be_bytes(raw),
        })
    }

    /// Read an aligned `u32`.
    pub fn get_u32(&mut self) -> Result<u32, MarshalError> {
        self.align(4)?;
        let raw: [u8; 4] = self.take(4)?.try_into().map_err(|_| self.underrun(4))?;
        Ok(match self.endian {
            Endianness::Little => u32::from_le_bytes(raw),
            Endianness::Big => u32::from_be_bytes(raw),
        })
    }

    /// Read an aligned `u64`.
    pub fn get_u64(&mut self) -> Result<u64, MarshalError> {
        self.align(8)?;
        let raw: [u8; 8] = self.take(8)?.try_into().map_err(|_| self.underrun(8))?;
        Ok(match self.endian {
            Endianness::Little => u64::from_le_bytes(raw),
            Endianness::Big => u64::from_be_bytes(raw),
        })
    }

    fn underrun(&self, needed: usize) -> MarshalError {
        MarshalError::Underrun {
            offset: self.pos,
            needed,
            available: self.remaining(),
        }
    }

    fn get_text(&mut self, len: usize) -> Result<&'a str, MarshalError> {
        let raw = self.take(len + 1)?;
        let (text, nul) = raw.split_at(len);
        if nul != [0] {
            return Err(MarshalError::InvalidString("missing NUL terminator"));
        }
        if text.contains(&0) {
            return Err(MarshalError::InvalidString("embedded NUL"));
        }
        std::str::from_utf8(text).map_err(|_| MarshalError::InvalidString("invalid UTF-8"))
    }

    fn get_str(&mut self) -> Result<&'a str, MarshalError> {
        let len = self.get_u32()? as usize;
        self.get_text(len)
    }

    fn get_signature(&mut self) -> Result<&'a str, MarshalError> {
        let len = usize::from(self.get_u8()?);
        self.get_text(len)
    }

    fn enter(&mut self) -> Result<(), MarshalError> {
        self.depth += 1;
        if self.depth > MAX_TOTAL_DEPTH {
            return Err(MarshalError::DepthExceeded(MAX_TOTAL_DEPTH));
        }
        Ok(())
    }

    /// Read one value of type `ty`.
    pub fn read_value(&mut self, ty: &SignatureType) -> Result<Value, MarshalError> {
        let value = match ty {
            SignatureType::Byte => Value::Byte(self.get_u8()?),
            SignatureType::Bool => match self.get_u32()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(MarshalError::InvalidBoolean(other)),
            },
            SignatureType::Int16 => Value::Int16(self.get_u16()? as i16),
            SignatureType::UInt16 => Value::UInt16(self.get_u16()?),
            SignatureType::Int32 => Value::Int32(self.get_u32()? as i32),
            SignatureType::UInt32 => Value::UInt32(self.get_u32()?),
            SignatureType::Int64 => Value::Int64(self.get_u64()? as i64),
            SignatureType::UInt64 => Value::UInt64(self.get_u64()?),
            SignatureType::Double => Value::Double(f64::from_bits(self.get_u64()?)),
            SignatureType::UnixFd => {
                let index = self.get_u32()?;
                if let Some(count) = self.unix_fds {
                    if index >= count {
                        return Err(MarshalError::FdOutOfRange {
                            index,
                            available: count as usize,
                        });
                    }
                }
                Value::UnixFd(index)
            }
            SignatureType::String => Value::Str(self.get_str()?.to_owned()),
            SignatureType::ObjectPath => Value::ObjectPath(ObjectPath::new(self.get_str()?)?),
            SignatureType::Signature => Value::Signature(Signature::new(self.get_signature()?)?),
            SignatureType::Array(elem) => {
                self.enter()?;
                let items = self.read_array(elem, |dec| dec.read_value(elem))?;
                self.depth -= 1;
                Value::Array(Array::from_parts_unchecked((**elem).clone(), items))
            }
            SignatureType::Dict(key, val) => {
                self.enter()?;
                let entry = SignatureType::Struct(Vec::new());
                let entries = self.read_array(&entry, |dec| {
                    dec.align(8)?;
                    let k = dec.read_value(key)?;
                    let v = dec.read_value(val)?;
                    Ok((k, v))
                })?;
                self.depth -= 1;
                Value::Dict(Dict::from_parts_unchecked(
                    (**key).clone(),
                    (**val).clone(),
                    entries,
                ))
            }
            SignatureType::Struct(field_types) => {
                self.enter()?;
                self.align(8)?;
                let mut fields = Vec::with_capacity(field_types.len());
                for field_ty in field_types {
                    fields.push(self.read_value(field_ty)?);
                }
                self.depth -= 1;
                Value::Struct(fields)
            }
            SignatureType::Variant => {
                self.enter()?;
                let inner_ty = parse_single(self.get_signature()?)?;
                let inner = self.read_value(&inner_ty)?;
                self.depth -= 1;
                Value::Variant(Box::new(inner))
            }
        };
        Ok(value)
    }

    fn read_array<T, F>(&mut self, elem: &SignatureType, mut read: F) -> Result<Vec<T>, MarshalError>
    where
        F: FnMut(&mut Self) -> Result<T, MarshalError>,
    {
        let length = self.get_u32()? as usize;
        if length > self.max_array_length {
            return Err(MarshalError::ArrayTooLong {
                length,
                max: self.max_array_length,
            });
        }
        self.align(elem.alignment())?;
        let end = self.pos + length;
        if end > self.buf.len() {
            return Err(self.underrun(length));
        }
        let mut items = Vec::new();
        while self.pos < end {
            items.push(read(self)?);
        }
        if self.pos != end {
            return Err(MarshalError::ArrayLengthMismatch {
                declared: length,
                consumed: self.pos + length - end,
            });
        }
        Ok(items)
    }
}
