//! Message header
//!
//! A message starts with a 12-byte fixed part followed by an array of header
//! fields, padded to an 8-byte boundary before the body.

use super::codec::{Decoder, Encoder};
use super::names::{is_valid_bus_name, is_valid_error_name, is_valid_interface_name, is_valid_member_name};
use super::signature::{Signature, SignatureType};
use super::{
    Endianness, Flags, MAX_MESSAGE_SIZE, MarshalError, MessageType, ObjectPath, PROTOCOL_VERSION,
    Value,
};

/// Size of the fixed header plus the header-field array length.
pub const FRAME_PREFIX_SIZE: usize = 16;

/// Header field codes
///
/// # Wire Format
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Endianness   | Message Type  |     Flags     |    Version    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Body Length (4)                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Serial (4)                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Header Field Array Length (4)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          a(yv) header fields ... padding to 8 ...             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldCode {
    /// `o`, object the call is sent to or the signal emitted from
    Path = 1,
    /// `s`
    Interface = 2,
    /// `s`, method or signal name
    Member = 3,
    /// `s`, name of the error that occurred
    ErrorName = 4,
    /// `u`, serial of the message this replies to
    ReplySerial = 5,
    /// `s`, intended recipient
    Destination = 6,
    /// `s`, unique name of the sender, filled in by the bus
    Sender = 7,
    /// `g`, body signature
    Signature = 8,
    /// `u`, number of descriptors accompanying the message
    UnixFds = 9,
}

impl FieldCode {
    /// Convert from byte; unknown codes must be ignored by receivers.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Path),
            2 => Some(Self::Interface),
            3 => Some(Self::Member),
            4 => Some(Self::ErrorName),
            5 => Some(Self::ReplySerial),
            6 => Some(Self::Destination),
            7 => Some(Self::Sender),
            8 => Some(Self::Signature),
            9 => Some(Self::UnixFds),
            _ => None,
        }
    }
}

/// Optional header fields of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    /// Object path.
    pub path: Option<ObjectPath>,
    /// Interface name.
    pub interface: Option<String>,
    /// Member name.
    pub member: Option<String>,
    /// Error name.
    pub error_name: Option<String>,
    /// Serial being replied to.
    pub reply_serial: Option<u32>,
    /// Destination bus name.
    pub destination: Option<String>,
    /// Sender bus name.
    pub sender: Option<String>,
    /// Body signature; absent means empty.
    pub signature: Option<Signature>,
    /// Descriptor count.
    pub unix_fds: Option<u32>,
}

impl HeaderFields {
    fn to_values(&self) -> Vec<Value> {
        let mut fields = Vec::with_capacity(8);
        let mut push = |code: FieldCode, value: Value| {
            fields.push(Value::Struct(vec![
                Value::Byte(code as u8),
                value.into_variant(),
            ]));
        };
        if let Some(path) = &self.path {
            push(FieldCode::Path, Value::ObjectPath(path.clone()));
        }
        if let Some(interface) = &self.interface {
            push(FieldCode::Interface, Value::Str(interface.clone()));
        }
        if let Some(member) = &self.member {
            push(FieldCode::Member, Value::Str(member.clone()));
        }
        if let Some(error_name) = &self.error_name {
            push(FieldCode::ErrorName, Value::Str(error_name.clone()));
        }
        if let Some(reply_serial) = self.reply_serial {
            push(FieldCode::ReplySerial, Value::UInt32(reply_serial));
        }
        if let Some(destination) = &self.destination {
            push(FieldCode::Destination, Value::Str(destination.clone()));
        }
        if let Some(sender) = &self.sender {
            push(FieldCode::Sender, Value::Str(sender.clone()));
        }
        if let Some(signature) = self.signature.as_ref().filter(|s| !s.is_empty()) {
            push(FieldCode::Signature, Value::Signature(signature.clone()));
        }
        if let Some(unix_fds) = self.unix_fds.filter(|n| *n > 0) {
            push(FieldCode::UnixFds, Value::UInt32(unix_fds));
        }
        fields
    }

    fn set(&mut self, code: FieldCode, value: Value) -> Result<(), MarshalError> {
        let wrong = |code: FieldCode, value: &Value| {
            MarshalError::InvalidHeader(format!(
                "field {code:?} has type {}",
                value.signature_type()
            ))
        };
        match (code, value) {
            (FieldCode::Path, Value::ObjectPath(p)) => self.path = Some(p),
            (FieldCode::Interface, Value::Str(s)) => self.interface = Some(s),
            (FieldCode::Member, Value::Str(s)) => self.member = Some(s),
            (FieldCode::ErrorName, Value::Str(s)) => self.error_name = Some(s),
            (FieldCode::ReplySerial, Value::UInt32(n)) => self.reply_serial = Some(n),
            (FieldCode::Destination, Value::Str(s)) => self.destination = Some(s),
            (FieldCode::Sender, Value::Str(s)) => self.sender = Some(s),
            (FieldCode::Signature, Value::Signature(s)) => self.signature = Some(s),
            (FieldCode::UnixFds, Value::UInt32(n)) => self.unix_fds = Some(n),
            (code, other) => return Err(wrong(code, &other)),
        }
        Ok(())
    }
}

/// Decoded message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Byte order of the whole message.
    pub endian: Endianness,
    /// Message kind.
    pub kind: MessageType,
    /// Flags byte.
    pub flags: Flags,
    /// Sender-assigned serial, never zero on the wire.
    pub serial: u32,
    /// Header fields.
    pub fields: HeaderFields,
}

fn header_fields_type() -> SignatureType {
    SignatureType::Array(Box::new(SignatureType::Struct(vec![
        SignatureType::Byte,
        SignatureType::Variant,
    ])))
}

impl MessageHeader {
    /// Check the fields each message kind requires and the name formats.
    pub fn validate(&self) -> Result<(), MarshalError> {
        let fields = &self.fields;
        let missing = |what: &str| {
            MarshalError::InvalidHeader(format!("{} message without {what}", self.kind))
        };
        match self.kind {
            MessageType::MethodCall => {
                fields.path.as_ref().ok_or_else(|| missing("PATH"))?;
                fields.member.as_ref().ok_or_else(|| missing("MEMBER"))?;
            }
            MessageType::Signal => {
                fields.path.as_ref().ok_or_else(|| missing("PATH"))?;
                fields.interface.as_ref().ok_or_else(|| missing("INTERFACE"))?;
                fields.member.as_ref().ok_or_else(|| missing("MEMBER"))?;
            }
            MessageType::Error => {
                fields.error_name.as_ref().ok_or_else(|| missing("ERROR_NAME"))?;
                fields.reply_serial.ok_or_else(|| missing("REPLY_SERIAL"))?;
            }
            MessageType::MethodReturn => {
                fields.reply_serial.ok_or_else(|| missing("REPLY_SERIAL"))?;
            }
        }
        let bad = |what: &str, name: &str| MarshalError::InvalidHeader(format!("invalid {what} {name:?}"));
        if let Some(i) = fields.interface.as_deref().filter(|i| !is_valid_interface_name(i)) {
            return Err(bad("interface", i));
        }
        if let Some(m) = fields.member.as_deref().filter(|m| !is_valid_member_name(m)) {
            return Err(bad("member", m));
        }
        if let Some(e) = fields.error_name.as_deref().filter(|e| !is_valid_error_name(e)) {
            return Err(bad("error name", e));
        }
        for name in [&fields.destination, &fields.sender].into_iter().flatten() {
            if !is_valid_bus_name(name) {
                return Err(bad("bus name", name));
            }
        }
        if fields.reply_serial == Some(0) {
            return Err(MarshalError::InvalidHeader("reply serial 0".into()));
        }
        Ok(())
    }

    /// Encode the header (fixed part, fields, padding) for a body of `body_len` bytes.
    pub fn encode(&self, body_len: usize) -> Result<Vec<u8>, MarshalError> {
        let body_len_u32 = u32::try_from(body_len).map_err(|_| MarshalError::MessageTooLarge {
            size: body_len,
            max: MAX_MESSAGE_SIZE,
        })?;
        let mut enc = Encoder::new(self.endian);
        enc.put_u8(self.endian.marker());
        enc.put_u8(self.kind.as_u8());
        enc.put_u8(self.flags.as_u8());
        enc.put_u8(PROTOCOL_VERSION);
        enc.put_u32(body_len_u32);
        enc.put_u32(self.serial);
        let fields = Value::Array(super::value::Array::from_parts_unchecked(
            SignatureType::Struct(vec![SignatureType::Byte, SignatureType::Variant]),
            self.fields.to_values(),
        ));
        enc.write_value(&fields, &header_fields_type())?;
        enc.align(8);
        let total = enc.len() + body_len;
        if total > MAX_MESSAGE_SIZE {
            return Err(MarshalError::MessageTooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(enc.finish())
    }

    /// Decode a header from the start of a complete frame.
    ///
    /// Returns the header, the body offset and the body length.
    pub fn decode(
        frame: &[u8],
        max_array_length: usize,
    ) -> Result<(Self, usize, usize), MarshalError> {
        let endian = frame
            .first()
            .copied()
            .and_then(Endianness::from_marker)
            .ok_or_else(|| MarshalError::InvalidHeader("bad endianness marker".into()))?;
        let mut dec = Decoder::new(frame, endian).with_max_array_length(max_array_length);
        dec.get_u8()?;
        let kind_byte = dec.get_u8()?;
        let kind = MessageType::from_u8(kind_byte)
            .ok_or_else(|| MarshalError::InvalidHeader(format!("unknown message type {kind_byte}")))?;
        let flags = Flags::from_u8(dec.get_u8()?);
        let version = dec.get_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(MarshalError::InvalidHeader(format!(
                "unsupported protocol version {version}"
            )));
        }
        let body_len = dec.get_u32()? as usize;
        let serial = dec.get_u32()?;
        if serial == 0 {
            return Err(MarshalError::InvalidHeader("serial 0".into()));
        }

        let mut fields = HeaderFields::default();
        if let Value::Array(array) = dec.read_value(&header_fields_type())? {
            for entry in array.into_items() {
                let Value::Struct(mut pair) = entry else {
                    continue;
                };
                let (Some(Value::Variant(value)), Some(Value::Byte(code))) = (pair.pop(), pair.pop())
                else {
                    continue;
                };
                if let Some(code) = FieldCode::from_u8(code) {
                    fields.set(code, *value)?;
                }
            }
        }
        dec.align(8)?;
        let body_offset = dec.position();
        if frame.len() < body_offset + body_len {
            return Err(MarshalError::Underrun {
                offset: body_offset,
                needed: body_len,
                available: frame.len() - body_offset,
            });
        }

        let header = Self {
            endian,
            kind,
            flags,
            serial,
            fields,
        };
        header.validate()?;
        Ok((header, body_offset, body_len))
    }
}

/// Total length of a frame given its first [`FRAME_PREFIX_SIZE`] bytes.
///
/// # Errors
///
/// Fails on a bad endianness marker or when the frame would exceed
/// `max_message_size`.
pub fn frame_length(prefix: &[u8; FRAME_PREFIX_SIZE], max_message_size: usize) -> Result<usize, MarshalError> {
    let endian = Endianness::from_marker(prefix[0])
        .ok_or_else(|| MarshalError::InvalidHeader("bad endianness marker".into()))?;
    let read = |at: usize| {
        let raw = [prefix[at], prefix[at + 1], prefix[at + 2], prefix[at + 3]];
        match endian {
            Endianness::Little => u32::from_le_bytes(raw),
            Endianness::Big => u32::from_be_bytes(raw),
        }
    };
    let body_len = read(4) as usize;
    let fields_len = read(12) as usize;
    let total = (FRAME_PREFIX_SIZE + fields_len).next_multiple_of(8) + body_len;
    if total > max_message_size {
        return Err(MarshalError::MessageTooLarge {
            size: total,
            max: max_message_size,
        });
    }
    Ok(total)
}
