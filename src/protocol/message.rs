//! Message implementation

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use bytes::Bytes;

use super::convert::{FromBody, IntoBody};
use super::header::{HeaderFields, MessageHeader};
use super::signature::Signature;
use super::{
    DBusError, Endianness, Flags, MAX_ARRAY_LENGTH, MarshalError, MessageType, ObjectPath, Value,
    codec,
};

/// A complete message: header, encoded body and any passed descriptors.
///
/// Messages are immutable once built except for the serial and sender, which
/// the sending connection (or a relaying bus) fills in.
#[derive(Debug)]
pub struct Message {
    header: MessageHeader,
    body: Bytes,
    fds: Vec<OwnedFd>,
}

impl Message {
    /// Start a method call to `member` on `path`.
    #[must_use]
    pub fn method_call(path: ObjectPath, member: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(MessageType::MethodCall).path(path).member(member)
    }

    /// Start a signal emitted from `path`.
    #[must_use]
    pub fn signal(
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> MessageBuilder {
        MessageBuilder::new(MessageType::Signal)
            .path(path)
            .interface(interface)
            .member(member)
    }

    /// Start the successful reply to `call`.
    #[must_use]
    pub fn method_return(call: &Message) -> MessageBuilder {
        MessageBuilder::reply_to(MessageType::MethodReturn, call)
    }

    /// Build the error reply to `call`.
    #[must_use]
    pub fn error(call: &Message, error: &DBusError) -> MessageBuilder {
        let builder = MessageBuilder::reply_to(MessageType::Error, call).error_name(error.name());
        if error.message().is_empty() {
            builder
        } else {
            builder.arg(error.message())
        }
    }

    /// Message kind.
    #[must_use]
    pub fn kind(&self) -> MessageType {
        self.header.kind
    }

    /// Flags.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    /// Byte order of the body.
    #[must_use]
    pub fn endian(&self) -> Endianness {
        self.header.endian
    }

    /// Serial number, 0 until sent.
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.header.serial
    }

    /// Assign the serial. Done by the connection on send.
    pub fn set_serial(&mut self, serial: u32) {
        self.header.serial = serial;
    }

    /// Serial this message replies to.
    #[must_use]
    pub fn reply_serial(&self) -> Option<u32> {
        self.header.fields.reply_serial
    }

    /// Object path.
    #[must_use]
    pub fn path(&self) -> Option<&ObjectPath> {
        self.header.fields.path.as_ref()
    }

    /// Interface name.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.header.fields.interface.as_deref()
    }

    /// Member name.
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.header.fields.member.as_deref()
    }

    /// Error name of an Error message.
    #[must_use]
    pub fn error_name(&self) -> Option<&str> {
        self.header.fields.error_name.as_deref()
    }

    /// Destination bus name.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header.fields.destination.as_deref()
    }

    /// Sender bus name.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.header.fields.sender.as_deref()
    }

    /// Stamp the sender, as a bus does when relaying.
    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.header.fields.sender = Some(sender.into());
    }

    /// Body signature (empty when the message has no body).
    #[must_use]
    pub fn signature(&self) -> Signature {
        self.header.fields.signature.clone().unwrap_or_default()
    }

    /// Full header.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Encoded body bytes.
    #[must_use]
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body.
    pub fn body(&self) -> Result<Vec<Value>, MarshalError> {
        self.body_with_limit(MAX_ARRAY_LENGTH)
    }

    /// Decode the body with a custom array length ceiling.
    pub fn body_with_limit(&self, max_array_length: usize) -> Result<Vec<Value>, MarshalError> {
        let signature = self.signature();
        let types = signature.types()?;
        let mut dec = codec::Decoder::new(&self.body, self.endian())
            .with_max_array_length(max_array_length)
            .with_unix_fds(u32::try_from(self.fds.len()).unwrap_or(u32::MAX));
        let mut values = Vec::with_capacity(types.len());
        for ty in &types {
            values.push(dec.read_value(ty)?);
        }
        if dec.remaining() != 0 {
            return Err(MarshalError::TrailingBytes(dec.remaining()));
        }
        Ok(values)
    }

    /// Decode the body into a typed tuple.
    pub fn body_as<T: FromBody>(&self) -> Result<T, MarshalError> {
        T::from_body(self.body()?)
    }

    /// Descriptors carried with the message.
    #[must_use]
    pub fn fds(&self) -> &[OwnedFd] {
        &self.fds
    }

    /// Borrow the descriptor referenced by a `h` value.
    #[must_use]
    pub fn fd(&self, index: u32) -> Option<BorrowedFd<'_>> {
        self.fds.get(index as usize).map(AsFd::as_fd)
    }

    /// Take ownership of the descriptors.
    pub fn take_fds(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.fds)
    }

    pub(crate) fn attach_fds(&mut self, fds: Vec<OwnedFd>) -> Result<(), MarshalError> {
        let expected = self.header.fields.unix_fds.unwrap_or(0) as usize;
        if fds.len() < expected {
            return Err(MarshalError::FdOutOfRange {
                index: u32::try_from(fds.len()).unwrap_or(u32::MAX),
                available: fds.len(),
            });
        }
        self.fds = fds;
        Ok(())
    }

    /// Error carried by an Error message: its name and first string argument.
    #[must_use]
    pub fn to_dbus_error(&self) -> Option<DBusError> {
        let name = self.error_name()?;
        let text = self
            .body()
            .ok()
            .and_then(|body| body.into_iter().next())
            .and_then(|first| first.as_str().map(str::to_owned))
            .unwrap_or_default();
        Some(DBusError::new(name, text))
    }

    /// Encode the whole message (header, padding, body).
    pub fn encode(&self) -> Result<Vec<u8>, MarshalError> {
        let mut bytes = self.header.encode(self.body.len())?;
        bytes.extend_from_slice(&self.body);
        Ok(bytes)
    }

    /// Decode one complete frame. Descriptors are attached by the transport.
    pub fn decode(frame: Bytes, max_array_length: usize) -> Result<Self, MarshalError> {
        let (header, offset, body_len) = MessageHeader::decode(&frame, max_array_length)?;
        let has_signature = header.fields.signature.as_ref().is_some_and(|s| !s.is_empty());
        if body_len > 0 && !has_signature {
            return Err(MarshalError::InvalidHeader(
                "non-empty body without signature".into(),
            ));
        }
        Ok(Self {
            header,
            body: frame.slice(offset..offset + body_len),
            fds: Vec::new(),
        })
    }
}

/// Builder for outgoing messages.
#[derive(Debug)]
pub struct MessageBuilder {
    kind: MessageType,
    flags: Flags,
    endian: Endianness,
    fields: HeaderFields,
    body: Vec<Value>,
    fds: Vec<OwnedFd>,
}

impl MessageBuilder {
    fn new(kind: MessageType) -> Self {
        Self {
            kind,
            flags: Flags::new(),
            endian: Endianness::native(),
            fields: HeaderFields::default(),
            body: Vec::new(),
            fds: Vec::new(),
        }
    }

    fn reply_to(kind: MessageType, call: &Message) -> Self {
        let mut builder = Self::new(kind);
        builder.fields.reply_serial = Some(call.serial());
        builder.fields.destination = call.sender().map(str::to_owned);
        builder.endian = call.endian();
        builder
    }

    fn path(mut self, path: ObjectPath) -> Self {
        self.fields.path = Some(path);
        self
    }

    /// Interface name.
    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.fields.interface = Some(interface.into());
        self
    }

    /// Member name.
    #[must_use]
    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.fields.member = Some(member.into());
        self
    }

    fn error_name(mut self, name: impl Into<String>) -> Self {
        self.fields.error_name = Some(name.into());
        self
    }

    /// Destination bus name.
    #[must_use]
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.fields.destination = Some(destination.into());
        self
    }

    /// Sender bus name.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.fields.sender = Some(sender.into());
        self
    }

    /// Replace the flags.
    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Do not expect a reply.
    #[must_use]
    pub fn no_reply(mut self) -> Self {
        self.flags = self.flags.with(Flags::NO_REPLY_EXPECTED);
        self
    }

    /// Do not ask the bus to launch the destination.
    #[must_use]
    pub fn no_auto_start(mut self) -> Self {
        self.flags = self.flags.with(Flags::NO_AUTO_START);
        self
    }

    /// Byte order of the body.
    #[must_use]
    pub fn endian(mut self, endian: Endianness) -> Self {
        self.endian = endian;
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: impl IntoBody) -> Self {
        self.body = body.into_body();
        self
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.body.push(value.into());
        self
    }

    /// Attach descriptors referenced by `h` arguments.
    #[must_use]
    pub fn fds(mut self, fds: Vec<OwnedFd>) -> Self {
        self.fds = fds;
        self
    }

    /// Encode the body and check the header.
    pub fn build(mut self) -> Result<Message, MarshalError> {
        let signature = Value::signature_of(&self.body);
        let body = codec::encode(&self.body, &signature, self.endian)?;
        if !signature.is_empty() {
            self.fields.signature = Some(signature);
        }
        if !self.fds.is_empty() {
            self.fields.unix_fds = Some(u32::try_from(self.fds.len()).unwrap_or(u32::MAX));
        }
        let header = MessageHeader {
            endian: self.endian,
            kind: self.kind,
            flags: self.flags,
            serial: 0,
            fields: self.fields,
        };
        header.validate()?;
        Ok(Message {
            header,
            body: Bytes::from(body),
            fds: self.fds,
        })
    }
}
