//! Authenticated message channel: connect or accept, then split into a
//! reader, a writer and a close handle.

use std::io::{self, Write};
use std::net::Shutdown;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "debug-tools")]
use std::path::PathBuf;

use bytes::BytesMut;
use tracing::{debug, instrument, trace, warn};

use crate::protocol::header::{FRAME_PREFIX_SIZE, frame_length};
use crate::protocol::metrics::{MessageDirection, Metrics};
use crate::protocol::{MAX_ARRAY_LENGTH, MAX_MESSAGE_SIZE, MarshalError, Message, Result};

use super::address::BusAddress;
use super::auth::{AuthConfig, AuthOutcome, Mechanism, SaslClient, SaslServer, client_handshake, server_handshake};
#[cfg(feature = "debug-tools")]
use super::debug::WireRecorder;
use super::error::TransportError;
use super::socket::{Listener, Stream};

const READ_CHUNK: usize = 64 * 1024;

/// Transport configuration options.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Largest frame accepted from the peer.
    pub max_message_size: usize,
    /// Largest array accepted inside a header.
    pub max_array_length: usize,
    /// Capture every outbound frame to this PCAP file.
    #[cfg(feature = "debug-tools")]
    pub capture_send_path: Option<PathBuf>,
    /// Capture every inbound frame to this PCAP file.
    #[cfg(feature = "debug-tools")]
    pub capture_recv_path: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
            max_array_length: MAX_ARRAY_LENGTH,
            #[cfg(feature = "debug-tools")]
            capture_send_path: None,
            #[cfg(feature = "debug-tools")]
            capture_recv_path: None,
        }
    }
}

/// An authenticated byte channel ready for binary messages.
#[derive(Debug)]
pub struct Transport {
    stream: Stream,
    config: TransportConfig,
    outcome: AuthOutcome,
}

impl Transport {
    /// Connect to `address` and authenticate as a client.
    ///
    /// A `listen=true` address instead binds it and waits for one peer.
    #[instrument(level = "info", skip(config), fields(address = %address))]
    pub fn connect(address: &BusAddress, config: TransportConfig) -> Result<Self> {
        if address.is_listen() {
            let listener = Listener::bind(address)?;
            return Self::accept(&listener, config);
        }
        let stream = Stream::connect(address)?;
        let uid = nix::unistd::getuid().as_raw();
        let mut client = SaslClient::new(
            config.auth.clone(),
            uid,
            stream.supports_fds(),
            address.guid().map(str::to_owned),
        );
        let outcome = client_handshake(&stream, &mut client).inspect_err(|err| {
            warn!(error = %err, "client authentication failed");
        })?;
        debug!(guid = %outcome.guid, mechanism = %outcome.mechanism, unix_fd = outcome.unix_fd, "authenticated");
        Ok(Self::established(stream, config, outcome))
    }

    /// Try each address in order; the first that authenticates wins.
    pub fn connect_any(addresses: &[BusAddress], config: &TransportConfig) -> Result<Self> {
        let mut last = None;
        for address in addresses {
            match Self::connect(address, config.clone()) {
                Ok(transport) => return Ok(transport),
                Err(err) => {
                    debug!(%address, error = %err, "address failed, trying next");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| crate::Error::InvalidAddress("empty address list".into())))
    }

    /// Accept one client on `listener` and authenticate it as the server.
    #[instrument(level = "info", skip(listener, config), fields(address = %listener.address()))]
    pub fn accept(listener: &Listener, config: TransportConfig) -> Result<Self> {
        let stream = listener.accept()?;
        let guid = listener
            .address()
            .guid()
            .map_or_else(|| config.auth.server_guid(), str::to_owned);
        let mut server = SaslServer::new(
            config.auth.clone(),
            guid,
            stream.peer_uid(),
            stream.supports_fds(),
        );
        let outcome = server_handshake(&stream, &mut server).inspect_err(|err| {
            warn!(error = %err, "peer authentication failed");
        })?;
        debug!(mechanism = %outcome.mechanism, unix_fd = outcome.unix_fd, "peer authenticated");
        Ok(Self::established(stream, config, outcome))
    }

    fn established(stream: Stream, config: TransportConfig, outcome: AuthOutcome) -> Self {
        Self {
            stream,
            config,
            outcome,
        }
    }

    /// GUID of the server side.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.outcome.guid
    }

    /// Whether descriptors may be sent.
    #[must_use]
    pub fn unix_fd_enabled(&self) -> bool {
        self.outcome.unix_fd
    }

    /// Mechanism that authenticated the channel.
    #[must_use]
    pub fn mechanism(&self) -> Mechanism {
        self.outcome.mechanism
    }

    /// Split into the single reader, the writer and a handle that can close both.
    pub fn split(self) -> std::result::Result<(MessageReader, MessageWriter, CloseHandle), TransportError> {
        let shared = Arc::new(Shared::new(&self.config)?);
        let reader = MessageReader {
            stream: self.stream.try_clone()?,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            fds: Vec::new(),
            max_message_size: self.config.max_message_size,
            max_array_length: self.config.max_array_length,
            shared: Arc::clone(&shared),
        };
        let close = CloseHandle {
            stream: Arc::new(self.stream.try_clone()?),
            _shared: Arc::clone(&shared),
        };
        let writer = MessageWriter {
            stream: self.stream,
            unix_fd: self.outcome.unix_fd,
            shared,
        };
        Ok((reader, writer, close))
    }
}

#[derive(Debug)]
struct Shared {
    #[cfg(feature = "debug-tools")]
    capture_send: Option<WireRecorder>,
    #[cfg(feature = "debug-tools")]
    capture_recv: Option<WireRecorder>,
}

impl Shared {
    #[cfg_attr(not(feature = "debug-tools"), allow(clippy::unnecessary_wraps, unused_variables))]
    fn new(config: &TransportConfig) -> io::Result<Self> {
        let shared = Self {
            #[cfg(feature = "debug-tools")]
            capture_send: config
                .capture_send_path
                .as_deref()
                .map(WireRecorder::create)
                .transpose()?,
            #[cfg(feature = "debug-tools")]
            capture_recv: config
                .capture_recv_path
                .as_deref()
                .map(WireRecorder::create)
                .transpose()?,
        };
        Metrics::record_connection_open();
        Ok(shared)
    }

    #[cfg_attr(not(feature = "debug-tools"), allow(clippy::unused_self, unused_variables))]
    fn record(&self, direction: MessageDirection, frame: &[u8]) {
        #[cfg(feature = "debug-tools")]
        {
            let recorder = match direction {
                MessageDirection::Sent => &self.capture_send,
                MessageDirection::Received => &self.capture_recv,
            };
            if let Some(recorder) = recorder {
                if let Err(err) = recorder.record(frame) {
                    debug!(error = ?err, "failed to record frame");
                }
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!("transport released; metrics connection close");
        Metrics::record_connection_close();
    }
}

/// The one consumer of the inbound byte stream.
#[derive(Debug)]
pub struct MessageReader {
    stream: Stream,
    buffer: BytesMut,
    scratch: Box<[u8]>,
    fds: Vec<OwnedFd>,
    max_message_size: usize,
    max_array_length: usize,
    shared: Arc<Shared>,
}

impl MessageReader {
    /// Block until one whole message is decoded; `None` on a clean end of stream.
    pub fn read_message(&mut self) -> std::result::Result<Option<Message>, TransportError> {
        if !self.fill(FRAME_PREFIX_SIZE)? {
            return Ok(None);
        }
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[..FRAME_PREFIX_SIZE]);
        let total = frame_length(&prefix, self.max_message_size)?;
        if !self.fill(total)? {
            return Err(TransportError::Closed);
        }
        let frame = self.buffer.split_to(total).freeze();
        self.shared.record(MessageDirection::Received, &frame);

        let mut message = Message::decode(frame, self.max_array_length)?;
        let wanted = message.header().fields.unix_fds.unwrap_or(0) as usize;
        if wanted > 0 {
            if self.fds.len() < wanted {
                return Err(MarshalError::FdOutOfRange {
                    index: u32::try_from(wanted - 1).unwrap_or(u32::MAX),
                    available: self.fds.len(),
                }
                .into());
            }
            let fds: Vec<OwnedFd> = self.fds.drain(..wanted).collect();
            message.attach_fds(fds)?;
        }
        trace!(kind = %message.kind(), serial = message.serial(), "message received");
        Metrics::record_message(MessageDirection::Received, message.kind());
        Ok(Some(message))
    }

    // Ok(false) only for end of stream on a frame boundary.
    fn fill(&mut self, needed: usize) -> std::result::Result<bool, TransportError> {
        while self.buffer.len() < needed {
            let n = match self.stream.recv_with_fds(&mut self.scratch, &mut self.fds) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(false)
                } else {
                    Err(TransportError::Closed)
                };
            }
            self.buffer.extend_from_slice(&self.scratch[..n]);
        }
        Ok(true)
    }
}

/// Writes whole frames; callers serialize access.
#[derive(Debug)]
pub struct MessageWriter {
    stream: Stream,
    unix_fd: bool,
    shared: Arc<Shared>,
}

impl MessageWriter {
    /// Encode and write one message with its descriptors.
    pub fn write_message(&mut self, message: &Message) -> std::result::Result<(), TransportError> {
        let started = Instant::now();
        let bytes = message.encode()?;
        let mut out = &self.stream;
        if message.fds().is_empty() {
            out.write_all(&bytes)?;
        } else {
            if !self.unix_fd {
                return Err(TransportError::FdPassingUnsupported);
            }
            let fds: Vec<BorrowedFd<'_>> = message.fds().iter().map(AsFd::as_fd).collect();
            let sent = self.stream.send_with_fds(&bytes, &fds)?;
            out.write_all(&bytes[sent..])?;
        }
        out.flush()?;
        self.shared.record(MessageDirection::Sent, &bytes);
        trace!(kind = %message.kind(), serial = message.serial(), len = bytes.len(), "message sent");
        Metrics::record_message(MessageDirection::Sent, message.kind());
        Metrics::record_send_latency(started.elapsed());
        Ok(())
    }

    /// Whether descriptors may be attached.
    #[must_use]
    pub fn unix_fd_enabled(&self) -> bool {
        self.unix_fd
    }
}

/// Shuts the channel down from any thread.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    stream: Arc<Stream>,
    _shared: Arc<Shared>,
}

impl CloseHandle {
    /// Stop inbound traffic; a blocked `read_message` returns end of stream.
    pub fn shutdown_read(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Read) {
            trace!(error = %err, "read shutdown failed");
        }
    }

    /// Close both directions.
    pub fn close(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            trace!(error = %err, "shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ObjectPath, Value};
    use std::thread;

    fn pair() -> (Transport, Transport) {
        let dir = tempfile::tempdir().unwrap();
        let address = BusAddress::unix_path(dir.path().join("sock")).listening();
        let listener = Listener::bind(&address).unwrap();
        let client_addr = listener.address().clone();
        let server = thread::spawn(move || Transport::accept(&listener, TransportConfig::default()));
        let client = Transport::connect(&client_addr, TransportConfig::default()).unwrap();
        let server = server.join().unwrap().unwrap();
        drop(dir);
        (client, server)
    }

    #[test]
    fn messages_flow_after_handshake() {
        let (client, server) = pair();
        assert_eq!(client.guid(), server.guid());
        assert!(client.unix_fd_enabled());
        assert_eq!(client.mechanism(), Mechanism::External);

        let (_, mut writer, _close) = client.split().unwrap();
        let (mut reader, _, _) = server.split().unwrap();

        let mut call = Message::method_call(ObjectPath::new("/a").unwrap(), "Echo")
            .arg("hello")
            .arg(7u32)
            .build()
            .unwrap();
        call.set_serial(1);
        writer.write_message(&call).unwrap();
        writer.write_message(&call).unwrap();

        for _ in 0..2 {
            let got = reader.read_message().unwrap().unwrap();
            assert_eq!(got.member(), Some("Echo"));
            assert_eq!(got.body().unwrap(), vec![Value::from("hello"), Value::UInt32(7)]);
        }
    }

    #[test]
    fn descriptors_travel_with_their_message() {
        let (client, server) = pair();
        let (_, mut writer, _c) = client.split().unwrap();
        let (mut reader, _, _s) = server.split().unwrap();

        let file = tempfile::tempfile().unwrap();
        let mut msg = Message::signal(ObjectPath::new("/f").unwrap(), "org.example.F", "Fd")
            .arg(Value::UnixFd(0))
            .fds(vec![OwnedFd::from(file)])
            .build()
            .unwrap();
        msg.set_serial(9);
        writer.write_message(&msg).unwrap();

        let got = reader.read_message().unwrap().unwrap();
        assert_eq!(got.fds().len(), 1);
        assert!(got.fd(0).is_some());
    }

    #[test]
    fn close_handle_ends_the_reader() {
        let (client, _server) = pair();
        let (mut reader, _writer, close) = client.split().unwrap();
        let waiter = thread::spawn(move || reader.read_message());
        close.shutdown_read();
        assert!(matches!(waiter.join().unwrap(), Ok(None)));
    }
}
