//! Connections: lifecycle, registries and the public engine API.
//!
//! A [`Connection`] owns one authenticated transport, a reader thread that
//! classifies inbound messages, a FIFO sender thread and four worker pools
//! (method calls, method returns, errors, signals). Handles are cheap to
//! clone; teardown happens on [`Connection::disconnect`] or when the
//! transport fails.

mod builder;
mod config;
mod dispatch;
mod pending;
mod pool;
mod reader;
mod sender;
mod signals;
mod state;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::object::exported::erase;
use crate::object::tree::ObjectTree;
use crate::object::{Interface, Object};
use crate::protocol::names::check_bus_name;
use crate::protocol::{
    BUS_INTERFACE, BUS_NAME, BUS_PATH, DBusError, Endianness, Error, FromBody, IntoBody, MatchRule, Message,
    ObjectPath, RemoteError, Result, error_names,
};
use crate::proxy::{Proxy, RemoteInterface, RemoteObjectRef};
use crate::transport::{CloseHandle, Transport, TransportError};

pub use builder::ConnectionBuilder;
pub use config::{ConnectionConfig, ReceivingConfig};
pub use signals::{HandlerId, SignalType};
pub use state::{ConnectionState, DisconnectCause};

pub(crate) use pending::{ReplyCallback, ReplySlot, Waiter};

use pending::PendingCalls;
use pool::Pools;
use sender::SendQueue;
use signals::{SignalHandlerFn, SignalRouter};

/// `RequestName` flag: fail instead of queueing for the name.
pub const NAME_FLAG_DO_NOT_QUEUE: u32 = 0x4;
/// `RequestName` reply: the caller now owns the name.
pub const REQUEST_NAME_PRIMARY_OWNER: u32 = 1;
/// `RequestName` reply: the caller already owned the name.
pub const REQUEST_NAME_ALREADY_OWNER: u32 = 4;
/// `ReleaseName` reply: the name was released.
pub const RELEASE_NAME_RELEASED: u32 = 1;

const SPURIOUS_QUEUE_LIMIT: usize = 256;
const JOIN_POLL: Duration = Duration::from_millis(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Whether the peer is a message bus or a single direct peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Talking to a bus daemon: `Hello`, names, `AddMatch`, destinations.
    Bus,
    /// Peer-to-peer: no daemon, destinations are not set.
    Direct,
}

/// Notified once when a connection goes away.
pub type DisconnectCallback = dyn Fn(&DisconnectCause) + Send + Sync;

pub(crate) struct Inner {
    id: u64,
    mode: ConnectionMode,
    address: String,
    shared_key: Option<String>,
    pub(crate) config: ConnectionConfig,
    guid: String,
    unix_fd: bool,
    state: Mutex<ConnectionState>,
    cause: Mutex<Option<DisconnectCause>>,
    unique_name: Mutex<Option<String>>,
    queue: SendQueue,
    closer: CloseHandle,
    reader: Mutex<Option<JoinHandle<()>>>,
    pub(crate) pending: PendingCalls,
    pub(crate) objects: Mutex<ObjectTree>,
    pub(crate) signals: SignalRouter,
    pub(crate) pools: Pools,
    known_errors: Mutex<HashSet<&'static str>>,
    known_interfaces: Mutex<Vec<&'static str>>,
    imported: Mutex<HashSet<RemoteObjectRef>>,
    spurious: Mutex<VecDeque<Message>>,
    on_disconnect: Mutex<Vec<Arc<DisconnectCallback>>>,
}

impl Inner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if !state.is_closing() {
            debug!(connection = self.id, from = %*state, to = %next, "state change");
            *state = next;
        }
    }

    /// Queue a message that expects no reply.
    pub(crate) fn send(&self, message: Message) -> Result<u32> {
        self.check_fds(&message)?;
        self.queue.enqueue(message, &self.pending, None)
    }

    /// Queue a call and track it under its serial.
    pub(crate) fn send_call(&self, message: Message, waiter: Waiter) -> Result<u32> {
        self.check_fds(&message)?;
        self.queue.enqueue(message, &self.pending, Some(waiter))
    }

    fn check_fds(&self, message: &Message) -> Result<()> {
        if !message.fds().is_empty() && !self.unix_fd {
            return Err(TransportError::FdPassingUnsupported.into());
        }
        Ok(())
    }

    /// Hand a result to its waiter. Callbacks run on the return or error
    /// pool, or inline once the pools are gone.
    pub(crate) fn complete(&self, waiter: Waiter, result: Result<Message>) {
        match waiter {
            Waiter::Slot(slot) => {
                slot.complete(result);
            }
            Waiter::Callback(callback) => {
                let pool = if result.is_ok() {
                    &self.pools.method_return
                } else {
                    &self.pools.error
                };
                let job = Arc::new(Mutex::new(Some((callback, result))));
                let queued = Arc::clone(&job);
                let accepted = pool.execute(move || {
                    if let Some((callback, result)) = queued.lock().take() {
                        callback(result);
                    }
                });
                if !accepted {
                    if let Some((callback, result)) = job.lock().take() {
                        if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                            warn!("reply callback panicked");
                        }
                    }
                }
            }
        }
    }

    fn fail_call(&self, serial: u32, error: Error) {
        if let Some(waiter) = self.pending.resolve(serial) {
            self.complete(waiter, Err(error));
        }
    }

    /// Turn an Error message into the error handed to the caller.
    ///
    /// Standard and registered names stay as they are; anything else becomes
    /// a generic failure that keeps the original name in its text.
    pub(crate) fn remote_error(&self, message: &Message) -> Error {
        let err = message
            .to_dbus_error()
            .unwrap_or_else(|| DBusError::failed("error reply without a name"));
        let known = err.name().starts_with("org.freedesktop.DBus.Error.")
            || self.known_errors.lock().contains(err.name());
        if known {
            Error::Remote(err)
        } else {
            Error::Remote(DBusError::new(
                error_names::FAILED,
                format!("{}: {}", err.name(), err.message()),
            ))
        }
    }

    pub(crate) fn push_spurious(&self, message: Message) {
        let mut queue = self.spurious.lock();
        if queue.len() == SPURIOUS_QUEUE_LIMIT {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    /// Shut everything down once. Later calls return immediately.
    pub(crate) fn teardown(&self, cause: DisconnectCause) {
        {
            let mut state = self.state.lock();
            if state.is_closing() {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }
        info!(connection = self.id, address = %self.address, %cause, "disconnecting");
        let deadline = Instant::now() + self.config.shutdown_grace;
        let current = thread::current().id();

        self.queue.stop_accepting();

        self.closer.shutdown_read();
        if let Some(handle) = self.reader.lock().take() {
            if handle.thread().id() != current {
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(JOIN_POLL);
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    warn!(connection = self.id, "reader did not stop within grace period");
                }
            }
        }

        let pending = self.pending.close();
        if !pending.is_empty() {
            debug!(connection = self.id, count = pending.len(), "failing pending calls");
        }
        for (_, waiter) in pending {
            self.complete(waiter, Err(Error::Disconnected(cause.to_string())));
        }

        self.pools.shutdown(deadline);
        self.queue.finish(cause.can_flush(), deadline);
        self.closer.close();

        self.objects.lock().clear();
        self.signals.clear();
        if let Some(key) = &self.shared_key {
            builder::forget_shared(key, self.id);
        }
        *self.cause.lock() = Some(cause.clone());
        *self.state.lock() = ConnectionState::Disconnected;
        debug!(connection = self.id, "disconnected");

        let callbacks = std::mem::take(&mut *self.on_disconnect.lock());
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&cause))).is_err() {
                warn!(connection = self.id, "disconnect callback panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.state.get_mut().is_closing() {
            debug!(connection = self.id, "last handle dropped, closing transport");
            self.closer.close();
        }
    }
}

/// A connection to a bus or a single peer.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("mode", &self.inner.mode)
            .field("state", &self.inner.state())
            .field("unique_name", &*self.inner.unique_name.lock())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start configuring a connection.
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Wrap an authenticated transport, e.g. one accepted from a
    /// [`Listener`](crate::transport::Listener).
    pub fn from_transport(transport: Transport, mode: ConnectionMode, config: ConnectionConfig) -> Result<Self> {
        Self::start(transport, mode, "accepted".into(), None, config)
    }

    #[instrument(level = "debug", skip(transport, config, shared_key), fields(%address))]
    pub(crate) fn start(
        transport: Transport,
        mode: ConnectionMode,
        address: String,
        shared_key: Option<String>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let guid = transport.guid().to_owned();
        let unix_fd = transport.unix_fd_enabled();
        let (reader, writer, closer) = transport.split()?;
        let pools = Pools::new(&config.receiving).map_err(TransportError::from)?;

        let owner: Arc<OnceLock<Weak<Inner>>> = Arc::default();
        let hook_owner = Arc::clone(&owner);
        let queue = SendQueue::start(
            writer,
            closer.clone(),
            Box::new(move |serial, err| {
                if let Some(inner) = hook_owner.get().and_then(Weak::upgrade) {
                    inner.fail_call(serial, Error::Transport(err));
                }
            }),
        )
        .map_err(TransportError::from)?;

        let inner = Arc::new(Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            mode,
            address,
            shared_key,
            config,
            guid,
            unix_fd,
            state: Mutex::new(ConnectionState::Connecting),
            cause: Mutex::new(None),
            unique_name: Mutex::new(None),
            queue,
            closer,
            reader: Mutex::new(None),
            pending: PendingCalls::default(),
            objects: Mutex::new(ObjectTree::default()),
            signals: SignalRouter::default(),
            pools,
            known_errors: Mutex::new(HashSet::new()),
            known_interfaces: Mutex::new(Vec::new()),
            imported: Mutex::new(HashSet::new()),
            spurious: Mutex::new(VecDeque::new()),
            on_disconnect: Mutex::new(Vec::new()),
        });
        let _ = owner.set(Arc::downgrade(&inner));

        match reader::spawn(Arc::downgrade(&inner), reader) {
            Ok(handle) => *inner.reader.lock() = Some(handle),
            Err(err) => {
                inner.teardown(DisconnectCause::Transport(err.to_string()));
                return Err(TransportError::from(err).into());
            }
        }
        inner.set_state(ConnectionState::Authenticated);
        let conn = Self { inner };
        if mode == ConnectionMode::Direct {
            conn.inner.set_state(ConnectionState::Active);
        }
        debug!(connection = conn.inner.id, guid = %conn.inner.guid, unix_fd, "connection started");
        Ok(conn)
    }

    /// Issue `Hello` and record the unique name. A no-op once registered.
    #[instrument(level = "debug", skip(self), fields(connection = self.inner.id))]
    pub fn register(&self) -> Result<String> {
        self.require_bus()?;
        if let Some(name) = self.unique_name() {
            return Ok(name);
        }
        let (name,): (String,) = self.call_bus("Hello", ())?;
        *self.inner.unique_name.lock() = Some(name.clone());
        self.inner.set_state(ConnectionState::Registered);
        self.inner.set_state(ConnectionState::Active);
        info!(connection = self.inner.id, unique_name = %name, "registered on bus");
        Ok(name)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Whether messages may still be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Why the connection went away, once it has.
    #[must_use]
    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        self.inner.cause.lock().clone()
    }

    /// Bus or direct.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.inner.mode
    }

    /// Server GUID from the handshake.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.inner.guid
    }

    /// Whether descriptors can be passed on this connection.
    #[must_use]
    pub fn unix_fd_enabled(&self) -> bool {
        self.inner.unix_fd
    }

    /// Unique name assigned by the bus.
    #[must_use]
    pub fn unique_name(&self) -> Option<String> {
        self.inner.unique_name.lock().clone()
    }

    /// Configuration the connection runs with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub(crate) fn endianness(&self) -> Endianness {
        self.inner.config.endianness
    }

    /// Close the connection.
    ///
    /// For a shared connection only the last holder tears it down; earlier
    /// calls just drop one reference. Idempotent.
    #[instrument(level = "debug", skip(self), fields(connection = self.inner.id))]
    pub fn disconnect(&self) {
        if let Some(key) = &self.inner.shared_key {
            if !builder::release_shared(key, self.inner.id) {
                debug!(connection = self.inner.id, "shared connection still referenced");
                return;
            }
        }
        self.inner.teardown(DisconnectCause::Requested);
    }

    /// Register a callback for when the connection goes away. Called at
    /// once if it already has.
    pub fn on_disconnect(&self, callback: impl Fn(&DisconnectCause) + Send + Sync + 'static) {
        let callback: Arc<DisconnectCallback> = Arc::new(callback);
        let cause = {
            let mut callbacks = self.inner.on_disconnect.lock();
            let cause = self.inner.cause.lock().clone();
            if cause.is_none() {
                callbacks.push(Arc::clone(&callback));
            }
            cause
        };
        if let Some(cause) = cause {
            callback(&cause);
        }
    }

    /// Queue `message` and return its serial without waiting for the write.
    pub fn send_message(&self, message: Message) -> Result<u32> {
        self.inner.send(message)
    }

    /// Send a method call and block until its reply.
    ///
    /// There is no timeout; the call returns when the reply arrives or the
    /// connection goes away.
    pub fn call(&self, message: Message) -> Result<Message> {
        if message.flags().no_reply_expected() {
            return Err(Error::Other("call expects a reply but NO_REPLY_EXPECTED is set".into()));
        }
        let slot = ReplySlot::new();
        self.inner.send_call(message, Waiter::Slot(Arc::clone(&slot)))?;
        slot.wait()
    }

    /// Send a method call whose reply goes to `callback`.
    pub(crate) fn call_with(&self, message: Message, callback: ReplyCallback) -> Result<u32> {
        self.inner.send_call(message, Waiter::Callback(callback))
    }

    /// Send a method call and return the slot its reply lands in.
    pub(crate) fn call_deferred(&self, message: Message) -> Result<(u32, Arc<ReplySlot>)> {
        let slot = ReplySlot::new();
        let serial = self.inner.send_call(message, Waiter::Slot(Arc::clone(&slot)))?;
        Ok((serial, slot))
    }

    /// Forget a pending call; a late reply is then treated as spurious.
    pub(crate) fn cancel_call(&self, serial: u32) -> bool {
        self.inner.pending.resolve(serial).is_some()
    }

    /// Emit a signal from `path`.
    pub fn emit_signal(&self, path: &str, interface: &str, member: &str, args: impl IntoBody) -> Result<()> {
        let message = Message::signal(ObjectPath::new(path)?, interface, member)
            .endian(self.endianness())
            .body(args)
            .build()?;
        self.send_message(message).map(|_| ())
    }

    /// Number of calls still waiting for a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Take the oldest reply that matched no pending call.
    #[must_use]
    pub fn poll_spurious_reply(&self) -> Option<Message> {
        self.inner.spurious.lock().pop_front()
    }

    /// Make `E` come back intact from failed calls instead of as a generic failure.
    pub fn register_error<E: RemoteError>(&self) {
        self.inner.known_errors.lock().insert(E::NAME);
    }

    /// Export `object` at `path` with the interfaces its type declares.
    pub fn export_object<T: Object>(&self, path: &str, object: &Arc<T>) -> Result<()> {
        self.export_with(path, object, T::interfaces())
    }

    /// Export `object` at `path` with explicit interface tables.
    pub fn export_with<T: Send + Sync + 'static>(
        &self,
        path: &str,
        object: &Arc<T>,
        interfaces: Vec<Interface<T>>,
    ) -> Result<()> {
        let path = ObjectPath::new(path)?;
        let exported = erase(object, interfaces, self.inner.config.weak_exports)?;
        self.inner.objects.lock().insert(&path, exported)?;
        debug!(connection = self.inner.id, %path, "object exported");
        Ok(())
    }

    /// Export `object` for `path` and every path below it that has no
    /// closer export.
    pub fn export_fallback<T: Object>(&self, path: &str, object: &Arc<T>) -> Result<()> {
        let path = ObjectPath::new(path)?;
        let exported = erase(object, T::interfaces(), self.inner.config.weak_exports)?;
        self.inner.objects.lock().insert_fallback(&path, exported)?;
        debug!(connection = self.inner.id, %path, "fallback exported");
        Ok(())
    }

    /// Remove the export (exact or fallback) at `path`. `false` if there was none.
    pub fn unexport(&self, path: &str) -> Result<bool> {
        let path = ObjectPath::new(path)?;
        let mut objects = self.inner.objects.lock();
        let exact = objects.remove(&path);
        let fallback = objects.remove_fallback(&path);
        Ok(exact || fallback)
    }

    /// Generic proxy for `interface` on `path` at `destination`. On a direct
    /// connection `destination` is ignored.
    pub fn proxy(&self, destination: &str, path: &str, interface: Option<&str>) -> Result<Proxy> {
        let mut target = match self.inner.mode {
            ConnectionMode::Bus => RemoteObjectRef::new(destination, path)?,
            ConnectionMode::Direct => RemoteObjectRef::peer(path)?,
        };
        if let Some(interface) = interface {
            target = target.with_interface(interface)?;
        }
        Ok(self.import(target))
    }

    /// Typed proxy for `I`.
    pub fn get_remote_object<I: RemoteInterface>(&self, destination: &str, path: &str) -> Result<I> {
        self.proxy(destination, path, Some(I::INTERFACE)).map(I::from_proxy)
    }

    /// Proxy whose interface is found by introspecting the remote object.
    ///
    /// Interfaces registered with [`register_remote_interface`] are
    /// preferred; otherwise the first non-standard interface is used, and
    /// with none the proxy has no default interface.
    ///
    /// [`register_remote_interface`]: Self::register_remote_interface
    pub fn discover_remote_object(&self, destination: &str, path: &str) -> Result<Proxy> {
        let probe = self.proxy(destination, path, None)?;
        let node = probe.introspect()?;
        let known = self.inner.known_interfaces.lock().clone();
        let chosen = node
            .interfaces
            .iter()
            .find(|name| known.contains(&name.as_str()))
            .or_else(|| node.interfaces.iter().find(|name| !crate::proxy::is_standard_interface(name)));
        debug!(%path, interface = ?chosen, "discovered remote object");
        match chosen {
            Some(interface) => self.proxy(destination, path, Some(interface)),
            None => Ok(probe),
        }
    }

    /// Record `I` as a known interface definition for discovery.
    pub fn register_remote_interface<I: RemoteInterface>(&self) {
        let mut known = self.inner.known_interfaces.lock();
        if !known.contains(&I::INTERFACE) {
            known.push(I::INTERFACE);
        }
    }

    /// Every remote object a proxy was created for.
    #[must_use]
    pub fn imported_objects(&self) -> Vec<RemoteObjectRef> {
        self.inner.imported.lock().iter().cloned().collect()
    }

    fn import(&self, target: RemoteObjectRef) -> Proxy {
        self.inner.imported.lock().insert(target.clone());
        Proxy::new(self.clone(), target)
    }

    /// Run `handler` for every inbound message matching `rule`.
    ///
    /// On a bus connection the first handler for a rule subscribes with
    /// `AddMatch`.
    pub fn add_match_handler(
        &self,
        rule: MatchRule,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Result<HandlerId> {
        let handler: Arc<SignalHandlerFn> = Arc::new(handler);
        let (id, first) = self.inner.signals.add(rule.clone(), handler);
        if first && self.inner.mode == ConnectionMode::Bus {
            if let Err(err) = self.call_bus::<_, ()>("AddMatch", (rule.to_string(),)) {
                self.inner.signals.remove(id);
                return Err(err);
            }
            debug!(connection = self.inner.id, %rule, "match added");
        }
        Ok(id)
    }

    /// Run `handler` with every decoded `S` signal.
    pub fn add_signal_handler<S: SignalType>(&self, handler: impl Fn(S) + Send + Sync + 'static) -> Result<HandlerId> {
        self.add_match_handler(S::match_rule(), move |message| match S::from_message(message) {
            Ok(signal) => handler(signal),
            Err(err) => warn!(interface = S::INTERFACE, member = S::MEMBER, error = %err, "signal body did not decode"),
        })
    }

    /// Remove a handler; the last one for a rule sends `RemoveMatch`.
    pub fn remove_signal_handler(&self, id: HandlerId) -> Result<bool> {
        let Some((rule, last)) = self.inner.signals.remove(id) else {
            return Ok(false);
        };
        if last && self.inner.mode == ConnectionMode::Bus && self.is_connected() {
            self.call_bus::<_, ()>("RemoveMatch", (rule.to_string(),))?;
            debug!(connection = self.inner.id, %rule, "match removed");
        }
        Ok(true)
    }

    /// Take ownership of `name`; fails if someone else holds it.
    pub fn request_bus_name(&self, name: &str) -> Result<()> {
        check_bus_name(name)?;
        self.require_bus()?;
        let (reply,): (u32,) = self.call_bus("RequestName", (name, NAME_FLAG_DO_NOT_QUEUE))?;
        match reply {
            REQUEST_NAME_PRIMARY_OWNER | REQUEST_NAME_ALREADY_OWNER => {
                info!(connection = self.inner.id, name, "bus name acquired");
                Ok(())
            }
            reply => Err(Error::NameRequest {
                name: name.to_owned(),
                reply,
            }),
        }
    }

    /// Give up `name`.
    pub fn release_bus_name(&self, name: &str) -> Result<()> {
        check_bus_name(name)?;
        self.require_bus()?;
        let (reply,): (u32,) = self.call_bus("ReleaseName", (name,))?;
        if reply == RELEASE_NAME_RELEASED {
            debug!(connection = self.inner.id, name, "bus name released");
            Ok(())
        } else {
            Err(Error::NameRequest {
                name: name.to_owned(),
                reply,
            })
        }
    }

    /// Unique name currently owning `name`.
    pub fn get_name_owner(&self, name: &str) -> Result<String> {
        check_bus_name(name)?;
        self.require_bus()?;
        let (owner,): (String,) = self.call_bus("GetNameOwner", (name,))?;
        Ok(owner)
    }

    fn require_bus(&self) -> Result<()> {
        match self.inner.mode {
            ConnectionMode::Bus => Ok(()),
            ConnectionMode::Direct => Err(Error::Other("not a bus connection".into())),
        }
    }

    fn call_bus<A: IntoBody, R: FromBody>(&self, member: &str, args: A) -> Result<R> {
        let message = Message::method_call(ObjectPath::new(BUS_PATH)?, member)
            .destination(BUS_NAME)
            .interface(BUS_INTERFACE)
            .endian(self.endianness())
            .body(args)
            .build()?;
        let reply = self.call(message)?;
        Ok(reply.body_as()?)
    }
}
