//! In-process message bus for integration tests.
//!
//! Implements just enough of the daemon for the engine: `Hello`, name
//! ownership with `DO_NOT_QUEUE`, match rules, unicast routing with the
//! sender stamped, and signal broadcast by match rule.

#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use dbuslink::protocol::{BUS_NAME, DBusError, error_names};
use dbuslink::transport::{BusAddress, CloseHandle, Listener, MessageWriter, Transport, TransportConfig};
use dbuslink::{MatchRule, Message, MessageType};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route test logs through the harness; `RUST_LOG=dbuslink=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Client {
    writer: Mutex<MessageWriter>,
    closer: CloseHandle,
    rules: Mutex<Vec<MatchRule>>,
}

#[derive(Default)]
struct BusState {
    clients: HashMap<String, Arc<Client>>,
    owners: HashMap<String, String>,
}

struct Shared {
    state: Mutex<BusState>,
    next_client: AtomicU32,
    next_serial: AtomicU32,
}

/// A running test bus. The socket lives in a temporary directory removed on drop.
pub struct TestBus {
    address: String,
    shared: Arc<Shared>,
    _dir: TempDir,
}

impl TestBus {
    pub fn start() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let address = BusAddress::unix_path(dir.path().join("bus"));
        let listener = Listener::bind(&address).expect("bind test bus");
        let address = listener.address().to_string();
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState::default()),
            next_client: AtomicU32::new(1),
            next_serial: AtomicU32::new(1),
        });
        let accepting = Arc::clone(&shared);
        thread::Builder::new()
            .name("test-bus-accept".into())
            .spawn(move || accept_loop(&listener, &accepting))
            .expect("spawn accept loop");
        Self {
            address,
            shared,
            _dir: dir,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current owner of a well-known name.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.shared.state.lock().owners.get(name).cloned()
    }

    /// Drop a client's socket from the bus side.
    pub fn kick(&self, unique_name: &str) {
        if let Some(client) = self.shared.state.lock().clients.get(unique_name) {
            client.closer.close();
        }
    }

    /// Number of match rules a client has registered.
    pub fn rule_count(&self, unique_name: &str) -> usize {
        self.shared
            .state
            .lock()
            .clients
            .get(unique_name)
            .map_or(0, |client| client.rules.lock().len())
    }
}

fn accept_loop(listener: &Listener, shared: &Arc<Shared>) {
    loop {
        let Ok(transport) = Transport::accept(listener, TransportConfig::default()) else {
            continue;
        };
        let Ok((mut reader, writer, closer)) = transport.split() else {
            continue;
        };
        let name = format!(":1.{}", shared.next_client.fetch_add(1, Ordering::Relaxed));
        let client = Arc::new(Client {
            writer: Mutex::new(writer),
            closer,
            rules: Mutex::new(Vec::new()),
        });
        shared.state.lock().clients.insert(name.clone(), Arc::clone(&client));
        let shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("test-bus-{name}"))
            .spawn(move || {
                while let Ok(Some(mut message)) = reader.read_message() {
                    message.set_sender(name.clone());
                    route(&shared, &name, &client, message);
                }
                let mut state = shared.state.lock();
                state.clients.remove(&name);
                state.owners.retain(|_, owner| owner != &name);
            });
        if spawned.is_err() {
            return;
        }
    }
}

fn route(shared: &Shared, sender: &str, client: &Client, message: Message) {
    if message.destination() == Some(BUS_NAME) && message.kind() == MessageType::MethodCall {
        let reply = bus_method(shared, sender, client, &message);
        let reply = match reply {
            Ok(builder) => builder.build(),
            Err(err) => Message::error(&message, &err).build(),
        };
        if let Ok(mut reply) = reply {
            reply.set_serial(shared.next_serial.fetch_add(1, Ordering::Relaxed));
            reply.set_sender(BUS_NAME);
            let _ = client.writer.lock().write_message(&reply);
        }
        return;
    }

    if let Some(destination) = message.destination() {
        let target = {
            let state = shared.state.lock();
            let unique = state.owners.get(destination).map_or(destination, String::as_str);
            state.clients.get(unique).cloned()
        };
        match target {
            Some(target) => {
                let _ = target.writer.lock().write_message(&message);
            }
            None if message.kind() == MessageType::MethodCall && !message.flags().no_reply_expected() => {
                let err = DBusError::new(error_names::SERVICE_UNKNOWN, format!("{destination} is not on the bus"));
                if let Ok(mut reply) = Message::error(&message, &err).build() {
                    reply.set_serial(shared.next_serial.fetch_add(1, Ordering::Relaxed));
                    reply.set_sender(BUS_NAME);
                    let _ = client.writer.lock().write_message(&reply);
                }
            }
            None => {}
        }
        return;
    }

    let listeners: Vec<Arc<Client>> = shared
        .state
        .lock()
        .clients
        .values()
        .filter(|c| c.rules.lock().iter().any(|rule| rule.matches(&message)))
        .cloned()
        .collect();
    for listener in listeners {
        let _ = listener.writer.lock().write_message(&message);
    }
}

fn bus_method(
    shared: &Shared,
    sender: &str,
    client: &Client,
    call: &Message,
) -> Result<dbuslink::protocol::MessageBuilder, DBusError> {
    let reply = Message::method_return(call);
    match call.member().unwrap_or_default() {
        "Hello" => Ok(reply.body((sender.to_owned(),))),
        "RequestName" => {
            let (name, _flags): (String, u32) = call.body_as()?;
            let mut state = shared.state.lock();
            let code = match state.owners.get(&name) {
                None => {
                    state.owners.insert(name, sender.to_owned());
                    1u32
                }
                Some(owner) if owner == sender => 4,
                Some(_) => 3,
            };
            Ok(reply.body((code,)))
        }
        "ReleaseName" => {
            let (name,): (String,) = call.body_as()?;
            let mut state = shared.state.lock();
            let code = match state.owners.get(&name) {
                None => 2u32,
                Some(owner) if owner == sender => {
                    state.owners.remove(&name);
                    1
                }
                Some(_) => 3,
            };
            Ok(reply.body((code,)))
        }
        "GetNameOwner" => {
            let (name,): (String,) = call.body_as()?;
            let state = shared.state.lock();
            if name.starts_with(':') && state.clients.contains_key(&name) {
                return Ok(reply.body((name,)));
            }
            state
                .owners
                .get(&name)
                .map(|owner| reply.body((owner.clone(),)))
                .ok_or_else(|| DBusError::new(error_names::NAME_HAS_NO_OWNER, format!("{name} has no owner")))
        }
        "ListNames" => {
            let state = shared.state.lock();
            let mut names: Vec<String> = state.clients.keys().chain(state.owners.keys()).cloned().collect();
            names.sort();
            Ok(reply.body((names,)))
        }
        "AddMatch" => {
            let (text,): (String,) = call.body_as()?;
            let rule = MatchRule::from_str(&text).map_err(|err| DBusError::invalid_args(err.to_string()))?;
            client.rules.lock().push(rule);
            Ok(reply)
        }
        "RemoveMatch" => {
            let (text,): (String,) = call.body_as()?;
            let rule = MatchRule::from_str(&text).map_err(|err| DBusError::invalid_args(err.to_string()))?;
            let mut rules = client.rules.lock();
            let index = rules
                .iter()
                .position(|r| r == &rule)
                .ok_or_else(|| DBusError::new(error_names::MATCH_RULE_NOT_FOUND, text.clone()))?;
            rules.remove(index);
            Ok(reply)
        }
        other => Err(DBusError::unknown_method(format!("bus has no method {other}"))),
    }
}
