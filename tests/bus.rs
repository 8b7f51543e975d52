mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use common::TestBus;
use dbuslink::connection::{DisconnectCause, SignalType};
use dbuslink::protocol::{Endianness, RemoteError, Variant, error_names};
use dbuslink::proxy::CallbackHandler;
use dbuslink::{
    CallContext, Connection, ConnectionBuilder, ConnectionConfig, DBusError, Error, Interface, MatchRule, Message,
    Object, Result,
};

const SERVICE: &str = "org.example.Service";
const TEST_IFACE: &str = "org.example.Test";

struct TestObject {
    name: String,
    level: AtomicU32,
    gate: AtomicBool,
    touched: AtomicUsize,
}

impl TestObject {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            name: "hi".to_owned(),
            level: AtomicU32::new(7),
            gate: AtomicBool::new(false),
            touched: AtomicUsize::new(0),
        })
    }
}

struct Custom(String);

impl RemoteError for Custom {
    const NAME: &'static str = "org.example.Error.Custom";

    fn from_message(message: &str) -> Self {
        Custom(message.to_owned())
    }

    fn message(&self) -> String {
        self.0.clone()
    }
}

impl Object for TestObject {
    fn interfaces() -> Vec<Interface<Self>> {
        vec![
            Interface::new(TEST_IFACE)
                .unwrap()
                .method("getName", |obj: &TestObject, _ctx: &CallContext, (): ()| {
                    Ok(obj.name.clone())
                })
                .method("echo", |_obj: &TestObject, _ctx: &CallContext, (text,): (String,)| Ok(text))
                .method("whereAmI", |_obj: &TestObject, ctx: &CallContext, (): ()| {
                    Ok(ctx.path().to_string())
                })
                .method("fail", |_obj: &TestObject, _ctx: &CallContext, (): ()| -> std::result::Result<(), DBusError> {
                    Err(Custom("boom".into()).to_dbus_error())
                })
                .method("touch", |obj: &TestObject, _ctx: &CallContext, (): ()| {
                    obj.touched.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .method("isBigEndian", |_obj: &TestObject, ctx: &CallContext, (): ()| {
                    Ok(ctx.message().endian() == Endianness::Big)
                })
                .method("block", |obj: &TestObject, _ctx: &CallContext, (): ()| {
                    let until = Instant::now() + Duration::from_secs(5);
                    while !obj.gate.load(Ordering::SeqCst) && Instant::now() < until {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                })
                .property_rw(
                    "Level",
                    |obj: &TestObject| obj.level.load(Ordering::SeqCst),
                    |obj: &TestObject, level: u32| {
                        obj.level.store(level, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .property("Label", |obj: &TestObject| obj.name.clone()),
        ]
    }
}

fn connect(bus: &TestBus) -> Connection {
    ConnectionBuilder::new()
        .address(bus.address())
        .shared(false)
        .build()
        .expect("connect to test bus")
}

fn service(bus: &TestBus) -> (Connection, Arc<TestObject>) {
    let conn = connect(bus);
    let object = TestObject::new();
    conn.export_object("/Test", &object).unwrap();
    conn.request_bus_name(SERVICE).unwrap();
    (conn, object)
}

fn wait_for(cond: impl Fn() -> bool) -> bool {
    let until = Instant::now() + Duration::from_secs(5);
    while Instant::now() < until {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn hello_assigns_unique_name() {
    let bus = TestBus::start();
    let conn = connect(&bus);
    let name = conn.unique_name().unwrap();
    assert!(name.starts_with(":1."));
    assert_eq!(conn.get_name_owner(&name).unwrap(), name);
    assert!(conn.is_connected());
    conn.disconnect();
}

#[test]
fn remote_method_returns_value() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let client = connect(&bus);

    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();
    let (name,): (String,) = proxy.call("getName", ()).unwrap();
    assert_eq!(name, "hi");
    let (echoed,): (String,) = proxy.call("echo", ("ping",)).unwrap();
    assert_eq!(echoed, "ping");
    assert_eq!(client.pending_calls(), 0);

    client.disconnect();
    svc.disconnect();
}

#[test]
fn unknown_path_yields_unknown_object() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let client = connect(&bus);

    let proxy = client.proxy(SERVICE, "/Nope", Some(TEST_IFACE)).unwrap();
    let err = proxy.call::<_, (String,)>("getName", ()).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_OBJECT));

    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();
    let err = proxy.call::<_, ()>("missing", ()).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_METHOD));
    let err = proxy.call::<_, (String,)>("echo", (5u32,)).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_METHOD));

    client.disconnect();
    svc.disconnect();
}

#[test]
fn unregistered_error_names_arrive_as_failed() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();

    let err = proxy.call::<_, ()>("fail", ()).unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.name(), error_names::FAILED);
    assert!(remote.message().contains(Custom::NAME));

    client.register_error::<Custom>();
    let err = proxy.call::<_, ()>("fail", ()).unwrap_err();
    let Ok(Custom(text)) = err.remote_as::<Custom>() else {
        panic!("registered error was not preserved");
    };
    assert_eq!(text, "boom");

    client.disconnect();
    svc.disconnect();
}

#[test]
fn missing_destination_is_service_unknown() {
    let bus = TestBus::start();
    let client = connect(&bus);
    let proxy = client.proxy("org.example.Nobody", "/Test", Some(TEST_IFACE)).unwrap();
    let err = proxy.call::<_, ()>("getName", ()).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::SERVICE_UNKNOWN));
    client.disconnect();
}

#[test]
fn match_rule_filters_by_member() {
    let bus = TestBus::start();
    let emitter = connect(&bus);
    let receiver = connect(&bus);

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    receiver
        .add_match_handler(MatchRule::signal("org.foo", "methodnoarg"), move |message: &Message| {
            assert_eq!(message.member(), Some("methodnoarg"));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let name = receiver.unique_name().unwrap();
    assert_eq!(bus.rule_count(&name), 1);

    emitter.emit_signal("/org/foo", "org.foo", "other", ()).unwrap();
    emitter.emit_signal("/org/foo", "org.foo", "methodnoarg", ()).unwrap();
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    emitter.disconnect();
    receiver.disconnect();
}

#[test]
fn every_handler_runs_even_if_one_panics() {
    let bus = TestBus::start();
    let emitter = connect(&bus);
    let receiver = connect(&bus);
    let before = dbuslink::metrics().handler_failures;

    let hits = Arc::new(AtomicUsize::new(0));
    let rule = MatchRule::signal("org.example.Fan", "Out");
    let mut ids = Vec::new();
    for n in 0..3 {
        let seen = Arc::clone(&hits);
        let id = receiver
            .add_match_handler(rule.clone(), move |_message: &Message| {
                assert!(n != 1, "handler {n} fails on purpose");
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        ids.push(id);
    }
    let name = receiver.unique_name().unwrap();
    assert_eq!(bus.rule_count(&name), 1, "one AddMatch per distinct rule");

    emitter.emit_signal("/fan", "org.example.Fan", "Out", (1u32,)).unwrap();
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 2));
    assert!(wait_for(|| dbuslink::metrics().handler_failures > before));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    for id in ids {
        assert!(receiver.remove_signal_handler(id).unwrap());
    }
    assert!(wait_for(|| bus.rule_count(&name) == 0));

    emitter.disconnect();
    receiver.disconnect();
}

struct Tick(u32);

impl SignalType for Tick {
    const INTERFACE: &'static str = "org.example.Clock";
    const MEMBER: &'static str = "Tick";

    fn from_message(message: &Message) -> Result<Self> {
        let (n,): (u32,) = message.body_as()?;
        Ok(Tick(n))
    }
}

#[test]
fn typed_signal_handler_decodes_body() {
    let bus = TestBus::start();
    let emitter = connect(&bus);
    let receiver = connect(&bus);

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    receiver
        .add_signal_handler(move |tick: Tick| {
            let _ = tx.lock().send(tick.0);
        })
        .unwrap();

    emitter.emit_signal("/clock", Tick::INTERFACE, Tick::MEMBER, (42u32,)).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);

    emitter.disconnect();
    receiver.disconnect();
}

#[test]
fn bus_name_contention() {
    let bus = TestBus::start();
    let first = connect(&bus);
    let second = connect(&bus);
    let name = "org.example.Contended";

    first.request_bus_name(name).unwrap();
    first.request_bus_name(name).unwrap();
    match second.request_bus_name(name) {
        Err(Error::NameRequest { reply, .. }) => assert_eq!(reply, 3),
        other => panic!("expected name request failure, got {other:?}"),
    }
    assert_eq!(bus.owner_of(name), first.unique_name());

    first.release_bus_name(name).unwrap();
    second.request_bus_name(name).unwrap();
    assert_eq!(second.get_name_owner(name).unwrap(), second.unique_name().unwrap());

    first.disconnect();
    second.disconnect();
}

#[test]
fn disconnect_fails_blocked_calls_promptly() {
    const CALLS: usize = 6;
    let bus = TestBus::start();
    let (svc, object) = service(&bus);
    let client = ConnectionBuilder::new()
        .address(bus.address())
        .shared(false)
        .shutdown_grace(Duration::from_secs(2))
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    for _ in 0..CALLS {
        let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();
        let tx = tx.clone();
        thread::spawn(move || {
            let _ = tx.send(proxy.call::<_, ()>("block", ()));
        });
    }
    assert!(wait_for(|| client.pending_calls() == CALLS));

    let started = Instant::now();
    client.disconnect();
    for _ in 0..CALLS {
        let result = rx.recv_timeout(Duration::from_secs(3)).expect("call returned");
        assert!(result.unwrap_err().is_disconnected());
    }
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(client.disconnect_cause(), Some(DisconnectCause::Requested));
    assert!(client.send_message(
        Message::method_call("/Test".parse().unwrap(), "getName").destination(SERVICE).build().unwrap()
    ).unwrap_err().is_disconnected());

    object.gate.store(true, Ordering::SeqCst);
    svc.disconnect();
}

#[test]
fn shared_connections_are_reference_counted() {
    let bus = TestBus::start();
    let build = || ConnectionBuilder::new().address(bus.address()).build().unwrap();
    let a = build();
    let b = build();
    let c = build();
    assert_eq!(a.unique_name(), b.unique_name());
    assert_eq!(b.unique_name(), c.unique_name());

    a.disconnect();
    b.disconnect();
    assert!(c.is_connected());
    c.get_name_owner(&c.unique_name().unwrap()).unwrap();

    c.disconnect();
    assert!(!c.is_connected());

    let fresh = build();
    assert_ne!(fresh.unique_name(), c.unique_name());
    fresh.disconnect();
}

#[test]
fn bus_side_close_reports_transport_cause() {
    let bus = TestBus::start();
    let client = connect(&bus);
    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    client.on_disconnect(move |cause| {
        let _ = tx.lock().send(cause.clone());
    });

    bus.kick(&client.unique_name().unwrap());
    let cause = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(cause, DisconnectCause::Transport(_)));
    assert!(!client.is_connected());
}

#[test]
fn async_replies_and_callbacks() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();

    let reply = proxy.call_async::<_, (String,)>("echo", ("later",)).unwrap();
    assert!(reply.serial() > 0);
    assert_eq!(reply.wait().unwrap().0, "later");

    let reply = proxy.call_async::<_, (String,)>("getName", ()).unwrap();
    assert!(wait_for(|| reply.has_reply()));
    assert_eq!(reply.try_take().unwrap().unwrap().0, "hi");

    struct Collect(mpsc::Sender<std::result::Result<String, String>>);

    impl CallbackHandler<(String,)> for Collect {
        fn handle(self, (value,): (String,)) {
            let _ = self.0.send(Ok(value));
        }

        fn handle_error(self, error: Error) {
            let _ = self.0.send(Err(error.to_string()));
        }
    }

    let (tx, rx) = mpsc::channel();
    proxy.call_with_callback("echo", ("cb",), Collect(tx.clone())).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok("cb".to_owned()));
    proxy.call_with_callback("missing", (), Collect(tx)).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_err());

    client.disconnect();
    svc.disconnect();
}

#[test]
fn properties_get_set_and_get_all() {
    let bus = TestBus::start();
    let (svc, object) = service(&bus);
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();

    assert_eq!(proxy.get_property::<u32>("Level").unwrap(), 7);
    proxy.set_property("Level", 9u32).unwrap();
    assert_eq!(object.level.load(Ordering::SeqCst), 9);

    let err = proxy.set_property("Label", "nope").unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::PROPERTY_READ_ONLY));
    let err = proxy.set_property("Level", "nine").unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::INVALID_ARGS));
    let err = proxy.get_property::<u32>("Missing").unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_PROPERTY));

    let all = proxy.get_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["Level"], dbuslink::Value::UInt32(9));

    client.disconnect();
    svc.disconnect();
}

#[test]
fn introspection_lists_interfaces_and_children() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    svc.export_object("/Test/a", &TestObject::new()).unwrap();
    svc.export_object("/Test/b/deep", &TestObject::new()).unwrap();
    let client = connect(&bus);

    let node = client.proxy(SERVICE, "/Test", None).unwrap().introspect().unwrap();
    assert!(node.interfaces.iter().any(|i| i == TEST_IFACE));
    assert!(node.interfaces.iter().any(|i| i == "org.freedesktop.DBus.Introspectable"));
    assert_eq!(node.children, vec!["a".to_owned(), "b".to_owned()]);

    let intermediate = client.proxy(SERVICE, "/Test/b", None).unwrap().introspect().unwrap();
    assert_eq!(intermediate.children, vec!["deep".to_owned()]);

    let root = client.proxy(SERVICE, "/", None).unwrap().introspect().unwrap();
    assert_eq!(root.children, vec!["Test".to_owned()]);

    let discovered = client.discover_remote_object(SERVICE, "/Test").unwrap();
    assert_eq!(discovered.target().interface(), Some(TEST_IFACE));
    assert!(!client.imported_objects().is_empty());

    client.disconnect();
    svc.disconnect();
}

#[test]
fn peer_interface_is_always_answered() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let client = connect(&bus);

    let proxy = client.proxy(SERVICE, "/Test", None).unwrap();
    proxy.ping().unwrap();
    assert!(!proxy.machine_id().unwrap().is_empty());

    client.disconnect();
    svc.disconnect();
}

#[test]
fn fallback_serves_paths_below_prefix() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    svc.export_fallback("/tree", &TestObject::new()).unwrap();
    let client = connect(&bus);

    let proxy = client.proxy(SERVICE, "/tree/x/y", Some(TEST_IFACE)).unwrap();
    let (path,): (String,) = proxy.call("whereAmI", ()).unwrap();
    assert_eq!(path, "/tree/x/y");

    assert!(svc.unexport("/tree").unwrap());
    let err = proxy.call::<_, (String,)>("whereAmI", ()).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_OBJECT));

    client.disconnect();
    svc.disconnect();
}

#[test]
fn duplicate_export_is_rejected() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    assert!(svc.export_object("/Test", &TestObject::new()).is_err());
    assert!(svc.unexport("/Test").unwrap());
    assert!(!svc.unexport("/Test").unwrap());
    svc.export_object("/Test", &TestObject::new()).unwrap();
    svc.disconnect();
}

/// Next reply the connection could not match, waiting up to five seconds.
fn next_spurious(conn: &Connection) -> Option<Message> {
    let until = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(message) = conn.poll_spurious_reply() {
            return Some(message);
        }
        if Instant::now() >= until {
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn unmatched_and_cancelled_replies_are_queued_as_spurious() {
    let bus = TestBus::start();
    let (svc, object) = service(&bus);
    let client = connect(&bus);
    assert!(client.poll_spurious_reply().is_none());

    let mut stray = Message::method_call("/Test".parse().unwrap(), "nothing").build().unwrap();
    stray.set_serial(4242);
    stray.set_sender(client.unique_name().unwrap());
    svc.send_message(Message::method_return(&stray).arg("late").build().unwrap())
        .unwrap();

    let spurious = next_spurious(&client).expect("stray reply queued");
    assert_eq!(spurious.reply_serial(), Some(4242));
    assert_eq!(spurious.body_as::<(String,)>().unwrap().0, "late");

    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();
    let reply = proxy.call_async::<_, ()>("block", ()).unwrap();
    let serial = reply.serial();
    assert_eq!(client.pending_calls(), 1);
    assert!(reply.cancel());
    assert_eq!(client.pending_calls(), 0);

    object.gate.store(true, Ordering::SeqCst);
    let late = next_spurious(&client).expect("cancelled call's reply queued");
    assert_eq!(late.reply_serial(), Some(serial));
    assert!(client.poll_spurious_reply().is_none());

    client.disconnect();
    svc.disconnect();
}

const PROPS_IFACE: &str = "org.example.Props";

/// Declares one property through the builder and answers others through
/// its own Properties interface.
struct NativeProps {
    native: AtomicU32,
}

impl Object for NativeProps {
    fn interfaces() -> Vec<Interface<Self>> {
        vec![
            Interface::new(PROPS_IFACE)
                .unwrap()
                .property("Declared", |_obj: &NativeProps| "builder".to_owned()),
            Interface::new("org.freedesktop.DBus.Properties")
                .unwrap()
                .method(
                    "Get",
                    |obj: &NativeProps, _ctx: &CallContext, (_iface, name): (String, String)| match name.as_str() {
                        "Native" => Ok(Variant::new(obj.native.load(Ordering::SeqCst))),
                        _ => Err(DBusError::unknown_property(format!("no {name} here either"))),
                    },
                )
                .method(
                    "Set",
                    |obj: &NativeProps, _ctx: &CallContext, (_iface, name, value): (String, String, Variant)| {
                        match (name.as_str(), value.into_inner()) {
                            ("Native", dbuslink::Value::UInt32(n)) => {
                                obj.native.store(n, Ordering::SeqCst);
                                Ok(())
                            }
                            _ => Err(DBusError::unknown_property(format!("cannot set {name}"))),
                        }
                    },
                )
                .method("GetAll", |obj: &NativeProps, _ctx: &CallContext, (_iface,): (String,)| {
                    let mut all = std::collections::HashMap::new();
                    all.insert("Native".to_owned(), Variant::new(obj.native.load(Ordering::SeqCst)));
                    // Shadowed by the declared property of the same name.
                    all.insert("Declared".to_owned(), Variant::new("native"));
                    Ok(all)
                }),
        ]
    }
}

#[test]
fn native_properties_interface_is_merged() {
    let bus = TestBus::start();
    let svc = connect(&bus);
    svc.export_object("/Props", &Arc::new(NativeProps { native: AtomicU32::new(5) }))
        .unwrap();
    svc.request_bus_name(SERVICE).unwrap();
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Props", Some(PROPS_IFACE)).unwrap();

    let all = proxy.get_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["Declared"], dbuslink::Value::Str("builder".to_owned()));
    assert_eq!(all["Native"], dbuslink::Value::UInt32(5));

    assert_eq!(proxy.get_property::<String>("Declared").unwrap(), "builder");
    assert_eq!(proxy.get_property::<u32>("Native").unwrap(), 5);
    proxy.set_property("Native", 11u32).unwrap();
    assert_eq!(proxy.get_property::<u32>("Native").unwrap(), 11);

    let err = proxy.get_property::<u32>("Missing").unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_PROPERTY));

    client.disconnect();
    svc.disconnect();
}

#[test]
fn big_endian_connection_round_trips() {
    let bus = TestBus::start();
    let (svc, _object) = service(&bus);
    let config = ConnectionConfig {
        endianness: Endianness::Big,
        ..ConnectionConfig::default()
    };
    let client = ConnectionBuilder::new()
        .address(bus.address())
        .shared(false)
        .config(config)
        .build()
        .unwrap();

    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();
    let (big,): (bool,) = proxy.call("isBigEndian", ()).unwrap();
    assert!(big);
    let (echoed,): (String,) = proxy.call("echo", ("swapped",)).unwrap();
    assert_eq!(echoed, "swapped");

    let call = Message::method_call("/Test".parse().unwrap(), "getName")
        .destination(SERVICE)
        .interface(TEST_IFACE)
        .endian(client.config().endianness)
        .build()
        .unwrap();
    let reply = client.call(call).unwrap();
    assert_eq!(reply.endian(), Endianness::Big);
    assert_eq!(reply.body_as::<(String,)>().unwrap().0, "hi");

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    svc.add_match_handler(MatchRule::signal(TEST_IFACE, "Swapped"), move |message| {
        let _ = tx.lock().send((message.endian(), message.body_as::<(u64,)>().map(|(n,)| n)));
    })
    .unwrap();
    client.emit_signal("/Test", TEST_IFACE, "Swapped", (0x0102_0304_0506_0708u64,)).unwrap();
    let (endian, value) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(endian, Endianness::Big);
    assert_eq!(value.unwrap(), 0x0102_0304_0506_0708);

    client.disconnect();
    svc.disconnect();
}

#[test]
fn no_reply_calls_run_without_answer() {
    let bus = TestBus::start();
    let (svc, object) = service(&bus);
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();

    proxy.call_no_reply("touch", ()).unwrap();
    proxy.call_no_reply("fail", ()).unwrap();
    assert_eq!(client.pending_calls(), 0);
    assert!(wait_for(|| object.touched.load(Ordering::SeqCst) == 1));

    // A normal call behind them proves nothing else came back.
    let (name,): (String,) = proxy.call("getName", ()).unwrap();
    assert_eq!(name, "hi");
    assert!(client.poll_spurious_reply().is_none());

    client.disconnect();
    svc.disconnect();
}

#[test]
fn weak_exports_vanish_with_their_owner() {
    let bus = TestBus::start();
    let svc = ConnectionBuilder::new()
        .address(bus.address())
        .shared(false)
        .weak_exports(true)
        .build()
        .unwrap();
    let object = TestObject::new();
    svc.export_object("/Weak", &object).unwrap();
    svc.request_bus_name(SERVICE).unwrap();
    let client = connect(&bus);

    let proxy = client.proxy(SERVICE, "/Weak", Some(TEST_IFACE)).unwrap();
    let (name,): (String,) = proxy.call("getName", ()).unwrap();
    assert_eq!(name, "hi");
    let root = client.proxy(SERVICE, "/", None).unwrap();
    assert_eq!(root.introspect().unwrap().children, vec!["Weak".to_owned()]);

    drop(object);
    let err = proxy.call::<_, (String,)>("getName", ()).unwrap_err();
    assert_eq!(err.remote_name(), Some(error_names::UNKNOWN_OBJECT));
    assert!(root.introspect().unwrap().children.is_empty());

    // The path is free again.
    svc.export_object("/Weak", &TestObject::new()).unwrap();

    client.disconnect();
    svc.disconnect();
}

#[test]
fn pending_callback_hears_about_disconnect() {
    struct Outcome(mpsc::Sender<std::result::Result<(), Error>>);

    impl CallbackHandler<()> for Outcome {
        fn handle(self, (): ()) {
            let _ = self.0.send(Ok(()));
        }

        fn handle_error(self, error: Error) {
            let _ = self.0.send(Err(error));
        }
    }

    let bus = TestBus::start();
    let (svc, object) = service(&bus);
    let client = connect(&bus);
    let proxy = client.proxy(SERVICE, "/Test", Some(TEST_IFACE)).unwrap();

    let (tx, rx) = mpsc::channel();
    proxy.call_with_callback("block", (), Outcome(tx)).unwrap();
    assert_eq!(client.pending_calls(), 1);

    client.disconnect();
    let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("callback ran");
    assert!(outcome.unwrap_err().is_disconnected());
    assert_eq!(client.pending_calls(), 0);

    object.gate.store(true, Ordering::SeqCst);
    svc.disconnect();
}
