//! Ping-pong between two peers over a private socket, no bus daemon needed.
//!
//! Run with `cargo run --example ping_pong`; set `RUST_LOG=dbuslink=debug`
//! to watch the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Instant;

use dbuslink::transport::{BusAddress, Listener, Transport, TransportConfig};
use dbuslink::{CallContext, Connection, ConnectionBuilder, ConnectionConfig, ConnectionMode, Interface, MatchRule, Object};
use tracing_subscriber::EnvFilter;

const IFACE: &str = "org.example.PingPong";
const ROUNDS: u32 = 1_000;

struct Ponger {
    served: AtomicU32,
}

impl Object for Ponger {
    fn interfaces() -> Vec<Interface<Self>> {
        let iface = Interface::new(IFACE).map(|iface| {
            iface
                .method("Ping", |obj: &Ponger, ctx: &CallContext, (n,): (u32,)| {
                    let served = obj.served.fetch_add(1, Ordering::Relaxed) + 1;
                    if served % 250 == 0 {
                        let _ = ctx.connection().emit_signal("/pong", IFACE, "Milestone", (served,));
                    }
                    Ok(n + 1)
                })
                .signal::<(u32,)>("Milestone")
                .property("Served", |obj: &Ponger| obj.served.load(Ordering::Relaxed))
        });
        iface.into_iter().collect()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let listener = Listener::bind(&BusAddress::unix_path(dir.path().join("pingpong")))?;
    let address = listener.address().to_string();
    println!("listening on {address}");

    let server = thread::spawn(move || -> dbuslink::Result<Connection> {
        let transport = Transport::accept(&listener, TransportConfig::default())?;
        let conn = Connection::from_transport(transport, ConnectionMode::Direct, ConnectionConfig::default())?;
        conn.export_object("/pong", &Arc::new(Ponger { served: AtomicU32::new(0) }))?;
        Ok(conn)
    });

    let client = ConnectionBuilder::new().direct(&address).build()?;
    let server = server.join().map_err(|_| "server thread panicked")??;

    client.add_match_handler(MatchRule::signal(IFACE, "Milestone"), |message| {
        if let Ok((served,)) = message.body_as::<(u32,)>() {
            println!("  server has answered {served} pings");
        }
    })?;

    let pong = client.proxy("", "/pong", Some(IFACE))?;
    let started = Instant::now();
    let mut value = 0u32;
    for _ in 0..ROUNDS {
        let (next,): (u32,) = pong.call("Ping", (value,))?;
        value = next;
    }
    let elapsed = started.elapsed();
    let served: u32 = pong.get_property("Served")?;
    println!(
        "{ROUNDS} round trips in {elapsed:?} ({:.1} us each), counter at {value}, server saw {served}",
        elapsed.as_secs_f64() * 1e6 / f64::from(ROUNDS)
    );

    client.disconnect();
    server.disconnect();

    let totals = dbuslink::metrics();
    println!(
        "messages sent {} / received {}, avg write {:?} us",
        totals.sent_messages,
        totals.received_messages,
        totals.avg_send_latency_us()
    );
    Ok(())
}
