//! Inbound message classification and routing.
//!
//! The reader thread calls [`dispatch`] for every decoded message. Replies
//! are matched against pending calls right there; method calls and signal
//! handlers are handed to the worker pools.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::object::CallContext;
use crate::object::MethodResult;
use crate::protocol::introspect::{INTROSPECTABLE_INTERFACE, PEER_INTERFACE, PROPERTIES_INTERFACE, node_xml};
use crate::protocol::metrics::Metrics;
use crate::protocol::{DBusError, Dict, FromBody, Message, MessageType, ObjectPath, SignatureType, Value};
use crate::transport::machine_id;

use super::Connection;

/// Route one inbound message.
pub(crate) fn dispatch(conn: &Connection, message: Message) {
    match message.kind() {
        MessageType::MethodCall => {
            let worker = conn.clone();
            let serial = message.serial();
            if !conn.inner.pools.method_call.execute(move || handle_call(&worker, message)) {
                debug!(serial, "method call dropped during shutdown");
            }
        }
        MessageType::MethodReturn | MessageType::Error => handle_reply(conn, message),
        MessageType::Signal => handle_signal(conn, message),
    }
}

fn handle_reply(conn: &Connection, message: Message) {
    let Some(serial) = message.reply_serial() else {
        warn!(serial = message.serial(), "reply without reply serial");
        return;
    };
    match conn.inner.pending.resolve(serial) {
        Some(waiter) => {
            trace!(serial, kind = %message.kind(), "reply matched");
            let result = if message.kind() == MessageType::Error {
                Err(conn.inner.remote_error(&message))
            } else {
                Ok(message)
            };
            conn.inner.complete(waiter, result);
        }
        None => {
            Metrics::record_spurious_reply();
            warn!(reply_serial = serial, kind = %message.kind(), "reply matches no pending call");
            conn.inner.push_spurious(message);
        }
    }
}

fn handle_signal(conn: &Connection, message: Message) {
    let handlers = conn.inner.signals.matching(&message);
    if handlers.is_empty() {
        trace!(member = ?message.member(), "signal without handlers");
        return;
    }
    let message = Arc::new(message);
    for handler in handlers {
        let message = Arc::clone(&message);
        if !conn.inner.pools.signal.execute(move || handler(&message)) {
            debug!("signal dropped during shutdown");
            break;
        }
    }
}

/// Invoke the target of a method call and send the reply.
pub(crate) fn handle_call(conn: &Connection, message: Message) {
    let serial = message.serial();
    let no_reply = message.flags().no_reply_expected();
    let Some(path) = message.path().cloned() else {
        warn!(serial, "method call without path");
        return;
    };
    let ctx = CallContext::new(message, path, conn.clone());
    let outcome = match catch_unwind(AssertUnwindSafe(|| invoke(conn, &ctx))) {
        Ok(outcome) => outcome,
        Err(_) => {
            Metrics::record_handler_failure();
            warn!(serial, member = ctx.member(), path = %ctx.path(), "method handler panicked");
            Err(DBusError::failed(format!("method {} failed", ctx.member())))
        }
    };
    if no_reply {
        if let Err(err) = outcome {
            debug!(serial, error = %err, "call failed, no reply requested");
        }
        return;
    }
    let reply = match outcome {
        Ok(values) => Message::method_return(ctx.message()).body(values).build(),
        Err(err) => {
            Metrics::record_error();
            Message::error(ctx.message(), &err).build()
        }
    };
    let reply = reply.or_else(|err| {
        warn!(serial, error = %err, "reply could not be encoded");
        Message::error(ctx.message(), &DBusError::failed(err.to_string())).build()
    });
    match reply {
        Ok(reply) => {
            if let Err(err) = conn.inner.send(reply) {
                debug!(serial, error = %err, "reply not sent");
            }
        }
        Err(err) => warn!(serial, error = %err, "error reply could not be encoded"),
    }
}

fn invoke(conn: &Connection, ctx: &CallContext) -> MethodResult {
    let member = ctx.member();
    match ctx.interface() {
        Some(PEER_INTERFACE) => return peer(member),
        Some(INTROSPECTABLE_INTERFACE) if member == "Introspect" => return introspect(conn, ctx.path()),
        Some(PROPERTIES_INTERFACE) => {
            if let Some(result) = properties(conn, ctx) {
                return result;
            }
        }
        None if matches!(member, "Ping" | "GetMachineId") && !has_method(conn, ctx.path(), member) => {
            return peer(member);
        }
        None if member == "Introspect" && !has_method(conn, ctx.path(), member) => {
            return introspect(conn, ctx.path());
        }
        _ => {}
    }

    let resolved = conn.inner.objects.lock().lookup(ctx.path());
    let Some(resolved) = resolved else {
        return Err(DBusError::unknown_object(format!("no object at {}", ctx.path())));
    };
    let args = ctx
        .message()
        .body_with_limit(conn.inner.config.max_array_length)
        .map_err(DBusError::from)?;
    let signature = ctx.message().signature();
    trace!(path = %ctx.path(), member, signature = signature.as_str(), fallback = resolved.fallback, "invoking");
    resolved
        .object
        .invoke(ctx, ctx.interface(), member, signature.as_str(), args)
}

fn has_method(conn: &Connection, path: &ObjectPath, member: &str) -> bool {
    conn.inner
        .objects
        .lock()
        .lookup(path)
        .is_some_and(|resolved| {
            resolved
                .object
                .interfaces()
                .iter()
                .any(|iface| iface.methods.iter().any(|m| m.name == member))
        })
}

fn peer(member: &str) -> MethodResult {
    match member {
        "Ping" => Ok(Vec::new()),
        "GetMachineId" => Ok(vec![Value::Str(machine_id())]),
        other => Err(DBusError::unknown_method(format!("{PEER_INTERFACE} has no method {other}"))),
    }
}

fn introspect(conn: &Connection, path: &ObjectPath) -> MethodResult {
    let mut objects = conn.inner.objects.lock();
    let resolved = objects.lookup(path);
    let children = objects.children(path);
    drop(objects);
    if resolved.is_none() && children.is_empty() && !path.is_root() {
        return Err(DBusError::unknown_object(format!("no object at {path}")));
    }
    let xml = match &resolved {
        Some(resolved) => node_xml(resolved.object.interfaces(), &children),
        None => node_xml([], &children),
    };
    Ok(vec![Value::Str(xml)])
}

/// `None` hands the call on to a natively declared Properties interface.
fn properties(conn: &Connection, ctx: &CallContext) -> Option<MethodResult> {
    let resolved = conn.inner.objects.lock().lookup(ctx.path());
    let Some(resolved) = resolved else {
        return Some(Err(DBusError::unknown_object(format!("no object at {}", ctx.path()))));
    };
    let object = resolved.object;
    let native = object.has_interface(PROPERTIES_INTERFACE);
    let body = match ctx.message().body() {
        Ok(body) => body,
        Err(err) => return Some(Err(err.into())),
    };
    match ctx.member() {
        "Get" => {
            let (interface, name) = match <(String, String)>::from_body(body) {
                Ok(args) => args,
                Err(err) => return Some(Err(err.into())),
            };
            match object.get_property(&interface, &name) {
                Some(result) => Some(result.map(|value| vec![Value::Variant(Box::new(value))])),
                None if native => None,
                None => Some(Err(unknown_property(&interface, &name))),
            }
        }
        "Set" => {
            let (interface, name, value) = match <(String, String, Value)>::from_body(body) {
                Ok(args) => args,
                Err(err) => return Some(Err(err.into())),
            };
            let value = match value {
                Value::Variant(inner) => *inner,
                other => other,
            };
            match object.set_property(&interface, &name, value) {
                Some(result) => Some(result.map(|()| Vec::new())),
                None if native => None,
                None => Some(Err(unknown_property(&interface, &name))),
            }
        }
        "GetAll" => {
            let (interface,) = match <(String,)>::from_body(body.clone()) {
                Ok(args) => args,
                Err(err) => return Some(Err(err.into())),
            };
            Some(get_all(object.as_ref(), ctx, &interface, native, body))
        }
        _ => None,
    }
}

fn get_all(
    object: &dyn crate::object::exported::ErasedObject,
    ctx: &CallContext,
    interface: &str,
    native: bool,
    body: Vec<Value>,
) -> MethodResult {
    let mut entries: Vec<(Value, Value)> = object
        .get_all(interface)?
        .into_iter()
        .map(|(name, value)| (Value::Str(name), Value::Variant(Box::new(value))))
        .collect();
    if native {
        let extra = object.invoke(ctx, Some(PROPERTIES_INTERFACE), "GetAll", "s", body)?;
        if let Some(Value::Dict(dict)) = extra.into_iter().next() {
            for (key, value) in dict.into_entries() {
                if !entries.iter().any(|(k, _)| *k == key) {
                    entries.push((key, value));
                }
            }
        }
    }
    let dict = Dict::new(SignatureType::String, SignatureType::Variant, entries)?;
    Ok(vec![Value::Dict(dict)])
}

fn unknown_property(interface: &str, name: &str) -> DBusError {
    if interface.is_empty() {
        DBusError::unknown_property(format!("no property {name}"))
    } else {
        DBusError::unknown_property(format!("no property {name} on {interface}"))
    }
}
