//! In-flight method calls keyed by serial.
//!
//! Each entry is resolved exactly once: by its reply, by cancellation or by
//! the disconnect sweep, whichever removes it from the map first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::protocol::{Error, Message, Result};

/// Called once with the reply (or the error standing in for it).
pub(crate) type ReplyCallback = Box<dyn FnOnce(Result<Message>) + Send>;

enum SlotState {
    Waiting,
    Ready(Result<Message>),
    Taken,
}

/// Rendezvous between the reader and a caller blocked on a reply.
pub(crate) struct ReplySlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ReplySlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Waiting),
            ready: Condvar::new(),
        })
    }

    /// Store the result and wake the waiter. `false` if one was already stored.
    pub(crate) fn complete(&self, result: Result<Message>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Waiting) {
            return false;
        }
        *state = SlotState::Ready(result);
        self.ready.notify_all();
        true
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Ready(_))
    }

    /// Block until the result is stored, then take it.
    pub(crate) fn wait(&self) -> Result<Message> {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Waiting) {
            self.ready.wait(&mut state);
        }
        Self::take(&mut state).unwrap_or_else(|| Err(Error::Other("reply already taken".into())))
    }

    pub(crate) fn try_take(&self) -> Option<Result<Message>> {
        Self::take(&mut self.state.lock())
    }

    fn take(state: &mut SlotState) -> Option<Result<Message>> {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Ready(result) => Some(result),
            SlotState::Waiting => {
                *state = SlotState::Waiting;
                None
            }
            SlotState::Taken => None,
        }
    }
}

/// How a pending call is resolved.
pub(crate) enum Waiter {
    Slot(Arc<ReplySlot>),
    Callback(ReplyCallback),
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(_) => f.write_str("Waiter::Slot"),
            Self::Callback(_) => f.write_str("Waiter::Callback"),
        }
    }
}

#[derive(Default)]
struct PendingState {
    calls: HashMap<u32, Waiter>,
    closed: bool,
}

/// Registry of calls awaiting a reply.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    /// Track `serial`. Fails once the registry was closed by a disconnect.
    pub(crate) fn register(&self, serial: u32, waiter: Waiter) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Disconnected("connection is closing".into()));
        }
        trace!(serial, "pending call registered");
        state.calls.insert(serial, waiter);
        Ok(())
    }

    /// Remove and return the waiter for `serial`, if still pending.
    pub(crate) fn resolve(&self, serial: u32) -> Option<Waiter> {
        self.state.lock().calls.remove(&serial)
    }

    pub(crate) fn contains(&self, serial: u32) -> bool {
        self.state.lock().calls.contains_key(&serial)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Refuse new registrations and hand back everything still pending.
    pub(crate) fn close(&self) -> Vec<(u32, Waiter)> {
        let mut state = self.state.lock();
        state.closed = true;
        let mut drained: Vec<_> = state.calls.drain().collect();
        drained.sort_by_key(|(serial, _)| *serial);
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::protocol::ObjectPath;

    fn reply() -> Message {
        Message::signal(ObjectPath::root(), "org.example.T", "Done")
            .build()
            .unwrap()
    }

    #[test]
    fn slot_resolves_once() {
        let slot = ReplySlot::new();
        assert!(!slot.is_ready());
        assert!(slot.complete(Ok(reply())));
        assert!(!slot.complete(Err(Error::Disconnected("late".into()))));
        assert!(slot.is_ready());
        assert!(slot.wait().is_ok());
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn waiter_wakes_from_another_thread() {
        let slot = ReplySlot::new();
        let remote = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.complete(Ok(reply()));
        });
        assert!(slot.wait().is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn resolve_removes_entry() {
        let pending = PendingCalls::default();
        pending.register(7, Waiter::Slot(ReplySlot::new())).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending.resolve(7).is_some());
        assert!(pending.resolve(7).is_none());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn close_drains_and_refuses() {
        let pending = PendingCalls::default();
        let hits = Arc::new(AtomicUsize::new(0));
        for serial in 1..=3 {
            let hits = Arc::clone(&hits);
            pending
                .register(
                    serial,
                    Waiter::Callback(Box::new(move |result| {
                        assert!(result.is_err());
                        hits.fetch_add(1, Ordering::SeqCst);
                    })),
                )
                .unwrap();
        }
        let drained = pending.close();
        assert_eq!(drained.iter().map(|(s, _)| *s).collect::<Vec<_>>(), [1, 2, 3]);
        for (_, waiter) in drained {
            if let Waiter::Callback(callback) = waiter {
                callback(Err(Error::Disconnected("closed".into())));
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let err = pending.register(4, Waiter::Slot(ReplySlot::new())).unwrap_err();
        assert!(err.is_disconnected());
    }
}
