//! Single outbound writer thread. Messages leave in the order they were
//! queued, which is also serial order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::pending::{PendingCalls, Waiter};
use crate::protocol::{Error, Message, Result};
use crate::transport::{CloseHandle, MessageWriter, TransportError};

/// Notified when a queued message could not be written.
pub(crate) type FailureHook = Box<dyn Fn(u32, TransportError) + Send>;

const JOIN_POLL: Duration = Duration::from_millis(5);

struct QueueState {
    tx: Option<Sender<Message>>,
    last_serial: u32,
}

pub(crate) struct SendQueue {
    state: Mutex<QueueState>,
    discard: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    closer: CloseHandle,
}

impl SendQueue {
    pub(crate) fn start(writer: MessageWriter, closer: CloseHandle, on_failure: FailureHook) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let discard = Arc::new(AtomicBool::new(false));
        let thread = {
            let discard = Arc::clone(&discard);
            let closer = closer.clone();
            thread::Builder::new()
                .name("dbuslink-sender".into())
                .spawn(move || send_loop(&rx, writer, &discard, &closer, &on_failure))?
        };
        Ok(Self {
            state: Mutex::new(QueueState {
                tx: Some(tx),
                last_serial: 0,
            }),
            discard,
            thread: Mutex::new(Some(thread)),
            closer,
        })
    }

    /// Stamp the next free serial on `message` and queue it.
    ///
    /// With a `waiter` the call is tracked in `pending` before the message is
    /// queued, so a reply can never overtake its entry. Serials still pending
    /// are skipped once the counter wraps.
    pub(crate) fn enqueue(&self, mut message: Message, pending: &PendingCalls, waiter: Option<Waiter>) -> Result<u32> {
        let mut state = self.state.lock();
        let Some(tx) = state.tx.as_ref() else {
            return Err(Error::Disconnected("connection is closed".into()));
        };
        let serial = next_serial(state.last_serial, |serial| pending.contains(serial));
        let tracked = waiter.is_some();
        if let Some(waiter) = waiter {
            pending.register(serial, waiter)?;
        }
        message.set_serial(serial);
        if tx.send(message).is_err() {
            if tracked {
                pending.resolve(serial);
            }
            return Err(Error::Disconnected("sender stopped".into()));
        }
        state.last_serial = serial;
        Ok(serial)
    }

    /// Refuse further messages.
    pub(crate) fn stop_accepting(&self) {
        drop(self.state.lock().tx.take());
    }

    /// Stop the writer thread, writing what is queued when `flush` is set.
    /// Gives up at `deadline` by closing the socket under the writer.
    pub(crate) fn finish(&self, flush: bool, deadline: Instant) {
        self.stop_accepting();
        if !flush {
            self.discard.store(true, Ordering::Release);
        }
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        if !handle.is_finished() {
            warn!("outbound queue not drained within grace period");
            self.discard.store(true, Ordering::Release);
            self.closer.close();
        }
        let _ = handle.join();
    }
}

/// Serial after `last`, never 0 and never one `in_use` reports.
fn next_serial(last: u32, in_use: impl Fn(u32) -> bool) -> u32 {
    let mut serial = last;
    loop {
        serial = serial.wrapping_add(1);
        if serial != 0 && !in_use(serial) {
            return serial;
        }
    }
}

fn send_loop(
    rx: &Receiver<Message>,
    mut writer: MessageWriter,
    discard: &AtomicBool,
    closer: &CloseHandle,
    on_failure: &FailureHook,
) {
    while let Ok(message) = rx.recv() {
        let serial = message.serial();
        if discard.load(Ordering::Acquire) {
            trace!(serial, "discarding queued message");
            continue;
        }
        match writer.write_message(&message) {
            Ok(()) => {}
            Err(err @ TransportError::Malformed(_)) | Err(err @ TransportError::FdPassingUnsupported) => {
                warn!(serial, error = %err, "message not sent");
                on_failure(serial, err);
            }
            Err(err) => {
                if !discard.load(Ordering::Acquire) {
                    error!(serial, error = %err, "write failed, closing transport");
                }
                discard.store(true, Ordering::Release);
                closer.close();
                on_failure(serial, err);
            }
        }
    }
    debug!("sender stopped");
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::connection::pending::ReplySlot;
    use crate::protocol::ObjectPath;
    use crate::transport::{BusAddress, Listener, Transport, TransportConfig};

    fn ping() -> Message {
        Message::method_call(ObjectPath::root(), "Ping").build().unwrap()
    }

    /// A queue writing to a fresh socket, plus the peer end kept open.
    fn queue(on_failure: FailureHook) -> (SendQueue, Transport) {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::bind(&BusAddress::unix_path(dir.path().join("sock")).listening()).unwrap();
        let address = listener.address().clone();
        let server = thread::spawn(move || Transport::accept(&listener, TransportConfig::default()));
        let client = Transport::connect(&address, TransportConfig::default()).unwrap();
        let server = server.join().unwrap().unwrap();
        let (_reader, writer, closer) = client.split().unwrap();
        (SendQueue::start(writer, closer, on_failure).unwrap(), server)
    }

    #[test]
    fn serials_skip_zero_and_pending_entries() {
        assert_eq!(next_serial(u32::MAX, |_| false), 1);
        assert_eq!(next_serial(u32::MAX - 1, |_| false), u32::MAX);
        assert_eq!(next_serial(u32::MAX, |serial| serial <= 3), 4);
        assert_eq!(next_serial(41, |serial| serial == 42), 43);
    }

    #[test]
    fn wrapped_counter_leaves_live_calls_alone() {
        let (queue, _peer) = queue(Box::new(|_, _| {}));
        let pending = PendingCalls::default();
        pending.register(1, Waiter::Slot(ReplySlot::new())).unwrap();
        queue.state.lock().last_serial = u32::MAX;

        let serial = queue
            .enqueue(ping(), &pending, Some(Waiter::Slot(ReplySlot::new())))
            .unwrap();
        assert_eq!(serial, 2);
        assert_eq!(queue.enqueue(ping(), &pending, None).unwrap(), 3);
        assert_eq!(pending.len(), 2);
        queue.finish(true, Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn failed_enqueue_forgets_the_call() {
        let (queue, _peer) = queue(Box::new(|_, _| panic!("writer gone")));
        let pending = PendingCalls::default();

        // A failed write takes the sender thread down with it.
        queue.closer.close();
        queue.enqueue(ping(), &pending, None).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.thread.lock().as_ref().is_some_and(JoinHandle::is_finished) {
            assert!(Instant::now() < deadline, "sender thread still running");
            thread::sleep(JOIN_POLL);
        }

        let err = queue
            .enqueue(ping(), &pending, Some(Waiter::Slot(ReplySlot::new())))
            .unwrap_err();
        assert!(err.is_disconnected());
        assert_eq!(pending.len(), 0);

        queue.stop_accepting();
        let err = queue
            .enqueue(ping(), &pending, Some(Waiter::Slot(ReplySlot::new())))
            .unwrap_err();
        assert!(err.is_disconnected());
        assert_eq!(pending.len(), 0);
    }
}
