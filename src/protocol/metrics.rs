//! Process-wide engine counters.
//!
//! Plain relaxed atomics: cheap enough for the hot path, read through
//! [`crate::metrics`] as a [`MetricsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Duration;

use super::MessageType;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageDirection {
    Sent,
    Received,
}

const KINDS: usize = 4;

fn kind_slot(kind: MessageType) -> usize {
    match kind {
        MessageType::MethodCall => 0,
        MessageType::MethodReturn => 1,
        MessageType::Error => 2,
        MessageType::Signal => 3,
    }
}

struct Counters {
    sent: [AtomicU64; KINDS],
    received: [AtomicU64; KINDS],
    error_replies: AtomicU64,
    handler_failures: AtomicU64,
    spurious_replies: AtomicU64,
    open_connections: AtomicU64,
    write_nanos: AtomicU64,
    slowest_write_nanos: AtomicU64,
}

static COUNTERS: Counters = Counters {
    sent: [const { AtomicU64::new(0) }; KINDS],
    received: [const { AtomicU64::new(0) }; KINDS],
    error_replies: AtomicU64::new(0),
    handler_failures: AtomicU64::new(0),
    spurious_replies: AtomicU64::new(0),
    open_connections: AtomicU64::new(0),
    write_nanos: AtomicU64::new(0),
    slowest_write_nanos: AtomicU64::new(0),
};

/// Recording side of the counters.
pub(crate) struct Metrics;

impl Metrics {
    #[inline]
    pub(crate) fn record_message(direction: MessageDirection, kind: MessageType) {
        let row = match direction {
            MessageDirection::Sent => &COUNTERS.sent,
            MessageDirection::Received => &COUNTERS.received,
        };
        row[kind_slot(kind)].fetch_add(1, Relaxed);
    }

    /// An exported method answered with an Error reply.
    #[inline]
    pub(crate) fn record_error() {
        COUNTERS.error_replies.fetch_add(1, Relaxed);
    }

    #[inline]
    pub(crate) fn record_handler_failure() {
        COUNTERS.handler_failures.fetch_add(1, Relaxed);
    }

    #[inline]
    pub(crate) fn record_spurious_reply() {
        COUNTERS.spurious_replies.fetch_add(1, Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        COUNTERS.open_connections.fetch_add(1, Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        // Saturate: a close without a matching open must not wrap.
        let _ = COUNTERS
            .open_connections
            .fetch_update(Relaxed, Relaxed, |open| Some(open.saturating_sub(1)));
    }

    #[inline]
    pub(crate) fn record_send_latency(elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        COUNTERS.write_nanos.fetch_add(nanos, Relaxed);
        COUNTERS.slowest_write_nanos.fetch_max(nanos, Relaxed);
    }

    pub(crate) fn totals() -> MetricsSnapshot {
        let load = |row: &[AtomicU64; KINDS]| -> [u64; KINDS] { std::array::from_fn(|i| row[i].load(Relaxed)) };
        let sent = load(&COUNTERS.sent);
        let received = load(&COUNTERS.received);
        let per_kind = |slot: usize| sent[slot] + received[slot];
        let sent_messages = sent.iter().sum();
        let received_messages = received.iter().sum();
        MetricsSnapshot {
            total_messages: sent_messages + received_messages,
            sent_messages,
            received_messages,
            method_calls: per_kind(0),
            method_returns: per_kind(1),
            error_messages: per_kind(2),
            signals: per_kind(3),
            error_replies: COUNTERS.error_replies.load(Relaxed),
            handler_failures: COUNTERS.handler_failures.load(Relaxed),
            spurious_replies: COUNTERS.spurious_replies.load(Relaxed),
            open_connections: COUNTERS.open_connections.load(Relaxed),
            send_latency_total_ns: COUNTERS.write_nanos.load(Relaxed),
            send_latency_max_ns: COUNTERS.slowest_write_nanos.load(Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Messages in both directions.
    pub total_messages: u64,
    /// Messages written to a transport.
    pub sent_messages: u64,
    /// Messages decoded from a transport.
    pub received_messages: u64,
    /// Method calls, both directions.
    pub method_calls: u64,
    /// Method returns, both directions.
    pub method_returns: u64,
    /// Error messages, both directions.
    pub error_messages: u64,
    /// Signals, both directions.
    pub signals: u64,
    /// Error replies produced by local method handlers.
    pub error_replies: u64,
    /// Handlers and callbacks that panicked.
    pub handler_failures: u64,
    /// Replies that matched no pending call.
    pub spurious_replies: u64,
    /// Transports currently open.
    pub open_connections: u64,
    /// Time spent in writes.
    pub send_latency_total_ns: u64,
    /// Slowest single write.
    pub send_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Mean write time in microseconds; `None` before anything was sent.
    #[must_use]
    pub fn avg_send_latency_us(&self) -> Option<u64> {
        (self.sent_messages > 0).then(|| self.send_latency_total_ns / self.sent_messages / 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_counted_per_direction() {
        let before = Metrics::totals();
        Metrics::record_message(MessageDirection::Sent, MessageType::Signal);
        Metrics::record_message(MessageDirection::Received, MessageType::MethodCall);
        let after = Metrics::totals();

        assert!(after.signals > before.signals);
        assert!(after.method_calls > before.method_calls);
        assert!(after.sent_messages > before.sent_messages);
        assert!(after.received_messages > before.received_messages);
        assert_eq!(after.total_messages, after.sent_messages + after.received_messages);
    }

    #[test]
    fn slowest_write_only_grows() {
        Metrics::record_send_latency(Duration::from_micros(5));
        Metrics::record_send_latency(Duration::from_micros(1));
        assert!(Metrics::totals().send_latency_max_ns >= 5_000);
    }

    #[test]
    fn average_needs_a_sent_message() {
        let empty = MetricsSnapshot::default();
        assert_eq!(empty.avg_send_latency_us(), None);
        let snapshot = MetricsSnapshot {
            sent_messages: 4,
            send_latency_total_ns: 8_000,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snapshot.avg_send_latency_us(), Some(2));
    }
}
