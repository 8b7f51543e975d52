//! Match-rule subscriptions and local signal routing.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::{MatchRule, Message, Result};

/// Signal callback; runs on the signal pool.
pub(crate) type SignalHandlerFn = dyn Fn(&Message) + Send + Sync;

/// Identifies one registered handler, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// A signal with a fixed interface and member, decoded from its message.
///
/// ```
/// use dbuslink::connection::SignalType;
/// use dbuslink::{Message, Result};
///
/// struct Tick(u32);
///
/// impl SignalType for Tick {
///     const INTERFACE: &'static str = "org.example.Clock";
///     const MEMBER: &'static str = "Tick";
///
///     fn from_message(message: &Message) -> Result<Self> {
///         let (n,): (u32,) = message.body_as()?;
///         Ok(Tick(n))
///     }
/// }
/// assert_eq!(Tick::match_rule().to_string(), "type='signal',interface='org.example.Clock',member='Tick'");
/// ```
pub trait SignalType: Sized + Send + 'static {
    /// Emitting interface.
    const INTERFACE: &'static str;
    /// Signal name.
    const MEMBER: &'static str;

    /// Decode the signal body.
    fn from_message(message: &Message) -> Result<Self>;

    /// Rule selecting this signal.
    #[must_use]
    fn match_rule() -> MatchRule {
        MatchRule::signal(Self::INTERFACE, Self::MEMBER)
    }
}

struct Subscription {
    rule: MatchRule,
    handlers: Vec<(HandlerId, Arc<SignalHandlerFn>)>,
}

#[derive(Default)]
struct RouterState {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

/// Rules in registration order, each with its ordered handler list.
#[derive(Default)]
pub(crate) struct SignalRouter {
    state: Mutex<RouterState>,
}

impl fmt::Debug for SignalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SignalRouter")
            .field("rules", &state.subscriptions.len())
            .finish()
    }
}

impl SignalRouter {
    /// Add a handler; the flag tells whether `rule` is new.
    pub(crate) fn add(&self, rule: MatchRule, handler: Arc<SignalHandlerFn>) -> (HandlerId, bool) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = HandlerId(state.next_id);
        if let Some(sub) = state.subscriptions.iter_mut().find(|sub| sub.rule == rule) {
            sub.handlers.push((id, handler));
            return (id, false);
        }
        state.subscriptions.push(Subscription {
            rule,
            handlers: vec![(id, handler)],
        });
        (id, true)
    }

    /// Remove a handler. Returns its rule and whether the rule is now gone.
    pub(crate) fn remove(&self, id: HandlerId) -> Option<(MatchRule, bool)> {
        let mut state = self.state.lock();
        let index = state
            .subscriptions
            .iter()
            .position(|sub| sub.handlers.iter().any(|(hid, _)| *hid == id))?;
        let sub = &mut state.subscriptions[index];
        sub.handlers.retain(|(hid, _)| *hid != id);
        if sub.handlers.is_empty() {
            let sub = state.subscriptions.remove(index);
            Some((sub.rule, true))
        } else {
            Some((sub.rule.clone(), false))
        }
    }

    /// Every handler whose rule matches, in registration order.
    pub(crate) fn matching(&self, message: &Message) -> Vec<Arc<SignalHandlerFn>> {
        let state = self.state.lock();
        state
            .subscriptions
            .iter()
            .filter(|sub| sub.rule.matches(message))
            .flat_map(|sub| sub.handlers.iter().map(|(_, handler)| Arc::clone(handler)))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.state.lock().subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::ObjectPath;

    fn signal(member: &str) -> Message {
        Message::signal(ObjectPath::root(), "org.foo", member).build().unwrap()
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<SignalHandlerFn>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let handler: Arc<SignalHandlerFn> = Arc::new(move |_msg: &Message| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (hits, handler)
    }

    #[test]
    fn first_and_last_handler_are_reported() {
        let router = SignalRouter::default();
        let rule = MatchRule::signal("org.foo", "methodnoarg");
        let (_, h1) = counter();
        let (_, h2) = counter();
        let (a, first) = router.add(rule.clone(), h1);
        assert!(first);
        let (b, first) = router.add(rule.clone(), h2);
        assert!(!first);
        assert_eq!(router.remove(a), Some((rule.clone(), false)));
        assert_eq!(router.remove(b), Some((rule, true)));
        assert_eq!(router.remove(b), None);
    }

    #[test]
    fn only_matching_rules_fan_out() {
        let router = SignalRouter::default();
        let (hits, handler) = counter();
        router.add(MatchRule::signal("org.foo", "methodnoarg"), handler);
        for handler in router.matching(&signal("other")) {
            handler(&signal("other"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let msg = signal("methodnoarg");
        let handlers = router.matching(&msg);
        assert_eq!(handlers.len(), 1);
        for handler in handlers {
            handler(&msg);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_keep_registration_order() {
        let router = SignalRouter::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            router.add(
                MatchRule::new().with_interface("org.foo"),
                Arc::new(move |_msg: &Message| order.lock().push(i)),
            );
        }
        let msg = signal("x");
        for handler in router.matching(&msg) {
            handler(&msg);
        }
        assert_eq!(*order.lock(), [0, 1, 2]);
    }
}
