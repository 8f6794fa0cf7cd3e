//! Publish/subscribe mediator
//!
//! A small synchronous fan-out bus keyed by event name. One instance is
//! owned by the playback session for cross-cutting signals such as
//! [`events::CHANGE_STREAM`]; every ad block owns another for its local
//! lifecycle events.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{trace, warn};

/// Well-known event names
pub mod events {
    /// Primary playback hit a fatal error; try the next stream
    pub const CHANGE_STREAM: &str = "change_stream";
    /// Primary playback reported its first time update, or an ad started
    pub const STARTED: &str = "started";
}

type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Registry<P> {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, Callback<P>)>>,
}

/// Event bus. Clones share the same subscriber table.
pub struct Mediator<P = ()> {
    registry: Arc<Mutex<Registry<P>>>,
}

impl<P> Clone for Mediator<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<P> Default for Mediator<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for Mediator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("Mediator")
            .field("events", &registry.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<P> Mediator<P> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Register a callback for `event`. Callbacks run in registration order.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription<P>
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let event = event.into();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .subscribers
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
        }
    }

    /// Invoke every callback currently registered for `event`.
    ///
    /// Callbacks are snapshotted first, so a callback may subscribe or
    /// unsubscribe without deadlocking. A callback unsubscribed by an earlier
    /// one during the same emit is skipped; one subscribed during it waits
    /// for the next emit. A panicking callback is logged and the remaining
    /// callbacks still run. Returns the number of callbacks that completed.
    pub fn emit(&self, event: &str, payload: &P) -> usize {
        let callbacks: Vec<(u64, Callback<P>)> = {
            let registry = lock(&self.registry);
            match registry.subscribers.get(event) {
                Some(subs) => subs.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
                None => return 0,
            }
        };

        trace!(event, subscribers = callbacks.len(), "Emitting event");

        let mut completed = 0;
        for (id, callback) in callbacks {
            if !self.is_registered(event, id) {
                trace!(event, id, "Subscriber removed during emit");
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => completed += 1,
                Err(_) => warn!(event, "Event subscriber panicked"),
            }
        }
        completed
    }

    fn is_registered(&self, event: &str, id: u64) -> bool {
        lock(&self.registry)
            .subscribers
            .get(event)
            .is_some_and(|subs| subs.iter().any(|(sub_id, _)| *sub_id == id))
    }

    /// Number of callbacks registered for `event`
    pub fn subscriber_count(&self, event: &str) -> usize {
        lock(&self.registry)
            .subscribers
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Drop every subscription
    pub fn clear(&self) {
        lock(&self.registry).subscribers.clear();
    }
}

/// Handle returned by [`Mediator::on`]. Dropping it keeps the callback
/// registered; call [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription<P> {
    registry: Weak<Mutex<Registry<P>>>,
    event: String,
    id: u64,
}

impl<P> Subscription<P> {
    /// Remove exactly the callback this handle was issued for. Returns false
    /// if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let Some(subs) = registry.subscribers.get_mut(&self.event) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != self.id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            registry.subscribers.remove(&self.event);
        }
        removed
    }

    pub fn event(&self) -> &str {
        &self.event
    }
}

impl<P> std::fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

fn lock<P>(registry: &Mutex<Registry<P>>) -> MutexGuard<'_, Registry<P>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_in_registration_order() {
        let mediator: Mediator<u32> = Mediator::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        mediator.on("tick", move |v| l1.lock().unwrap().push(("first", *v)));
        let l2 = Arc::clone(&log);
        mediator.on("tick", move |v| l2.lock().unwrap().push(("second", *v)));

        assert_eq!(mediator.emit("tick", &7), 2);
        assert_eq!(*log.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unsubscribe_removes_only_its_callback() {
        let mediator: Mediator = Mediator::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let first = mediator.on(events::STARTED, move |_| l1.lock().unwrap().push(1));
        let l2 = Arc::clone(&log);
        let _second = mediator.on(events::STARTED, move |_| l2.lock().unwrap().push(2));

        assert!(first.unsubscribe());
        mediator.emit(events::STARTED, &());
        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert_eq!(mediator.subscriber_count(events::STARTED), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let mediator: Mediator = Mediator::new();
        let hits = Arc::new(Mutex::new(0));

        mediator.on("boom", |_| panic!("subscriber failure"));
        let h = Arc::clone(&hits);
        mediator.on("boom", move |_| *h.lock().unwrap() += 1);

        assert_eq!(mediator.emit("boom", &()), 1);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_emit_unknown_event() {
        let mediator: Mediator = Mediator::new();
        assert_eq!(mediator.emit("nobody", &()), 0);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let mediator: Mediator = Mediator::new();
        let inner = mediator.clone();
        mediator.on("outer", move |_| {
            inner.on("late", |_| {});
        });
        mediator.emit("outer", &());
        assert_eq!(mediator.subscriber_count("late"), 1);
    }

    #[test]
    fn test_callback_unsubscribed_mid_emit_is_skipped() {
        let mediator: Mediator = Mediator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let second_sub: Arc<Mutex<Option<Subscription<()>>>> = Arc::new(Mutex::new(None));

        let l1 = Arc::clone(&log);
        let slot = Arc::clone(&second_sub);
        mediator.on("stop", move |_| {
            l1.lock().unwrap().push("first");
            if let Some(sub) = slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        let l2 = Arc::clone(&log);
        let sub = mediator.on("stop", move |_| l2.lock().unwrap().push("second"));
        *second_sub.lock().unwrap() = Some(sub);

        assert_eq!(mediator.emit("stop", &()), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        assert_eq!(mediator.subscriber_count("stop"), 1);
    }

    #[test]
    fn test_unsubscribe_after_mediator_dropped() {
        let mediator: Mediator = Mediator::new();
        let sub = mediator.on("x", |_| {});
        drop(mediator);
        assert!(!sub.unsubscribe());
    }
}
