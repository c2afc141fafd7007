//! Per-entity notification lists.
//!
//! Every target and behavior owns a handful of [`Notifier`]s. Observers
//! subscribe with a callback and get back a [`SubscriptionId`] they use to
//! unsubscribe later. There is no global registry: whoever subscribes is
//! responsible for unsubscribing.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Unique identifier for a subscription.
///
/// IDs are unique across all notifiers, so a stale ID can never remove
/// somebody else's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered list of callbacks for one kind of event.
pub struct Notifier<E> {
    subscribers: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Notifier<E> {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback. Callbacks fire in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if the ID was not subscribed here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Invoke every callback with `event`.
    ///
    /// The subscriber list is copied before the first call, so callbacks may
    /// subscribe or unsubscribe freely. A panicking callback is logged and
    /// the remaining callbacks still run.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                tracing::error!(
                    message = %panic_message(payload.as_ref()),
                    "notification subscriber panicked"
                );
            }
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Best-effort text for a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn notify_calls_subscribers_in_order() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            notifier.subscribe(move |value: &u32| seen.lock().push((tag, *value)));
        }

        notifier.notify(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_removes_only_that_callback() {
        let notifier = Notifier::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let first = notifier.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        notifier.subscribe(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        assert!(notifier.unsubscribe(first));
        assert!(!notifier.unsubscribe(first));
        assert_eq!(notifier.len(), 1);

        notifier.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let notifier = Notifier::<()>::new();
        let reached = Arc::new(AtomicUsize::new(0));

        notifier.subscribe(|_| panic!("subscriber failure"));
        let r = reached.clone();
        notifier.subscribe(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(&());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_unsubscribe_during_notify() {
        let notifier = Arc::new(Notifier::<()>::new());
        let slot = Arc::new(Mutex::new(None));

        let n = Arc::downgrade(&notifier);
        let s = slot.clone();
        let id = notifier.subscribe(move |_| {
            if let (Some(notifier), Some(id)) = (n.upgrade(), *s.lock()) {
                notifier.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        notifier.notify(&());
        assert!(notifier.is_empty());
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
