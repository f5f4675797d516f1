//! # Observable Bridge
//!
//! A synchronous, pull-based publish/subscribe registry. `notify()` carries
//! no payload: every subscriber re-reads the current snapshot itself, so a
//! callback can never act on a stale copy.
//!
//! Callbacks are invoked after the registry lock is released. A callback may
//! therefore subscribe, unsubscribe, or read any state without deadlocking.
//! No ordering among callbacks is guaranteed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub mod thread;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Registry of change listeners.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, Callback>>,
}

impl Subscribers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn callbacks(&self) -> MutexGuard<'_, HashMap<u64, Callback>> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `callback`. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks().insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Invokes every currently registered callback once.
    pub fn notify(&self) {
        let callbacks: Vec<Callback> = self.callbacks().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.callbacks().remove(&id);
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// Unsubscribe token returned by [`Subscribers::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Subscribers>,
}

impl Subscription {
    /// Removes the callback from the registry.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_every_subscriber() {
        let subscribers = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = Arc::clone(&hits);
            subscribers.subscribe(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let hits = Arc::clone(&hits);
            subscribers.subscribe(move || {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        subscribers.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        a.unsubscribe();
        subscribers.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 21);

        drop(b);
        subscribers.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 21);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_callback_can_touch_registry() {
        let subscribers = Subscribers::new();
        let nested: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let _outer = {
            let registry = Arc::clone(&subscribers);
            let nested = Arc::clone(&nested);
            subscribers.subscribe(move || {
                let sub = registry.subscribe(|| {});
                nested.lock().unwrap().push(sub);
                assert!(registry.len() >= 2);
            })
        };

        subscribers.notify();
        assert_eq!(subscribers.len(), 2);
        nested.lock().unwrap().clear();
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let subscribers = Subscribers::new();
        let sub = subscribers.subscribe(|| {});
        drop(subscribers);
        drop(sub);
    }
}
