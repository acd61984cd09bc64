//! Observer registration for patch and quality notifications.
//!
//! Listeners are registered with [`Listeners::subscribe`], which returns a
//! [`Subscription`] that unregisters the listener when dropped. Notification
//! iterates over a snapshot of the registered listeners taken under the lock,
//! so listeners may subscribe or unsubscribe from inside a callback.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerTable<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

/// A set of listeners for events of type `E`.
pub struct Listeners<E> {
    table: Arc<Mutex<ListenerTable<E>>>,
}

impl<E: 'static> Listeners<E> {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or [`Subscription::unsubscribe`]d.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerTable<E>>> = Arc::downgrade(&self.table);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    table.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .table
            .lock()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registered listener.
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.table.lock().entries.len())
            .finish()
    }
}

/// Handle returned by [`Listeners::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Unregister the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener registered for the lifetime of the listener set.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_reaches_all_listeners() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = listeners.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = listeners.subscribe(move |v| {
            t2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.notify(&5);
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.subscribe(|_| {});
        assert_eq!(listeners.len(), 1);
        drop(sub);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let listeners: Listeners<()> = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(&());
        sub.unsubscribe();
        listeners.notify(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_keeps_listener() {
        let listeners: Listeners<()> = Listeners::new();
        listeners.subscribe(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_subscribe_inside_callback_does_not_deadlock() {
        let listeners: Listeners<()> = Listeners::new();
        let inner = listeners.clone();
        let _sub = listeners.subscribe(move |_| {
            inner.subscribe(|_| {}).detach();
        });

        listeners.notify(&());
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_subscription_outliving_listeners_is_harmless() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        drop(sub);
    }
}
