use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// A listener receives a borrow of each value sent on the broadcast
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Trait for types that can be converted into broadcast listeners.
pub trait IntoListener<T> {
    fn into_listener(self) -> Listener<T>;
}

/// A fan-out of values to any number of listeners.
///
/// Listeners are called synchronously on the sending thread, after the listener table lock is released,
/// so a listener may subscribe, unsubscribe or send again without deadlocking.
pub struct Broadcast<T>(Arc<Inner<T>>);

struct Inner<T> {
    listeners: RwLock<BTreeMap<usize, Listener<T>>>,
    next_id: AtomicUsize,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcast").field("listeners", &self.listener_count()).finish()
    }
}

impl<T> Broadcast<T> {
    pub fn new() -> Self { Self(Arc::new(Inner { listeners: RwLock::new(BTreeMap::new()), next_id: AtomicUsize::new(0) })) }

    /// Send a value to every listener registered at the time of the call
    pub fn send(&self, value: &T) {
        // Clone the listeners to avoid holding the lock during callback execution
        let listeners: Vec<Listener<T>> = match self.0.listeners.read() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for listener in listeners {
            listener(value);
        }
    }

    /// Register a listener. It stays registered until the returned guard is dropped.
    pub fn listen<L: IntoListener<T>>(&self, listener: L) -> ListenerGuard<T> {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_listeners(|listeners| {
            listeners.insert(id, listener.into_listener());
        });
        ListenerGuard { inner: Arc::downgrade(&self.0), id }
    }

    pub fn listener_count(&self) -> usize {
        match self.0.listeners.read() {
            Ok(listeners) => listeners.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn write_listeners(&self, f: impl FnOnce(&mut BTreeMap<usize, Listener<T>>)) {
        match self.0.listeners.write() {
            Ok(mut listeners) => f(&mut listeners),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Unsubscribes its listener when dropped. Does not keep the broadcast alive.
#[must_use = "the listener is removed as soon as the guard is dropped"]
pub struct ListenerGuard<T> {
    inner: Weak<Inner<T>>,
    id: usize,
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            match inner.listeners.write() {
                Ok(mut listeners) => {
                    listeners.remove(&self.id);
                }
                Err(poisoned) => {
                    poisoned.into_inner().remove(&self.id);
                }
            }
        }
    }
}

impl<F, T> IntoListener<T> for F
where F: Fn(&T) + Send + Sync + 'static
{
    fn into_listener(self) -> Listener<T> { Arc::new(self) }
}

#[cfg(feature = "tokio")]
impl<T> IntoListener<T> for tokio::sync::mpsc::UnboundedSender<T>
where T: Clone + Send + 'static
{
    fn into_listener(self) -> Listener<T> {
        Arc::new(move |value: &T| {
            let _ = self.send(value.clone()); // receiver gone is not our problem
        })
    }
}

impl<T> IntoListener<T> for std::sync::mpsc::Sender<T>
where T: Clone + Send + 'static
{
    fn into_listener(self) -> Listener<T> {
        let sender = std::sync::Mutex::new(self);
        Arc::new(move |value: &T| {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(value.clone());
            }
        })
    }
}
