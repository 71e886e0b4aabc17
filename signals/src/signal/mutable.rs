use std::sync::{Arc, RwLock};

use crate::broadcast::Broadcast;
use crate::Read;

pub(crate) struct Cell<T> {
    pub(crate) value: RwLock<T>,
    pub(crate) changed: Broadcast<T>,
}

impl<T> Cell<T> {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.value.read() {
            Ok(value) => f(&value),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

/// Mutable (stateful) signal. Hand out [`Read`] handles to observers; only the owner of the `Mut` can set it.
pub struct Mut<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Mut<T> {
    pub fn new(value: T) -> Self { Self { cell: Arc::new(Cell { value: RwLock::new(value), changed: Broadcast::new() }) } }

    /// Calls a closure with a borrow of the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R { self.cell.with(f) }

    /// Readonly signal downstream of this mutable signal
    pub fn read(&self) -> Read<T> { Read { cell: self.cell.clone() } }
}

impl<T: Clone> Mut<T> {
    pub fn get(&self) -> T { self.cell.with(T::clone) }

    /// Replace the value and notify subscribers. Subscribers run after the write lock is released.
    pub fn set(&self, value: T) {
        let snapshot = value.clone();
        self.replace(value);
        self.cell.changed.send(&snapshot);
    }

    /// Modify the value in place and notify subscribers with the result
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let snapshot = {
            let mut guard = match self.cell.value.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut guard);
            guard.clone()
        };
        self.cell.changed.send(&snapshot);
    }

    fn replace(&self, value: T) {
        match self.cell.value.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl<T: Clone + PartialEq> Mut<T> {
    /// Like [`Mut::set`] but silent when the value is unchanged. Returns whether subscribers were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        if self.cell.with(|current| *current == value) {
            return false;
        }
        self.set(value);
        true
    }
}

impl<T: Default> Default for Mut<T> {
    fn default() -> Self { Self::new(T::default()) }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mut<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|v| f.debug_tuple("Mut").field(v).finish()) }
}
