use std::sync::Arc;

use super::mutable::Cell;
use crate::broadcast::{IntoListener, ListenerGuard};

/// Read-only signal
pub struct Read<T> {
    pub(crate) cell: Arc<Cell<T>>,
}

impl<T> Read<T> {
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R { self.cell.with(f) }

    /// Called with each new value until the guard is dropped. The current value is not replayed.
    pub fn subscribe<L: IntoListener<T>>(&self, listener: L) -> ListenerGuard<T> { self.cell.changed.listen(listener) }
}

impl<T: Clone> Read<T> {
    pub fn get(&self) -> T { self.cell.with(T::clone) }
}

#[cfg(feature = "tokio")]
impl<T> Read<T>
where T: Clone + Send + Sync + 'static
{
    /// Wait until the predicate accepts the current value, checking now and after every change.
    ///
    /// The predicate may return `bool` (resolve with `()`) or `Option<R>` (resolve with `R`).
    pub async fn wait_for<F, R>(&self, predicate: F) -> R::Output
    where
        F: Fn(&T) -> R,
        R: crate::WaitResult,
    {
        // subscribe before checking so a change in between is not lost
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<T>();
        let _guard = self.subscribe(tx);

        if let Some(output) = self.with(|value| predicate(value).result()) {
            return output;
        }
        while let Some(value) = rx.recv().await {
            if let Some(output) = predicate(&value).result() {
                return output;
            }
        }
        // the listener holds the sender for as long as we hold the guard
        std::future::pending().await
    }
}

impl<T> Clone for Read<T> {
    fn clone(&self) -> Self { Self { cell: self.cell.clone() } }
}

impl<T: std::fmt::Display> std::fmt::Display for Read<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|v| write!(f, "{}", v)) }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Read<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|v| f.debug_tuple("Read").field(v).finish()) }
}
