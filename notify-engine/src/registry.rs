//! Thread-safe observer registry.
//!
//! Holders are compared by `Arc` identity. Iteration works on a snapshot, so
//! callbacks may add or remove entries without deadlocking.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

pub struct Registry<T: ?Sized> {
    entries: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, entry: Arc<T>) {
        self.entries.write().push(entry);
    }

    /// Remove `entry`. Returns whether it was registered.
    pub fn remove(&self, entry: &Arc<T>) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !std::ptr::addr_eq(Arc::as_ptr(e), Arc::as_ptr(entry)));
        entries.len() != before
    }

    /// Remove every entry matching `predicate`, returning how many went.
    pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !predicate(e.as_ref()));
        before - entries.len()
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().clone()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.entries.read().iter().find(|e| predicate(e.as_ref())).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .finish()
    }
}
