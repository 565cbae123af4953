//! Callback registry with RAII deregistration
//!
//! Used for session-change listeners and in-process feed subscriptions.
//! Callbacks are invoked outside the registry lock, so a callback may
//! register or drop other listeners without deadlocking.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: HashMap<u64, Callback<T>>,
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    // Callbacks run outside the lock, so a poisoned registry is still consistent.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Set of callbacks notified with a shared value
pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: HashMap::new(),
            })),
        }
    }

    /// Register a callback; it stays registered until the handle is dropped
    pub fn register(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::new(callback));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        ListenerHandle {
            id,
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).callbacks.remove(&id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.inner).callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration guard; dropping it unregisters the callback exactly once
pub struct ListenerHandle {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister now instead of at drop
    pub fn unregister(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
