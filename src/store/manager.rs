use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{FailurePolicy, StateConfig};
use crate::error::StateError;

/// Callback invoked with the previous and the new value of a slot.
///
/// Subscribers are compared by `Arc` identity, so keep the `Arc` around if
/// you want to unregister it with [`StateManager::end_watch`].
pub type Subscriber = Arc<dyn Fn(Option<&Value>, &Value) + Send + Sync>;

struct ManagerInner {
    slots: RwLock<HashMap<String, Value>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    policy: FailurePolicy,
}

impl ManagerInner {
    fn remove(&self, key: &str, subscriber: &Subscriber) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|existing| !same_subscriber(existing, subscriber));
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(key);
        }
        removed
    }
}

fn same_subscriber(a: &Subscriber, b: &Subscriber) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Keyed slot storage with per-key subscribers.
///
/// Cloning a manager yields another handle to the same slots. Writes are
/// last-write-wins and notify the key's subscribers synchronously, in
/// registration order, before returning.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use slotstate::StateManager;
///
/// let manager = StateManager::new();
/// manager.write("count", json!(1)).unwrap();
/// assert_eq!(manager.get("count"), Some(json!(1)));
/// ```
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<ManagerInner>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// Create an empty manager with the default failure policy.
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::default())
    }

    /// Create an empty manager using the failure policy from `config`.
    pub fn from_config(config: &StateConfig) -> Self {
        Self::with_policy(config.failure_policy)
    }

    /// Create a manager that treats panicking subscribers according to `policy`.
    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                slots: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                policy,
            }),
        }
    }

    /// How panicking subscribers are handled by [`write`](Self::write).
    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    /// Borrow the whole key/value mapping.
    ///
    /// The closure sees the live map, not a snapshot. Writing to this
    /// manager from inside `f` deadlocks.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&HashMap<String, Value>) -> R,
    {
        let slots = self.inner.slots.read();
        f(&slots)
    }

    /// Clone the value of a single slot.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.slots.read().get(key).cloned()
    }

    /// Keys of every slot written so far.
    pub fn keys(&self) -> Vec<String> {
        self.inner.slots.read().keys().cloned().collect()
    }

    /// Store `value` under `key` and notify the key's subscribers.
    ///
    /// The prior value is replaced whatever its shape. No lock is held
    /// while subscribers run, so they may read or write this manager.
    pub fn write(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        let key = key.into();
        let previous = self.inner.slots.write().insert(key.clone(), value.clone());
        let subscribers = self
            .inner
            .subscribers
            .read()
            .get(&key)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(key = %key, subscribers = subscribers.len(), "slot written");

        for subscriber in subscribers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber(previous.as_ref(), &value)));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                if self.inner.policy.propagates() {
                    return Err(StateError::Subscriber { key, message });
                }
                tracing::error!(key = %key, error = %message, "subscriber panicked, continuing");
            }
        }
        Ok(())
    }

    /// Register `subscriber` for writes to `key`.
    ///
    /// Registering the same `Arc` twice for one key is a no-op.
    pub fn watch_for_updates(&self, key: impl Into<String>, subscriber: Subscriber) {
        let key = key.into();
        let mut subscribers = self.inner.subscribers.write();
        let list = subscribers.entry(key.clone()).or_default();
        if list.iter().any(|existing| same_subscriber(existing, &subscriber)) {
            tracing::debug!(key = %key, "subscriber already registered");
            return;
        }
        list.push(subscriber);
    }

    /// Remove `subscriber` from `key`. Does nothing if it isn't registered.
    pub fn end_watch(&self, key: &str, subscriber: &Subscriber) {
        if !self.inner.remove(key, subscriber) {
            tracing::debug!(key = %key, "end_watch on unknown subscriber");
        }
    }

    /// Register a callback and get a guard that unregisters it on drop.
    pub fn watch<F>(&self, key: impl Into<String>, callback: F) -> WatchGuard
    where
        F: Fn(Option<&Value>, &Value) + Send + Sync + 'static,
    {
        let key = key.into();
        let subscriber: Subscriber = Arc::new(callback);
        self.watch_for_updates(key.clone(), Arc::clone(&subscriber));
        WatchGuard {
            key,
            subscriber,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Number of subscribers currently registered for `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscribers.read().get(key).map_or(0, Vec::len)
    }
}

/// RAII guard for a slot subscription.
pub struct WatchGuard {
    key: String,
    subscriber: Subscriber,
    manager: Weak<ManagerInner>,
}

impl WatchGuard {
    /// The key this guard is subscribed to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.key, &self.subscriber);
        }
    }
}
