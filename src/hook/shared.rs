use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::FailurePolicy;
use crate::debounce::Debounced;
use crate::error::StateError;
use crate::runtime::StateProvider;
use crate::storage::PersistentStore;
use crate::store::WatchGuard;

/// Per-consumer settings for [`use_shared_state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UseOptions {
    /// Mirror writes to the provider's persistent store and fall back to it
    /// when the slot is empty.
    pub persist: bool,
    /// Debounce delay; `None` uses the provider's configured default.
    pub debounce: Option<Duration>,
}

impl UseOptions {
    /// No persistence, provider default delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn persistence on.
    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    /// Override the provider's debounce delay.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }
}

/// A new value, or a function computing one from the current value.
pub enum SetValue<T> {
    Value(T),
    Transform(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> SetValue<T> {
    pub fn transform<F>(f: F) -> Self
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        SetValue::Transform(Box::new(f))
    }
}

impl<T> From<T> for SetValue<T> {
    fn from(value: T) -> Self {
        SetValue::Value(value)
    }
}

/// A consumer's handle on one shared slot.
///
/// Creating the handle subscribes to the key once; dropping it unsubscribes
/// and throws away any debounced update still in flight. The initial value
/// is captured at creation and is what [`clear`](Self::clear) restores.
pub struct SharedState<T> {
    key: String,
    initial: T,
    persist: bool,
    provider: StateProvider,
    debounced: Arc<Debounced<T>>,
    renders: Arc<watch::Sender<u64>>,
    _watch: WatchGuard,
}

impl<T> SharedState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        provider: StateProvider,
        key: String,
        initial: T,
        options: UseOptions,
    ) -> Result<Self, StateError> {
        let delay = options
            .debounce
            .unwrap_or_else(|| provider.config().debounce());
        let current = resolve(&provider, &key, options.persist, &initial)?;
        let debounced = Arc::new(Debounced::new(current, delay)?);
        let (renders, _) = watch::channel(0u64);
        let renders = Arc::new(renders);

        let guard = {
            let key = key.clone();
            let debounced = Arc::downgrade(&debounced);
            let renders = Arc::clone(&renders);
            let storage = options.persist.then(|| provider.storage_handle());
            let policy = provider.config().failure_policy;
            let fallback_initial = initial.clone();
            provider.manager().watch(key.clone(), move |_, new| {
                let next = match T::deserialize(new) {
                    Ok(value) => Some(value),
                    Err(err) if policy.propagates() => {
                        tracing::error!(key = %key, error = %err, "written value does not fit consumer type");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "written value does not fit consumer type, falling back");
                        let stored = storage
                            .as_deref()
                            .and_then(|storage| stored(storage, policy, &key).ok().flatten());
                        Some(stored.unwrap_or_else(|| fallback_initial.clone()))
                    }
                };
                if let (Some(value), Some(debounced)) = (next, debounced.upgrade()) {
                    debounced.update(value);
                }
                renders.send_modify(|count| *count += 1);
            })
        };

        tracing::debug!(key = %key, persist = options.persist, ?delay, "shared state mounted");
        Ok(Self {
            key,
            initial,
            persist: options.persist,
            provider,
            debounced,
            renders,
            _watch: guard,
        })
    }

    /// The slot this handle reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value captured when this handle was created.
    pub fn initial_value(&self) -> &T {
        &self.initial
    }

    /// The current value: the slot, else the persisted snapshot (when
    /// persistence is on), else the initial value.
    pub fn value(&self) -> Result<T, StateError> {
        resolve(&self.provider, &self.key, self.persist, &self.initial)
    }

    /// The value as it stood once writes stopped for the debounce delay.
    ///
    /// A write that doesn't fit `T` moves this towards the fallback `value()`
    /// resolves to (stored snapshot, else initial). With
    /// [`FailurePolicy::Propagate`] such a write leaves it untouched.
    pub fn debounced_value(&self) -> T {
        self.debounced.get()
    }

    /// Receiver for debounced value changes.
    pub fn debounced_changes(&self) -> watch::Receiver<T> {
        self.debounced.changed()
    }

    /// The persisted snapshot for this key. Always `None` without persistence.
    pub fn stored_value(&self) -> Result<Option<T>, StateError> {
        if !self.persist {
            return Ok(None);
        }
        stored(
            self.provider.storage(),
            self.provider.config().failure_policy,
            &self.key,
        )
    }

    /// Write `value` to the slot, and to storage when persistence is on.
    ///
    /// Storage is written even if a subscriber failure makes the slot write
    /// report an error.
    pub fn set(&self, value: T) -> Result<(), StateError> {
        let encoded = serde_json::to_value(&value).map_err(|source| StateError::Encode {
            key: self.key.clone(),
            source,
        })?;
        let written = self.provider.manager().write(self.key.clone(), encoded.clone());
        if self.persist {
            self.provider.storage().set_item(&self.key, &encoded)?;
        }
        written
    }

    /// Replace the value with `f` applied to the current value.
    pub fn update<F>(&self, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.value()?;
        self.set(f(&current))
    }

    /// [`set`](Self::set) or [`update`](Self::update), depending on `value`.
    pub fn set_value(&self, value: impl Into<SetValue<T>>) -> Result<(), StateError> {
        match value.into() {
            SetValue::Value(value) => self.set(value),
            SetValue::Transform(f) => self.update(f),
        }
    }

    /// Write the captured initial value back.
    pub fn clear(&self) -> Result<(), StateError> {
        self.set(self.initial.clone())
    }

    /// How many writes to this key the handle has been told about.
    pub fn renders(&self) -> u64 {
        *self.renders.borrow()
    }

    /// Receiver that changes every time the key is written, for driving
    /// re-renders.
    pub fn on_render(&self) -> watch::Receiver<u64> {
        self.renders.subscribe()
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("key", &self.key)
            .field("initial", &self.initial)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, StateError> {
    T::deserialize(value).map_err(|source| StateError::TypeMismatch {
        key: key.to_string(),
        source,
    })
}

fn stored<T: DeserializeOwned>(
    storage: &PersistentStore,
    policy: FailurePolicy,
    key: &str,
) -> Result<Option<T>, StateError> {
    let Some(value) = storage.get_item(key)? else {
        return Ok(None);
    };
    match decode(key, &value) {
        Ok(value) => Ok(Some(value)),
        Err(err) if policy.propagates() => Err(err),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "ignoring stored value");
            Ok(None)
        }
    }
}

fn resolve<T: DeserializeOwned + Clone>(
    provider: &StateProvider,
    key: &str,
    persist: bool,
    initial: &T,
) -> Result<T, StateError> {
    if let Some(value) = provider.manager().get(key) {
        match decode(key, &value) {
            Ok(value) => return Ok(value),
            Err(err) if provider.config().failure_policy.propagates() => return Err(err),
            Err(err) => tracing::warn!(key = %key, error = %err, "ignoring slot value"),
        }
    }
    if persist {
        if let Some(value) = stored(provider.storage(), provider.config().failure_policy, key)? {
            return Ok(value);
        }
    }
    Ok(initial.clone())
}

impl StateProvider {
    /// Mount a consumer of `key` under this provider.
    pub fn use_state<T>(
        &self,
        key: impl Into<String>,
        initial: T,
        options: UseOptions,
    ) -> Result<SharedState<T>, StateError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        SharedState::new(self.clone(), key.into(), initial, options)
    }
}

/// Mount a consumer of `key` under the current provider.
///
/// Fails with [`StateError::NoProvider`] outside
/// [`StateProvider::provide`], and with [`StateError::NoRuntime`] when no
/// Tokio runtime is available for the debounce timer.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use slotstate::{use_shared_state, StateProvider, UseOptions};
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let provider = StateProvider::default();
/// provider.provide(|| {
///     let options = UseOptions::new().debounce(Duration::from_millis(100));
///     let counter = use_shared_state("counter", 0, options).unwrap();
///     counter.update(|n| n + 1).unwrap();
///     assert_eq!(counter.value().unwrap(), 1);
///     assert_eq!(counter.debounced_value(), 0);
/// });
/// # }
/// ```
pub fn use_shared_state<T>(
    key: impl Into<String>,
    initial: T,
    options: UseOptions,
) -> Result<SharedState<T>, StateError>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    StateProvider::current()?.use_state(key, initial, options)
}
