use std::cell::RefCell;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::error::StateError;
use crate::storage::{MemoryBackend, PersistentStore, StorageBackend};
use crate::store::StateManager;

struct ProviderInner {
    manager: StateManager,
    storage: Arc<PersistentStore>,
    config: StateConfig,
}

/// Carrier that hands one [`StateManager`] and one [`PersistentStore`] to
/// every consumer beneath it.
///
/// A provider is built explicitly at the application root (or in a test)
/// and made current for a stretch of code with [`provide`](Self::provide).
/// There is no global fallback: consumers outside any `provide` get
/// [`StateError::NoProvider`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use slotstate::StateProvider;
///
/// let provider = StateProvider::default();
/// provider.provide(|| {
///     let current = StateProvider::current().unwrap();
///     current.manager().write("ready", json!(true)).unwrap();
/// });
/// assert_eq!(provider.manager().get("ready"), Some(json!(true)));
/// ```
#[derive(Clone)]
pub struct StateProvider {
    inner: Arc<ProviderInner>,
}

// Thread-local stack of provided contexts
thread_local! {
    static PROVIDER_STACK: RefCell<Vec<StateProvider>> = const { RefCell::new(Vec::new()) };
}

impl Default for StateProvider {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

impl StateProvider {
    /// Create a provider with a fresh manager and in-memory storage.
    pub fn new(config: StateConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> StateProviderBuilder {
        StateProviderBuilder::default()
    }

    /// The manager holding this provider's slots.
    pub fn manager(&self) -> &StateManager {
        &self.inner.manager
    }

    /// The persistent adapter consumers with persistence write through.
    pub fn storage(&self) -> &PersistentStore {
        &self.inner.storage
    }

    /// Owned handle on the persistent store, for callbacks that must not
    /// keep the whole provider alive.
    pub(crate) fn storage_handle(&self) -> Arc<PersistentStore> {
        Arc::clone(&self.inner.storage)
    }

    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }

    /// Run `f` with this provider as the current context on this thread.
    ///
    /// Providers nest; the previous one is restored when `f` returns, even
    /// if it panics.
    pub fn provide<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        PROVIDER_STACK.with(|stack| {
            stack.borrow_mut().push(self.clone());
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        PROVIDER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The innermost provider made current with [`provide`](Self::provide).
    pub fn current() -> Result<Self, StateError> {
        PROVIDER_STACK
            .with(|stack| stack.borrow().last().cloned())
            .ok_or(StateError::NoProvider)
    }

    /// Whether two handles point at the same provider.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Builder for a [`StateProvider`].
///
/// Passing an existing manager lets isolated subtrees (or test fixtures)
/// share slots.
#[derive(Default)]
pub struct StateProviderBuilder {
    manager: Option<StateManager>,
    backend: Option<Arc<dyn StorageBackend>>,
    config: Option<StateConfig>,
}

impl StateProviderBuilder {
    /// Use an existing manager instead of a fresh one.
    ///
    /// The manager keeps the failure policy it was created with; the
    /// config's policy only applies to storage and hooks.
    pub fn manager(mut self, manager: StateManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: StateConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> StateProvider {
        let config = self.config.unwrap_or_default();
        let manager = match self.manager {
            Some(manager) => {
                if manager.policy() != config.failure_policy {
                    tracing::warn!(
                        manager_policy = ?manager.policy(),
                        config_policy = ?config.failure_policy,
                        "shared manager keeps its own failure policy"
                    );
                }
                manager
            }
            None => StateManager::from_config(&config),
        };
        let backend: Arc<dyn StorageBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(MemoryBackend::new()),
        };
        let storage = Arc::new(PersistentStore::new(
            backend,
            config.storage_prefix.clone(),
            config.failure_policy,
        ));
        tracing::debug!(
            backend = storage.backend().name(),
            prefix = ?config.storage_prefix,
            "state provider built"
        );

        StateProvider {
            inner: Arc::new(ProviderInner {
                manager,
                storage,
                config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use serde_json::json;

    #[test]
    fn no_provider_outside_provide() {
        assert!(matches!(
            StateProvider::current(),
            Err(StateError::NoProvider)
        ));
    }

    #[test]
    fn providers_nest() {
        let outer = StateProvider::default();
        let inner = StateProvider::default();

        outer.provide(|| {
            assert!(StateProvider::current().unwrap().ptr_eq(&outer));
            inner.provide(|| {
                assert!(StateProvider::current().unwrap().ptr_eq(&inner));
            });
            assert!(StateProvider::current().unwrap().ptr_eq(&outer));
        });
        assert!(StateProvider::current().is_err());
    }

    #[test]
    fn stack_restored_after_panic() {
        let provider = StateProvider::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            provider.provide(|| panic!("render failed"));
        }));
        assert!(result.is_err());
        assert!(StateProvider::current().is_err());
    }

    #[test]
    fn shared_manager_between_providers() {
        let manager = StateManager::new();
        let a = StateProvider::builder().manager(manager.clone()).build();
        let b = StateProvider::builder().manager(manager).build();

        a.manager().write("k", json!(1)).unwrap();
        assert_eq!(b.manager().get("k"), Some(json!(1)));
    }

    #[test]
    fn shared_manager_keeps_its_policy() {
        let provider = StateProvider::builder()
            .manager(StateManager::new())
            .config(StateConfig {
                failure_policy: FailurePolicy::Propagate,
                ..StateConfig::default()
            })
            .build();
        assert_eq!(provider.manager().policy(), FailurePolicy::LogAndContinue);

        let owned = StateProvider::new(StateConfig {
            failure_policy: FailurePolicy::Propagate,
            ..StateConfig::default()
        });
        assert_eq!(owned.manager().policy(), FailurePolicy::Propagate);
    }

    #[test]
    fn config_prefix_reaches_storage() {
        let backend = Arc::new(MemoryBackend::new());
        let provider = StateProvider::builder()
            .backend(backend.clone())
            .config(StateConfig {
                storage_prefix: Some("ns".into()),
                ..StateConfig::default()
            })
            .build();

        provider.storage().set_item("k", &json!(1)).unwrap();
        assert_eq!(backend.get_item("ns-k").unwrap().as_deref(), Some("1"));
    }
}
