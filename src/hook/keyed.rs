use std::borrow::Cow;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::shared::{SharedState, UseOptions};
use crate::error::StateError;
use crate::runtime::StateProvider;

/// A type that names shared state slots.
///
/// Implement this for an enum to restrict a [`KeyedHook`] to a fixed set of
/// keys.
///
/// ```
/// use std::borrow::Cow;
/// use slotstate::StateKey;
///
/// #[derive(Clone, Copy)]
/// enum AppKey {
///     Theme,
///     Sidebar,
/// }
///
/// impl StateKey for AppKey {
///     fn as_key(&self) -> Cow<'_, str> {
///         match self {
///             AppKey::Theme => "theme".into(),
///             AppKey::Sidebar => "sidebar".into(),
///         }
///     }
/// }
/// ```
pub trait StateKey {
    fn as_key(&self) -> Cow<'_, str>;
}

impl StateKey for &str {
    fn as_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl StateKey for String {
    fn as_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl StateKey for Cow<'_, str> {
    fn as_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

/// A hook bound to one key type.
pub struct KeyedHook<K> {
    _key: PhantomData<fn(K)>,
}

impl<K> Clone for KeyedHook<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for KeyedHook<K> {}

/// Build a hook that only accepts keys of type `K`.
pub fn keyed<K: StateKey>() -> KeyedHook<K> {
    KeyedHook { _key: PhantomData }
}

impl<K: StateKey> KeyedHook<K> {
    /// Mount a consumer under the current provider.
    pub fn use_state<T>(
        &self,
        key: K,
        initial: T,
        options: UseOptions,
    ) -> Result<SharedState<T>, StateError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.use_state_in(&StateProvider::current()?, key, initial, options)
    }

    pub fn use_state_in<T>(
        &self,
        provider: &StateProvider,
        key: K,
        initial: T,
        options: UseOptions,
    ) -> Result<SharedState<T>, StateError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        provider.use_state(key.as_key().into_owned(), initial, options)
    }
}
