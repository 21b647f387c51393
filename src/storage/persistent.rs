use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::backend::{MemoryBackend, StorageBackend};
use crate::config::FailurePolicy;
use crate::error::StateError;

fn is_composite(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// JSON adapter over a [`StorageBackend`].
///
/// Keys are namespaced as `prefix-key`. Decoded objects and arrays are kept
/// in an in-memory cache so repeated reads hand out the same `Arc`;
/// primitives are decoded from the backend on every read.
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
    prefix: Option<String>,
    policy: FailurePolicy,
    cache: RwLock<HashMap<String, Arc<Value>>>,
}

impl Default for PersistentStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), None, FailurePolicy::default())
    }
}

impl PersistentStore {
    /// Wrap `backend`, namespacing keys with `prefix` when one is given.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        prefix: Option<String>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            backend,
            prefix,
            policy,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The backend entries are read from and written to.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The backend key for `key`: `prefix-key`, or `key` without a prefix.
    pub fn namespaced(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{key}"),
            None => key.to_string(),
        }
    }

    /// Read and decode the stored value for `key`.
    ///
    /// Missing entries are `Ok(None)`. Unreadable or malformed entries are
    /// also `Ok(None)` unless the policy propagates failures.
    pub fn get_item(&self, key: &str) -> Result<Option<Arc<Value>>, StateError> {
        let key = self.namespaced(key);
        if let Some(cached) = self.cache.read().get(&key) {
            return Ok(Some(Arc::clone(cached)));
        }

        let raw = match self.backend.get_item(&key) {
            Ok(raw) => raw,
            Err(err) if self.policy.propagates() => return Err(err.into()),
            Err(err) => {
                tracing::warn!(key = %key, backend = self.backend.name(), error = %err, "storage read failed, treating as absent");
                return Ok(None);
            }
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                let value = Arc::new(value);
                if is_composite(&value) {
                    self.cache.write().insert(key, Arc::clone(&value));
                }
                Ok(Some(value))
            }
            Err(source) if self.policy.propagates() => Err(StateError::Decode { key, source }),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "malformed stored value, treating as absent");
                Ok(None)
            }
        }
    }

    /// Encode `value` and write it to the backend.
    ///
    /// The identity cache only takes the new value once the backend has
    /// accepted it; a failed write evicts the key instead.
    pub fn set_item(&self, key: &str, value: &Value) -> Result<(), StateError> {
        let key = self.namespaced(key);
        let text = serde_json::to_string(value).map_err(|source| StateError::Encode {
            key: key.clone(),
            source,
        })?;

        let written = self.backend.set_item(&key, &text);
        {
            let mut cache = self.cache.write();
            if written.is_ok() && is_composite(value) {
                cache.insert(key.clone(), Arc::new(value.clone()));
            } else {
                cache.remove(&key);
            }
        }

        match written {
            Ok(()) => {
                tracing::debug!(key = %key, backend = self.backend.name(), "persisted slot");
                Ok(())
            }
            Err(err) if self.policy.propagates() => Err(err.into()),
            Err(err) => {
                tracing::warn!(key = %key, backend = self.backend.name(), error = %err, "storage write failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use serde_json::json;

    struct BrokenBackend;

    impl StorageBackend for BrokenBackend {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    /// Reads pass through; every write is refused.
    struct ReadOnlyBackend(MemoryBackend);

    impl StorageBackend for ReadOnlyBackend {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get_item(key)
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".into()))
        }

        fn name(&self) -> &'static str {
            "read-only"
        }
    }

    fn store_with(backend: Arc<MemoryBackend>, prefix: Option<&str>) -> PersistentStore {
        PersistentStore::new(backend, prefix.map(str::to_string), FailurePolicy::default())
    }

    #[test]
    fn prefix_namespaces_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(Arc::clone(&backend), Some("app"));

        store.set_item("theme", &json!("dark")).unwrap();
        assert_eq!(
            backend.get_item("app-theme").unwrap().as_deref(),
            Some("\"dark\"")
        );
        assert_eq!(backend.get_item("theme").unwrap(), None);
        assert_eq!(*store.get_item("theme").unwrap().unwrap(), json!("dark"));
    }

    #[test]
    fn objects_keep_identity() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("user", r#"{"name":"Ada"}"#).unwrap();
        let store = store_with(backend, None);

        let first = store.get_item("user").unwrap().unwrap();
        let second = store.get_item("user").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn primitives_are_reread() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("n", "1").unwrap();
        let store = store_with(Arc::clone(&backend), None);

        assert_eq!(*store.get_item("n").unwrap().unwrap(), json!(1));
        backend.set_item("n", "2").unwrap();
        assert_eq!(*store.get_item("n").unwrap().unwrap(), json!(2));
    }

    #[test]
    fn set_caches_objects_and_evicts_on_primitive() {
        let store = PersistentStore::default();
        store.set_item("k", &json!([1, 2])).unwrap();
        let a = store.get_item("k").unwrap().unwrap();
        let b = store.get_item("k").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        store.set_item("k", &json!(3)).unwrap();
        assert_eq!(*store.get_item("k").unwrap().unwrap(), json!(3));
    }

    #[test]
    fn malformed_text_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("bad", "{not json").unwrap();
        let store = store_with(backend, None);
        assert!(store.get_item("bad").unwrap().is_none());
    }

    #[test]
    fn malformed_text_propagates_when_configured() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_item("bad", "{not json").unwrap();
        let store = PersistentStore::new(backend, None, FailurePolicy::Propagate);
        assert!(matches!(
            store.get_item("bad"),
            Err(StateError::Decode { .. })
        ));
    }

    #[test]
    fn backend_failures_follow_policy() {
        let lenient = PersistentStore::new(Arc::new(BrokenBackend), None, FailurePolicy::LogAndContinue);
        assert!(lenient.get_item("k").unwrap().is_none());
        lenient.set_item("k", &json!(1)).unwrap();

        let strict = PersistentStore::new(Arc::new(BrokenBackend), None, FailurePolicy::Propagate);
        assert!(matches!(strict.get_item("k"), Err(StateError::Storage(_))));
        assert!(matches!(
            strict.set_item("k", &json!(1)),
            Err(StateError::Storage(_))
        ));
    }

    #[test]
    fn failed_write_does_not_cache() {
        let inner = MemoryBackend::new();
        inner.set_item("list", "[1]").unwrap();
        let store = PersistentStore::new(
            Arc::new(ReadOnlyBackend(inner)),
            None,
            FailurePolicy::Propagate,
        );

        let before = store.get_item("list").unwrap().unwrap();
        assert_eq!(*before, json!([1]));

        assert!(matches!(
            store.set_item("list", &json!([2])),
            Err(StateError::Storage(_))
        ));
        let after = store.get_item("list").unwrap().unwrap();
        assert_eq!(*after, json!([1]));
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn failed_write_evicts_cache_when_lenient() {
        let inner = MemoryBackend::new();
        inner.set_item("list", "[1]").unwrap();
        let store = PersistentStore::new(
            Arc::new(ReadOnlyBackend(inner)),
            None,
            FailurePolicy::LogAndContinue,
        );

        store.get_item("list").unwrap();
        store.set_item("list", &json!([2])).unwrap();
        assert_eq!(*store.get_item("list").unwrap().unwrap(), json!([1]));
    }
}
