use thiserror::Error;

/// Errors surfaced by the state manager, the persistent adapter and hooks.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("no state provider is active on this thread")]
    NoProvider,
    #[error("no tokio runtime available for debounce timers")]
    NoRuntime,
    #[error("subscriber for key `{key}` panicked: {message}")]
    Subscriber { key: String, message: String },
    #[error("stored value for key `{key}` is malformed: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("value for key `{key}` does not match the consumer type: {source}")]
    TypeMismatch {
        key: String,
        source: serde_json::Error,
    },
    #[error("value for key `{key}` could not be encoded: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`StorageBackend`](crate::storage::StorageBackend).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("storage file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}
