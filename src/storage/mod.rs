//! Persistence of slot values.
//!
//! A [`StorageBackend`] stores plain text by key; the [`PersistentStore`]
//! adapter layers JSON encoding, key namespacing and an identity cache for
//! composite values on top of it.

mod backend;
mod persistent;

pub use backend::{detect_backend, open_or_memory, FileBackend, MemoryBackend, StorageBackend};
pub use persistent::PersistentStore;
