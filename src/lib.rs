//! # Slotstate
//!
//! Keyed shared state for UI components.
//!
//! Independent consumers read and write named slots held by one
//! [`StateManager`] without a central reducer. Every write synchronously
//! notifies the consumers of that key.
//!
//! ## Pieces
//!
//! - `StateManager` - slot map plus per-key subscribers
//! - `StateProvider` - the context carrier consumers resolve through
//! - `SharedState<T>` - a typed consumer with a debounced view and optional
//!   persistence, created by [`use_shared_state`]
//! - `PersistentStore` - JSON adapter over a text key/value backend
//! - `Debounced<T>` - trailing-edge debounce of a value
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use slotstate::{StateProvider, UseOptions};
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let provider = StateProvider::default();
//! let options = UseOptions::new().debounce(Duration::from_millis(100));
//!
//! let header = provider.use_state("count", 0, options).unwrap();
//! let footer = provider.use_state("count", 0, options).unwrap();
//!
//! header.set(3).unwrap();
//! assert_eq!(footer.value().unwrap(), 3);
//! assert_eq!(footer.renders(), 1);
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod hook;
pub mod runtime;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use config::{FailurePolicy, StateConfig};
pub use debounce::Debounced;
pub use error::{StateError, StorageError};
pub use hook::{keyed, use_shared_state, KeyedHook, SetValue, SharedState, StateKey, UseOptions};
pub use runtime::StateProvider;
pub use storage::{detect_backend, FileBackend, MemoryBackend, PersistentStore, StorageBackend};
pub use store::{StateManager, Subscriber, WatchGuard};
