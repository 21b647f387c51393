//! The context carrier consumers resolve their shared state through.
//!
//! This module provides the explicit, per-tree provider and the
//! thread-local stack that makes it visible to nested consumers.

mod context;

pub use context::{StateProvider, StateProviderBuilder};
