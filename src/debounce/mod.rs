//! Trailing-edge debouncing of values.

mod debounced;

pub use debounced::Debounced;
