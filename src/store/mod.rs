//! Keyed slot storage with per-key subscribers.
//!
//! The [`StateManager`] is the shared core every hook talks to: it holds the
//! current value of each slot and synchronously notifies the subscribers of
//! a key whenever that key is written.

mod manager;

pub use manager::{StateManager, Subscriber, WatchGuard};
