//! Consumer hooks over the shared slots.
//!
//! - [`use_shared_state`] / [`StateProvider::use_state`](crate::StateProvider::use_state)
//!   mount a typed consumer of one key
//! - [`keyed`] binds the key type to an enumeration

mod keyed;
mod shared;

pub use keyed::{keyed, KeyedHook, StateKey};
pub use shared::{use_shared_state, SetValue, SharedState, UseOptions};
