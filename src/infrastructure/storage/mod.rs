//! Durable state - atomic JSON snapshots.

pub mod state_store;

pub use state_store::{BoundedLog, StateStore};
