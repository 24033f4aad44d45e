//! Application layer - wiring and lifecycle.

pub mod context;

pub use context::AppContext;
