//! Drover - a control plane that drives an AI coding agent through a
//! verify-fix-review change lifecycle.
//!
//! The crate is layered hexagonally: `domain` holds the models, ports, and
//! errors; `services` holds the state machines and control loops;
//! `infrastructure` adapts the ports to real processes, git, and disk; and
//! `application` wires the graph together for the `cli`.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::AppContext;
pub use domain::{DomainError, DomainResult};
