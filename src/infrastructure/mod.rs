//! Infrastructure layer - adapters behind the domain ports.

pub mod agent;
pub mod checks;
pub mod config;
pub mod review;
pub mod storage;
pub mod workspace;
