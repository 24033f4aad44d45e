//! Quality check implementations.

pub mod command_check;

pub use command_check::CommandQualityCheck;
