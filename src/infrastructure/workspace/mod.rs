//! Workspace gateway implementations.

pub mod git_workspace;

pub use git_workspace::GitWorkspace;
