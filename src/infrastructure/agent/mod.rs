//! Agent session implementations.

pub mod app_server;
pub mod mock;

pub use app_server::AppServerSession;
pub use mock::MockAgentSession;
