//! HTTP transport: handlers, middleware, listener lifecycle and shutdown.

pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use handlers::{ApiError, AppState};
pub use module::NetworkModule;
pub use shutdown::{HealthState, ShutdownController};
