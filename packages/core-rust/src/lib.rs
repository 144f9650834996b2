//! Linna Core — the contract between the Linna host and extension modules.
//!
//! A module implements [`LinnaModule`], registers RPC handlers through the
//! [`Initializer`] it receives in `init`, and reads per-call data from an
//! immutable [`RuntimeContext`]. Failures that should reach the client with
//! a specific status are returned as [`RuntimeError`].

pub mod context;
pub mod database;
pub mod error;
pub mod helpers;
pub mod initializer;
pub mod logger;
pub mod module;

pub use context::{ContextKey, ContextValue, ExecutionMode, RuntimeContext, RuntimeContextBuilder};
pub use database::{Database, DbHandle};
pub use error::{RuntimeError, StatusCode};
pub use initializer::{Initializer, InitializerExt, RegistrationError, RpcFunction, RpcHandler};
pub use logger::{Fields, LogLevel, LogRecord, LogSink, Logger, MemorySink};
pub use module::{
    authenticate, AuthOutcome, Credentials, GameCenterCredentials, LinnaModule, ModuleConfig,
    ModuleRef, ProviderKind, SessionToken,
};

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
