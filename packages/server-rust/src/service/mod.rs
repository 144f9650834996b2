//! Module hosting and operation dispatch.
//!
//! 1. **Registry** (`registry`): load modules, collect RPC registrations
//! 2. **Host** (`host`): dispatch RPC, authentication and token operations
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)

pub mod config;
pub mod host;
pub mod middleware;
pub mod operation;
pub mod registry;

pub use config::{LogFormat, ServerConfig};
pub use host::Host;
pub use operation::{
    AuthRequest, DispatchError, Operation, OperationContext, OperationResponse, RequestMeta,
    SessionGrant,
};
pub use registry::{HostBuilder, RpcEntry, RpcRegistrar, RpcTable};
