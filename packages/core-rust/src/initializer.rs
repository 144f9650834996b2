//! Registration authority handed to a module's init entry point.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RuntimeContext;
use crate::database::DbHandle;
use crate::logger::Logger;
use crate::module::ModuleRef;

/// A custom remote procedure registered by a module.
///
/// Receives a fresh context and logger, the host's database handle, a
/// reference to the module that registered it, and the raw payload string.
/// Return a [`RuntimeError`](crate::RuntimeError) to control the transport
/// status; any other error is reported to the caller as internal.
#[async_trait]
pub trait RpcFunction: Send + Sync {
    async fn call(
        &self,
        ctx: RuntimeContext,
        logger: Logger,
        db: DbHandle,
        module: ModuleRef,
        payload: String,
    ) -> anyhow::Result<String>;
}

#[async_trait]
impl<F, Fut> RpcFunction for F
where
    F: Fn(RuntimeContext, Logger, DbHandle, ModuleRef, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn call(
        &self,
        ctx: RuntimeContext,
        logger: Logger,
        db: DbHandle,
        module: ModuleRef,
        payload: String,
    ) -> anyhow::Result<String> {
        (self)(ctx, logger, db, module, payload).await
    }
}

/// Shared, type-erased RPC handler.
pub type RpcHandler = Arc<dyn RpcFunction>;

/// Errors raised while registering callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("rpc id must not be empty")]
    EmptyId,
    #[error("rpc id already registered: {id}")]
    Duplicate { id: String },
    #[error("registration window closed, rpc not registered: {id}")]
    Closed { id: String },
}

/// Write-only registry of callbacks, valid only during the module's `init`.
///
/// Modules receive it as `&mut dyn Initializer`, so the reference cannot
/// outlive the init call.
pub trait Initializer {
    /// Register an RPC handler under `id`.
    ///
    /// # Errors
    ///
    /// Fails when `id` is empty, already registered, or the registration
    /// window has closed.
    fn register_rpc(&mut self, id: &str, handler: RpcHandler) -> Result<(), RegistrationError>;
}

/// Convenience registration for plain async functions and closures.
pub trait InitializerExt: Initializer {
    /// Register any `Fn(ctx, logger, db, module, payload) -> Future` as an RPC.
    ///
    /// # Errors
    ///
    /// Same as [`Initializer::register_rpc`].
    fn register_rpc_fn<F, Fut>(&mut self, id: &str, f: F) -> Result<(), RegistrationError>
    where
        F: Fn(RuntimeContext, Logger, DbHandle, ModuleRef, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.register_rpc(id, Arc::new(f))
    }
}

impl<T: Initializer + ?Sized> InitializerExt for T {}
