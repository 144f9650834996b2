//! The serving host: routes operations to module code.
//!
//! `Host` is the innermost service of the operation pipeline. It builds the
//! per-call [`RuntimeContext`], invokes module code behind a panic boundary,
//! and turns module results into [`OperationResponse`]s.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use linna_core::{
    authenticate, DbHandle, ExecutionMode, LogSink, Logger, ModuleRef, ProviderKind,
    RuntimeContext, SessionToken,
};
use tower::Service;

use super::config::ServerConfig;
use super::operation::{
    AuthRequest, DispatchError, Operation, OperationContext, OperationResponse, SessionGrant,
};
use super::registry::RpcTable;
use crate::session::SessionIssuer;

struct HostInner {
    config: Arc<ServerConfig>,
    env: HashMap<String, String>,
    rpcs: RpcTable,
    modules: Vec<ModuleRef>,
    db: DbHandle,
    sink: Arc<dyn LogSink>,
    sessions: Arc<SessionIssuer>,
}

/// Frozen module host. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub(super) fn new(
        config: Arc<ServerConfig>,
        env: HashMap<String, String>,
        rpcs: RpcTable,
        modules: Vec<ModuleRef>,
        db: DbHandle,
        sink: Arc<dyn LogSink>,
        sessions: Arc<SessionIssuer>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                env,
                rpcs,
                modules,
                db,
                sink,
                sessions,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn rpc_table(&self) -> &RpcTable {
        &self.inner.rpcs
    }

    #[must_use]
    pub fn rpc_ids(&self) -> Vec<String> {
        self.inner.rpcs.ids()
    }

    /// Loaded modules in load order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleRef] {
        &self.inner.modules
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.inner.sessions
    }

    /// Union of the providers advertised by every loaded module.
    #[must_use]
    pub fn capabilities(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.inner.modules.iter().any(|m| m.supports(*kind)))
            .collect()
    }

    /// Execute one operation.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]. Module signals keep their code and message.
    pub async fn dispatch(&self, op: Operation) -> Result<OperationResponse, DispatchError> {
        match op {
            Operation::Rpc { ctx, id, payload } => self.call_rpc(&ctx, &id, payload).await,
            Operation::Authenticate { ctx, request } => self.authenticate(&ctx, request).await,
            Operation::TokenGenerate {
                ctx: _,
                user_id,
                username,
                expiry,
                vars,
            } => {
                let module = self.provider(ProviderKind::TokenGenerate);
                let session = self
                    .mint(module.as_ref(), &user_id, &username, expiry, &vars)
                    .await?;
                Ok(OperationResponse::Session(SessionGrant {
                    token: session.token,
                    created: false,
                    user_id,
                    username,
                    expires_at: session.expires_at,
                }))
            }
        }
    }

    async fn call_rpc(
        &self,
        ctx: &OperationContext,
        id: &str,
        payload: String,
    ) -> Result<OperationResponse, DispatchError> {
        let Some(entry) = self.inner.rpcs.get(id) else {
            return Err(DispatchError::ProcedureNotFound { id: id.to_string() });
        };
        let id = id.to_lowercase();
        let runtime_ctx = self.runtime_context(ctx, ExecutionMode::Rpc);
        let logger = self.logger().with_fields([
            ("module", entry.module.name().to_string()),
            ("rpc_id", id.clone()),
        ]);
        let fut = entry.handler.call(
            runtime_ctx,
            logger,
            Arc::clone(&self.inner.db),
            Arc::clone(&entry.module),
            payload,
        );
        guarded(fut, &id).await.map(OperationResponse::Rpc)
    }

    async fn authenticate(
        &self,
        ctx: &OperationContext,
        request: AuthRequest,
    ) -> Result<OperationResponse, DispatchError> {
        let kind = request.credentials.kind();
        let module = self
            .provider(kind)
            .ok_or(DispatchError::ProviderUnsupported { provider: kind })?;

        let runtime_ctx = self.runtime_context(ctx, ExecutionMode::Authentication);
        let logger = self.logger().with_fields([
            ("module", module.name().to_string()),
            ("provider", kind.to_string()),
        ]);
        let outcome = guarded(
            authenticate(
                module.as_ref(),
                &runtime_ctx,
                &logger,
                &request.credentials,
                &request.username,
                request.create,
            ),
            kind.as_str(),
        )
        .await?;

        let minter = module
            .supports(ProviderKind::TokenGenerate)
            .then_some(&module);
        let session = self
            .mint(minter, &outcome.user_id, &outcome.username, 0, &request.vars)
            .await?;

        Ok(OperationResponse::Session(SessionGrant {
            token: session.token,
            created: outcome.created,
            user_id: outcome.user_id,
            username: outcome.username,
            expires_at: session.expires_at,
        }))
    }

    /// Mint through `module` when given, otherwise with the host issuer.
    async fn mint(
        &self,
        module: Option<&ModuleRef>,
        user_id: &str,
        username: &str,
        expiry: i64,
        vars: &HashMap<String, String>,
    ) -> Result<SessionToken, DispatchError> {
        match module {
            Some(module) => {
                guarded(
                    module.authenticate_token_generate(user_id, username, expiry, vars),
                    ProviderKind::TokenGenerate.as_str(),
                )
                .await
            }
            None => Ok(self.inner.sessions.issue(user_id, username, expiry, vars)?),
        }
    }

    /// First loaded module advertising `kind`.
    fn provider(&self, kind: ProviderKind) -> Option<ModuleRef> {
        self.inner
            .modules
            .iter()
            .find(|m| m.supports(kind))
            .cloned()
    }

    fn logger(&self) -> Logger {
        Logger::new(Arc::clone(&self.inner.sink))
    }

    /// Fresh context for one call. Caller identity is only exposed to RPCs.
    fn runtime_context(&self, ctx: &OperationContext, mode: ExecutionMode) -> RuntimeContext {
        let meta = &ctx.meta;
        let mut builder = RuntimeContext::builder()
            .env(self.inner.env.clone())
            .execution_mode(mode)
            .node(self.inner.config.node.clone())
            .headers(meta.headers.clone())
            .query_params(meta.query_params.clone())
            .cancellation(ctx.cancel.clone());
        if let Some(lang) = &meta.lang {
            builder = builder.lang(lang.clone());
        }
        if let Some(ip) = &meta.client_ip {
            builder = builder.client_ip(ip.clone());
        }
        if let Some(port) = &meta.client_port {
            builder = builder.client_port(port.clone());
        }
        match (&meta.session, mode) {
            (Some(session), ExecutionMode::Rpc) => builder
                .user_id(session.uid.clone())
                .username(session.usn.clone())
                .vars(session.vrs.clone())
                .user_session_exp(session.exp)
                .session_id(session.tid.clone())
                .build(),
            _ => builder.without_identity().build(),
        }
    }
}

/// Await module code, converting panics and errors into [`DispatchError`].
async fn guarded<T, F>(fut: F, what: &str) -> Result<T, DispatchError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(DispatchError::from_module),
        Err(_) => {
            tracing::error!(operation = what, "module code panicked");
            Err(DispatchError::Internal(anyhow::anyhow!(
                "module code panicked in {what}"
            )))
        }
    }
}

impl Service<Operation> for Host {
    type Response = OperationResponse;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let host = self.clone();
        Box::pin(async move { host.dispatch(op).await })
    }
}
