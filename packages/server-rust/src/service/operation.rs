//! Typed operations flowing through the dispatch pipeline.

use std::collections::HashMap;

use linna_core::{CancellationToken, Credentials, ProviderKind, RuntimeError, StatusCode};
use serde::Serialize;

use crate::session::SessionClaims;

/// Message returned to callers for any failure that is not a module signal.
pub const INTERNAL_MESSAGE: &str = "internal server error";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Transport facts about the caller, captured once per request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: HashMap<String, Vec<String>>,
    pub query_params: HashMap<String, Vec<String>>,
    pub client_ip: Option<String>,
    pub client_port: Option<String>,
    pub lang: Option<String>,
    /// Verified session of the caller, if a bearer token was presented.
    pub session: Option<SessionClaims>,
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub meta: RequestMeta,
    pub call_timeout_ms: u64,
    /// Cancelled by the timeout layer when the deadline passes.
    pub cancel: CancellationToken,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, meta: RequestMeta, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            meta,
            call_timeout_ms,
            cancel: CancellationToken::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Authentication request as received from a client.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub credentials: Credentials,
    pub username: String,
    pub create: bool,
    /// Variables stored in the minted session.
    pub vars: HashMap<String, String>,
}

#[derive(Debug)]
pub enum Operation {
    Rpc {
        ctx: OperationContext,
        id: String,
        payload: String,
    },
    Authenticate {
        ctx: OperationContext,
        request: AuthRequest,
    },
    /// Mint a session for an identity that is already resolved.
    TokenGenerate {
        ctx: OperationContext,
        user_id: String,
        username: String,
        expiry: i64,
        vars: HashMap<String, String>,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Operation::Rpc { ctx, .. }
            | Operation::Authenticate { ctx, .. }
            | Operation::TokenGenerate { ctx, .. } => ctx,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Rpc { .. } => "rpc",
            Operation::Authenticate { .. } => "authenticate",
            Operation::TokenGenerate { .. } => "token_generate",
        }
    }

    /// Rpc id or provider name, for spans and metrics labels.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Operation::Rpc { id, .. } => id.to_lowercase(),
            Operation::Authenticate { request, .. } => request.credentials.kind().to_string(),
            Operation::TokenGenerate { .. } => ProviderKind::TokenGenerate.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Session established for a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionGrant {
    pub token: String,
    pub created: bool,
    pub user_id: String,
    pub username: String,
    pub expires_at: i64,
}

#[derive(Debug)]
pub enum OperationResponse {
    Rpc(String),
    Session(SessionGrant),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("rpc function not found: {id}")]
    ProcedureNotFound { id: String },
    #[error("no loaded module supports {provider} authentication")]
    ProviderUnsupported { provider: ProviderKind },
    /// A signal raised by module code. Code and message are forwarded as is.
    #[error("{message}")]
    Module { code: i32, message: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Classify an error coming out of module code.
    ///
    /// A [`RuntimeError`] anywhere in the chain keeps its code and message;
    /// anything else becomes `Internal`.
    #[must_use]
    pub fn from_module(err: anyhow::Error) -> Self {
        match err.downcast_ref::<RuntimeError>() {
            Some(signal) => Self::from(signal.clone()),
            None => DispatchError::Internal(err),
        }
    }

    /// Raw status code sent to the caller.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            DispatchError::Module { code, .. } => *code,
            other => other.status().code(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::ProcedureNotFound { .. } => StatusCode::NotFound,
            DispatchError::ProviderUnsupported { .. } => StatusCode::Unimplemented,
            DispatchError::Module { code, .. } => {
                StatusCode::from_code(*code).unwrap_or(StatusCode::Unknown)
            }
            DispatchError::Timeout { .. } => StatusCode::DeadlineExceeded,
            DispatchError::Overloaded => StatusCode::Unavailable,
            DispatchError::Internal(_) => StatusCode::Internal,
        }
    }

    /// Message safe to show to the caller. Internal details never leak.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            DispatchError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RuntimeError> for DispatchError {
    fn from(signal: RuntimeError) -> Self {
        DispatchError::Module {
            code: signal.code,
            message: signal.message,
        }
    }
}
