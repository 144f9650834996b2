//! HTTP handlers and the state they share.
//!
//! Handlers translate requests into [`Operation`]s, push them through the
//! operation pipeline and translate the result back.

pub mod account;
pub mod health;
pub mod rpc;

pub use account::{authenticate_handler, session_refresh_handler};
pub use health::{healthcheck_handler, readiness_handler};
pub use rpc::rpc_handler;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use linna_core::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use super::shutdown::ShutdownController;
use crate::service::host::Host;
use crate::service::middleware::OperationPipeline;
use crate::service::operation::{
    DispatchError, Operation, OperationContext, OperationResponse, RequestMeta,
};
use crate::status::http_status_for_code;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared application state passed to all handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub host: Host,
    pub pipeline: OperationPipeline,
    pub shutdown: Arc<ShutdownController>,
    next_call_id: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(host: Host, pipeline: OperationPipeline, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            host,
            pipeline,
            shutdown,
            next_call_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fresh operation context with the configured timeout.
    #[must_use]
    pub fn operation_context(&self, meta: RequestMeta) -> OperationContext {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        OperationContext::new(call_id, meta, self.host.config().operation_timeout_ms)
    }

    /// Run `op` through the pipeline while counting it as in flight.
    ///
    /// # Errors
    ///
    /// Whatever the pipeline returns.
    pub async fn dispatch(&self, op: Operation) -> Result<OperationResponse, ApiError> {
        let _guard = self.shutdown.in_flight_guard();
        self.pipeline.clone().oneshot(op).await.map_err(ApiError::from)
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Error body `{ "error": message, "code": n }` with the mapped HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<i32>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        if let DispatchError::Internal(inner) = &err {
            tracing::error!(error = ?inner, "operation failed internally");
        }
        Self::new(err.code(), err.client_message())
    }
}

impl From<linna_core::RuntimeError> for ApiError {
    fn from(err: linna_core::RuntimeError) -> Self {
        Self::new(err.code, err.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = http_status_for_code(self.code);
        (
            status,
            Json(json!({ "error": self.message, "code": self.code })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// CallerMeta extractor
// ---------------------------------------------------------------------------

/// Caller facts extracted from the request head.
///
/// A present but invalid bearer token rejects the request with
/// `Unauthenticated`; an absent one leaves the session empty.
pub struct CallerMeta(pub RequestMeta);

impl FromRequestParts<AppState> for CallerMeta {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &parts.headers {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let mut query_params: HashMap<String, Vec<String>> = HashMap::new();
        if let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri) {
            for (k, v) in pairs {
                query_params.entry(k).or_default().push(v);
            }
        }

        let lang = parts
            .headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(primary_language);

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client_ip = client_ip(peer, &parts.headers, &state.host.config().trusted_proxies);
        let client_port = peer.map(|addr| addr.port().to_string());

        let session = match bearer_token(parts) {
            Some(token) => Some(state.host.sessions().verify(token)?),
            None => None,
        };

        Ok(CallerMeta(RequestMeta {
            headers,
            query_params,
            client_ip,
            client_port,
            lang,
            session,
        }))
    }
}

/// Client IP of the request. `X-Forwarded-For` is honored only when the
/// direct peer is a trusted proxy.
fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap, trusted: &[IpAddr]) -> Option<String> {
    let peer_ip = peer.map(|addr| addr.ip());
    let forwarded = peer_ip
        .filter(|ip| trusted.contains(ip))
        .and_then(|_| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    forwarded.or_else(|| peer_ip.map(|ip| ip.to_string()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// First language tag of an `Accept-Language` value, without its weight.
fn primary_language(header: &str) -> Option<String> {
    header
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
}

/// State over an accounts-only host with default configuration.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use linna_core::MemorySink;

    use crate::modules::accounts::AccountsModule;
    use crate::service::config::ServerConfig;
    use crate::service::middleware::build_operation_pipeline;
    use crate::service::registry::HostBuilder;
    use crate::storage::memory::MemoryDatabase;

    let mut builder = HostBuilder::new(
        ServerConfig::default(),
        Arc::new(MemoryDatabase::new()),
        Arc::new(MemorySink::new()),
    );
    let accounts = AccountsModule::new(builder.sessions()).with_password_cost(4);
    builder
        .load_module(Arc::new(accounts))
        .expect("accounts module loads");
    let host = builder.build();
    let pipeline = build_operation_pipeline(host.clone(), host.config());
    AppState::new(host, pipeline, Arc::new(ShutdownController::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_language_strips_weights() {
        assert_eq!(primary_language("fr-CH, fr;q=0.9, en;q=0.8").as_deref(), Some("fr-CH"));
        assert_eq!(primary_language("de;q=0.5").as_deref(), Some("de"));
        assert_eq!(primary_language("*"), None);
        assert_eq!(primary_language(""), None);
    }

    #[test]
    fn api_error_maps_status() {
        let resp = ApiError::new(StatusCode::NotFound, "nope").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
        let resp = ApiError::new(99, "odd").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn forwarded_for_requires_trusted_peer() {
        let proxy: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let direct: SocketAddr = "203.0.113.9:5000".parse().unwrap();
        let trusted: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap()];
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());

        assert_eq!(
            client_ip(Some(proxy), &headers, &trusted).as_deref(),
            Some("198.51.100.7")
        );
        assert_eq!(
            client_ip(Some(direct), &headers, &trusted).as_deref(),
            Some("203.0.113.9")
        );
        assert_eq!(
            client_ip(Some(proxy), &headers, &[]).as_deref(),
            Some("10.0.0.1")
        );
        assert_eq!(client_ip(None, &headers, &trusted), None);
        assert_eq!(
            client_ip(Some(proxy), &HeaderMap::new(), &trusted).as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn internal_dispatch_error_is_masked() {
        let err = ApiError::from(DispatchError::Internal(anyhow::anyhow!("secret detail")));
        assert_eq!(err.code, 13);
        assert_eq!(err.message, "internal server error");
    }
}
