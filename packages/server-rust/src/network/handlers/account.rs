//! Account endpoints: provider authentication and session refresh.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use linna_core::{Credentials, ProviderKind, RuntimeError};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ApiError, AppState, CallerMeta};
use crate::service::operation::{AuthRequest, Operation, OperationResponse, SessionGrant};

fn default_create() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    #[serde(default = "default_create")]
    pub create: bool,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
    /// Replaces the variables of the old session when present.
    #[serde(default)]
    pub vars: Option<HashMap<String, String>>,
}

/// Parse a provider body: the provider's fields plus an optional `vars` object.
fn parse_credentials(
    kind: ProviderKind,
    body: &[u8],
) -> Result<(Credentials, HashMap<String, String>), ApiError> {
    let mut fields: Map<String, Value> = if body.is_empty() {
        Map::new()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::invalid_argument(format!("invalid request body: {e}")))?
    };
    let vars = match fields.remove("vars") {
        Some(Value::Null) | None => HashMap::new(),
        Some(vars) => serde_json::from_value(vars)
            .map_err(|_| ApiError::invalid_argument("vars must be an object of strings"))?,
    };
    fields.insert("provider".to_string(), Value::String(kind.as_str().to_string()));
    let credentials = serde_json::from_value(Value::Object(fields))
        .map_err(|e| ApiError::invalid_argument(format!("invalid {kind} credentials: {e}")))?;
    Ok((credentials, vars))
}

fn into_grant(response: OperationResponse) -> Result<Json<SessionGrant>, ApiError> {
    match response {
        OperationResponse::Session(grant) => Ok(Json(grant)),
        OperationResponse::Rpc(_) => Err(RuntimeError::internal("unexpected rpc response").into()),
    }
}

/// `POST /v2/account/authenticate/{provider}?create=&username=`.
///
/// # Errors
///
/// `InvalidArgument` for unknown providers, malformed query strings or
/// malformed bodies, otherwise whatever the provider returns.
pub async fn authenticate_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<AuthQuery>, QueryRejection>,
    CallerMeta(meta): CallerMeta,
    body: Bytes,
) -> Result<Json<SessionGrant>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::invalid_argument(format!("invalid query: {}", e.body_text())))?;
    let kind: ProviderKind = provider.to_lowercase().parse()?;
    if kind == ProviderKind::TokenGenerate {
        return Err(ApiError::invalid_argument(format!("unknown provider: {provider}")));
    }
    let (credentials, vars) = parse_credentials(kind, &body)?;

    let op = Operation::Authenticate {
        ctx: state.operation_context(meta),
        request: AuthRequest {
            credentials,
            username: query.username,
            create: query.create,
            vars,
        },
    };
    into_grant(state.dispatch(op).await?)
}

/// `POST /v2/account/session/refresh` with `{ "token", "vars"? }`.
///
/// # Errors
///
/// `Unauthenticated` when the presented session is invalid or expired.
pub async fn session_refresh_handler(
    State(state): State<AppState>,
    CallerMeta(meta): CallerMeta,
    body: Bytes,
) -> Result<Json<SessionGrant>, ApiError> {
    let request: RefreshRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_argument(format!("invalid request body: {e}")))?;
    let claims = state.host.sessions().verify(&request.token)?;

    let op = Operation::TokenGenerate {
        ctx: state.operation_context(meta),
        user_id: claims.uid,
        username: claims.usn,
        expiry: 0,
        vars: request.vars.unwrap_or(claims.vrs),
    };
    into_grant(state.dispatch(op).await?)
}
