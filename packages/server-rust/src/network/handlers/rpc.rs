//! `POST /v2/rpc/{id}`: invoke a registered RPC with the raw body as payload.

use axum::body::Bytes;
use axum::extract::{Path, State};

use super::{ApiError, AppState, CallerMeta};
use crate::service::operation::{Operation, OperationResponse};

/// The response body is the handler's output string, unchanged.
///
/// # Errors
///
/// Unknown ids are `NotFound`; module signals keep their code and message.
/// A body that is not UTF-8 is `InvalidArgument`.
pub async fn rpc_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CallerMeta(meta): CallerMeta,
    body: Bytes,
) -> Result<String, ApiError> {
    let payload = String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::invalid_argument("request body must be valid UTF-8"))?;
    let op = Operation::Rpc {
        ctx: state.operation_context(meta),
        id,
        payload,
    };
    match state.dispatch(op).await? {
        OperationResponse::Rpc(body) => Ok(body),
        OperationResponse::Session(_) => Err(ApiError::from(linna_core::RuntimeError::internal(
            "unexpected session response",
        ))),
    }
}
