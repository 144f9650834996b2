//! Translation from the shared status-code space to HTTP statuses.
//!
//! Follows the standard gRPC to HTTP mapping. Codes outside the table are
//! treated as `Unknown`.

use axum::http::StatusCode as HttpStatus;
use linna_core::StatusCode;

/// HTTP status for a status code.
#[must_use]
pub fn http_status(code: StatusCode) -> HttpStatus {
    match code {
        StatusCode::Ok => HttpStatus::OK,
        StatusCode::Cancelled => HttpStatus::from_u16(499).unwrap_or(HttpStatus::BAD_REQUEST),
        StatusCode::Unknown | StatusCode::Internal | StatusCode::DataLoss => {
            HttpStatus::INTERNAL_SERVER_ERROR
        }
        StatusCode::InvalidArgument | StatusCode::FailedPrecondition | StatusCode::OutOfRange => {
            HttpStatus::BAD_REQUEST
        }
        StatusCode::DeadlineExceeded => HttpStatus::GATEWAY_TIMEOUT,
        StatusCode::NotFound => HttpStatus::NOT_FOUND,
        StatusCode::AlreadyExists | StatusCode::Aborted => HttpStatus::CONFLICT,
        StatusCode::PermissionDenied => HttpStatus::FORBIDDEN,
        StatusCode::ResourceExhausted => HttpStatus::TOO_MANY_REQUESTS,
        StatusCode::Unimplemented => HttpStatus::NOT_IMPLEMENTED,
        StatusCode::Unavailable => HttpStatus::SERVICE_UNAVAILABLE,
        StatusCode::Unauthenticated => HttpStatus::UNAUTHORIZED,
    }
}

/// HTTP status for a raw module-supplied code.
#[must_use]
pub fn http_status_for_code(code: i32) -> HttpStatus {
    http_status(StatusCode::from_code(code).unwrap_or(StatusCode::Unknown))
}
