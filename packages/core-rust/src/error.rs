//! Typed error signal and the shared status-code space.

use std::fmt;

/// Status codes shared by modules and the host. Values match the common RPC
/// status space; the host owns the translation to transport statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    pub const ALL: [StatusCode; 17] = [
        StatusCode::Ok,
        StatusCode::Cancelled,
        StatusCode::Unknown,
        StatusCode::InvalidArgument,
        StatusCode::DeadlineExceeded,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::Unavailable,
        StatusCode::DataLoss,
        StatusCode::Unauthenticated,
    ];

    /// Look up a raw code. Returns `None` outside `0..=16`.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| StatusCode::ALL.get(i).copied())
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.code()
    }
}

/// Failure raised by module code whose message and code are returned to the
/// client. Renders as its message only.
///
/// ```
/// use linna_core::{RuntimeError, StatusCode};
///
/// let err = RuntimeError::new("Server unavailable", StatusCode::Unavailable);
/// assert_eq!(err.to_string(), "Server unavailable");
/// assert_eq!(err.code, 14);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub code: i32,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, code: impl Into<i32>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }

    /// The status this error's code names, `Unknown` for codes outside the table.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_code(self.code).unwrap_or(StatusCode::Unknown)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::InvalidArgument)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NotFound)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::AlreadyExists)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::Unauthenticated)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::Unimplemented)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::Internal)
    }

    /// The error returned by `create = false` authentication with no linked account.
    #[must_use]
    pub fn account_not_found() -> Self {
        Self::not_found("User account not found.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_message_only() {
        let err = RuntimeError::new("boom", 3);
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.status(), StatusCode::InvalidArgument);
    }

    #[test]
    fn codes_map_to_table_positions() {
        for (i, status) in StatusCode::ALL.iter().enumerate() {
            assert_eq!(status.code() as usize, i);
            assert_eq!(StatusCode::from_code(status.code()), Some(*status));
        }
        assert_eq!(StatusCode::from_code(17), None);
        assert_eq!(StatusCode::from_code(-1), None);
    }

    #[test]
    fn out_of_range_code_reports_unknown() {
        assert_eq!(RuntimeError::new("x", 99).status(), StatusCode::Unknown);
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let err: anyhow::Error = RuntimeError::account_not_found().into();
        let signal = err.downcast_ref::<RuntimeError>().unwrap();
        assert_eq!(signal.status(), StatusCode::NotFound);
        assert_eq!(signal.message, "User account not found.");
    }
}
