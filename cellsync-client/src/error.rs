//! Claim RPC failures and the status codes they carry.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Status codes the Topology Service reports, named after their gRPC equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    Internal,
    Unknown,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unknown => "UNKNOWN",
        }
    }

    /// Parse a status name as sent in an error body (`"NOT_FOUND"`).
    pub fn from_name(name: &str) -> Option<Self> {
        let code = match name.trim().to_ascii_uppercase().as_str() {
            "CANCELLED" => StatusCode::Cancelled,
            "INVALID_ARGUMENT" => StatusCode::InvalidArgument,
            "DEADLINE_EXCEEDED" => StatusCode::DeadlineExceeded,
            "NOT_FOUND" => StatusCode::NotFound,
            "PERMISSION_DENIED" => StatusCode::PermissionDenied,
            "RESOURCE_EXHAUSTED" => StatusCode::ResourceExhausted,
            "UNAVAILABLE" => StatusCode::Unavailable,
            "INTERNAL" => StatusCode::Internal,
            "UNKNOWN" => StatusCode::Unknown,
            _ => return None,
        };
        Some(code)
    }

    /// Fallback mapping when an error body carries no status name.
    pub fn from_http(status: u16) -> Self {
        match status {
            400 => StatusCode::InvalidArgument,
            401 | 403 => StatusCode::PermissionDenied,
            404 => StatusCode::NotFound,
            408 | 504 => StatusCode::DeadlineExceeded,
            429 => StatusCode::ResourceExhausted,
            499 => StatusCode::Cancelled,
            502 | 503 => StatusCode::Unavailable,
            500 => StatusCode::Internal,
            _ => StatusCode::Unknown,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surface for claim client RPCs.
///
/// Every variant carries the RPC path (`/proto.ClaimService/...`) it came from.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service answered with a non-OK status.
    #[error("{method} failed with {code}: {message}")]
    Status {
        method: &'static str,
        code: StatusCode,
        message: String,
    },

    /// No answer within the caller's deadline.
    #[error("{method} exceeded deadline of {}ms", .deadline.as_millis())]
    DeadlineExceeded {
        method: &'static str,
        deadline: Duration,
    },

    /// Connection-level failure (refused, reset, DNS).
    #[error("{method} transport error: {message}")]
    Transport {
        method: &'static str,
        message: String,
    },

    /// The response could not be decoded.
    #[error("{method} returned an undecodable response: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn method(&self) -> &'static str {
        match self {
            ClientError::Status { method, .. }
            | ClientError::DeadlineExceeded { method, .. }
            | ClientError::Transport { method, .. }
            | ClientError::Decode { method, .. } => method,
        }
    }

    /// Status label for metrics; non-status failures report `UNKNOWN`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClientError::Status { code, .. } => *code,
            ClientError::DeadlineExceeded { .. } => StatusCode::DeadlineExceeded,
            ClientError::Transport { .. } | ClientError::Decode { .. } => StatusCode::Unknown,
        }
    }
}
