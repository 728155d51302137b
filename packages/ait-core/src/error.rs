//! Centralized error types for the AI Talkmaster core library.
//!
//! Defines a single application-wide error enum using `thiserror`, maps
//! each variant to an HTTP status code, and implements `IntoResponse` so
//! handlers can propagate with `?` and still produce a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AitError {
    /// Unknown model/voice, whitespace in join key, duplicate message_id, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Polling an unknown session, conversation, or message.
    #[error("not found: {0}")]
    NotFound(String),

    /// Response has been enqueued but is not ready yet.
    #[error("not ready")]
    NotReady,

    /// The requesting IP has exceeded its daily usage quota.
    #[error("quota exceeded for {0}")]
    QuotaExceeded(String),

    /// The chat or TTS provider returned an error or timed out.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// The external broadcaster rejected or failed to answer a control command.
    ///
    /// Non-fatal: the pipeline logs and continues.
    #[error("broadcaster failure: {0}")]
    BroadcasterFailure(String),

    /// A job queue is full; ingress should shed load.
    #[error("server busy")]
    Busy,

    /// Configuration is invalid. Fatal at startup; the process must exit
    /// before accepting traffic.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for I/O and other infrastructural failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AitError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::NotReady => "not_ready",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::ProviderFailure(_) => "provider_failure",
            Self::BroadcasterFailure(_) => "broadcaster_failure",
            Self::Busy => "server_busy",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::BAD_REQUEST,
            Self::NotReady => StatusCode::from_u16(425).unwrap(),
            Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BroadcasterFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Busy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convenient Result alias for application-wide operations.
pub type AitResult<T> = Result<T, AitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_maps_to_425() {
        let err = AitError::NotReady;
        assert_eq!(err.status_code().as_u16(), 425);
        assert_eq!(err.code(), "not_ready");
    }

    #[test]
    fn quota_exceeded_maps_to_429() {
        let err = AitError::QuotaExceeded("1.2.3.4".into());
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn invalid_input_maps_to_400() {
        let err = AitError::InvalidInput("duplicate message_id".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
