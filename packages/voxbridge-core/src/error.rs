//! Centralized error types for the VoxBridge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::transcript::SpeakerRole;

/// Application-wide error type for the VoxBridge server.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Requested session id does not exist in the registry.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The same session direction was opened twice.
    #[error("Direction {role} already bound for session {session_id}")]
    AlreadyBound {
        session_id: String,
        role: SpeakerRole,
    },

    /// Operation attempted on a session that has already closed.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Client sent an invalid or malformed frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Speech-to-text provider failure.
    #[error("STT error: {0}")]
    Stt(String),

    /// Recording file I/O failure.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::AlreadyBound { .. } => "already_bound",
            Self::SessionClosed(_) => "session_closed",
            Self::InvalidFrame(_) => "invalid_frame",
            Self::Stt(_) => "stt_error",
            Self::Recording(_) => "recording_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::AlreadyBound { .. } => StatusCode::CONFLICT,
            Self::SessionClosed(_) | Self::InvalidFrame(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_maps_to_not_found() {
        let err = BridgeError::UnknownSession("s1".into());
        assert_eq!(err.code(), "unknown_session");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn already_bound_maps_to_conflict() {
        let err = BridgeError::AlreadyBound {
            session_id: "s1".into(),
            role: SpeakerRole::Technician,
        };
        assert_eq!(err.code(), "already_bound");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn configuration_maps_to_service_unavailable() {
        let err = BridgeError::Configuration("missing api key".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
