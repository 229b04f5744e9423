use crate::services::error::{AuthError, StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            AppError::not_found(err.to_string())
        } else if err.is_invalid_input() || matches!(err, StorageError::Conflict { .. }) {
            AppError::bad_request(err.to_string())
        } else {
            tracing::error!("storage failure: {}", err);
            AppError::internal(err.to_string())
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::unauthorized(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let cases = [
            (StorageError::BlobNotFound("a/b".into()), StatusCode::NOT_FOUND),
            (StorageError::InvalidObjectKey, StatusCode::BAD_REQUEST),
            (
                StorageError::Conflict {
                    schema: "s".into(),
                    bucket: "b".into(),
                    key: "k".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::Configuration("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn auth_errors_are_unauthorized() {
        assert_eq!(
            AppError::from(AuthError::Expired).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::Invalid).status,
            StatusCode::UNAUTHORIZED
        );
    }
}
