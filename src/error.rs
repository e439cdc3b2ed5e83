//! Application error types and HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error model used throughout upload handling, chunking, and translation.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Neither a valid upload nor the fallback file is available.
    #[error("{0}")]
    NoAudioAvailable(String),
    /// The segmentation tool failed or produced no chunks.
    #[error("{0}")]
    Chunking(String),
    /// A chunk's recognition/translation session failed.
    #[error("{0}")]
    Translation(String),
    #[error("{0}")]
    BadMultipart(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates the terminal "no audio" error naming the missing default file.
    pub fn no_audio_available(default_audio: &str) -> Self {
        Self::NoAudioAvailable(format!(
            "No audio uploaded, and {default_audio} not found."
        ))
    }

    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking(message.into())
    }

    pub fn translation(message: impl Into<String>) -> Self {
        Self::Translation(message.into())
    }

    /// Creates a multipart parsing/shape validation error.
    pub fn bad_multipart(message: impl Into<String>) -> Self {
        Self::BadMultipart(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::NoAudioAvailable(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", "no_audio")
            }
            AppError::BadMultipart(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_multipart",
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "not_found"),
            AppError::Chunking(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "chunking_failed",
            ),
            AppError::Translation(_) => (
                StatusCode::BAD_GATEWAY,
                "server_error",
                "translation_failed",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        };

        let payload = ErrorPayload {
            error: ErrorBody {
                message: self.to_string(),
                error_type,
                code,
            },
        };

        (status, Json(payload)).into_response()
    }
}
