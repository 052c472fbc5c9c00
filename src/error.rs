//! Error types for the tus server
//!
//! Every failure a handler can hit maps onto one variant here. The HTTP status
//! is decided by [`TusError::status_code`], and the response always carries the
//! baseline tus headers so clients can still tell which protocol answered.

use std::path::PathBuf;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::upload::types::base_headers;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, TusError>;

/// tus protocol error type
#[derive(Debug, Error)]
pub enum TusError {
    #[error("Received file upload for unsupported file transfer protocol")]
    UnsupportedProtocol,

    #[error("Invalid upload metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid {name} header: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Upload offset mismatch: expected {expected}, got {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Chunk of {chunk} bytes at offset {offset} exceeds upload length {length}")]
    ChunkExceedsLength { offset: u64, chunk: u64, length: u64 },

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource gone: {0}")]
    Gone(String),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Descriptor codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TusError {
    /// Wrap an I/O failure on `path`
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedProtocol => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidMetadata(_) => StatusCode::NOT_FOUND,
            Self::InvalidHeader { .. } => StatusCode::BAD_REQUEST,
            Self::FileExists(_) => StatusCode::CONFLICT,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunkExceedsLength { .. } => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::InvalidMetadata(_) => "INVALID_METADATA",
            Self::InvalidHeader { .. } => "INVALID_HEADER",
            Self::FileExists(_) => "FILE_EXISTS",
            Self::OffsetMismatch { .. } => "OFFSET_MISMATCH",
            Self::ChunkExceedsLength { .. } => "CHUNK_EXCEEDS_LENGTH",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::Body(_) => "BODY_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Gone(_) => "GONE",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Codec(_) => "CODEC_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for TusError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Storage { .. } | Self::Codec(_) | Self::Configuration(_) => {
                tracing::error!(error = %self, "tus request failed");
            }
            _ => {}
        }

        let headers: HeaderMap = base_headers();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        });

        (status, headers, body).into_response()
    }
}
