//! Upload types for the chunked upload protocol

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::io::OverrunError;
use crate::staging::StagingError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum bytes accepted from a single request: i32::MAX
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = i32::MAX as u64;

// ============================================================================
// Protocol Types
// ============================================================================

/// Where a session stands after a successful request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    /// Session ID
    pub upload_id: Uuid,

    /// Bytes held by the staging file
    pub offset: u64,
}

/// Body of a commit request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Name the upload is committed under
    pub filename: String,
}

/// Result of appending a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(UploadProgress),

    /// The id does not name an open session
    UnknownSession,

    /// The claimed offset is not the staging file's length; nothing was written
    OffsetMismatch { claimed: u64, actual: u64 },
}

/// Result of committing a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { upload_id: Uuid, path: PathBuf },
    UnknownSession,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Chunk exceeds the bounded read limit: {0}")]
    Overrun(OverrunError),

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Staging error: {0}")]
    Staging(StagingError),

    #[error("Target already exists: {0}")]
    TargetExists(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Overrun(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TargetExists(_) => StatusCode::CONFLICT,
            Self::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Overrun(_) => "CHUNK_TOO_LARGE",
            Self::Io(_) => "IO_ERROR",
            Self::Staging(_) => "STAGING_ERROR",
            Self::TargetExists(_) => "TARGET_EXISTS",
            Self::InvalidFileName(_) => "INVALID_FILE_NAME",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        if OverrunError::is_overrun(&err) {
            let overrun = err
                .into_inner()
                .and_then(|inner| inner.downcast::<OverrunError>().ok());
            if let Some(overrun) = overrun {
                return Self::Overrun(*overrun);
            }
            return Self::InternalError("overrun error lost its payload".to_string());
        }
        Self::Io(err)
    }
}

impl From<StagingError> for UploadError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::AlreadyExists(name) => Self::TargetExists(name),
            StagingError::InvalidName(name) => Self::InvalidFileName(name),
            StagingError::Io(e) => e.into(),
            other => Self::Staging(other),
        }
    }
}
