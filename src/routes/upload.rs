//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /p12/chunkedUpload - Start a session with the first chunk
//! - PUT /p12/chunkedUpload?uploadId=&offset= - Append a chunk
//! - GET /p12/chunkedUpload?uploadId= - Current offset of a session
//! - POST /p12/commitChunkedUpload?uploadId= - Commit under a final name

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::upload::{
    body_reader, AppendOutcome, CommitOutcome, CommitRequest, UploadError, UploadProgress,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Upload request failed");
        } else {
            tracing::warn!(error = %self, "Upload request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct OffsetMismatchResponse {
    error: String,
    code: &'static str,
    offset: u64,
}

impl IntoResponse for AppendOutcome {
    fn into_response(self) -> Response {
        match self {
            AppendOutcome::Appended(progress) => {
                (StatusCode::ACCEPTED, Json(progress)).into_response()
            }
            AppendOutcome::UnknownSession => StatusCode::NO_CONTENT.into_response(),
            AppendOutcome::OffsetMismatch { claimed, actual } => {
                let body = Json(OffsetMismatchResponse {
                    error: format!("Offset {} does not match current offset {}", claimed, actual),
                    code: "OFFSET_MISMATCH",
                    offset: actual,
                });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
        }
    }
}

impl IntoResponse for CommitOutcome {
    fn into_response(self) -> Response {
        match self {
            CommitOutcome::Committed { upload_id, .. } => (
                StatusCode::CREATED,
                [(header::LOCATION, format!("/{}", upload_id))],
            )
                .into_response(),
            CommitOutcome::UnknownSession => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/chunkedUpload",
            post(start_upload).put(append_chunk).get(upload_status),
        )
        .route("/commitChunkedUpload", post(commit_upload))
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendParams {
    upload_id: String,
    offset: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    upload_id: String,
}

/// POST /p12/chunkedUpload
///
/// Start a session. The first chunk is the raw request body.
async fn start_upload(
    State(state): State<AppState>,
    body: Body,
) -> Result<(StatusCode, Json<UploadProgress>), UploadError> {
    let uploads = state.uploads().clone();
    let reader = body_reader(body);

    let progress = run_blocking(move || uploads.start_upload(reader)).await?;

    Ok((StatusCode::ACCEPTED, Json(progress)))
}

/// PUT /p12/chunkedUpload?uploadId=&offset=
///
/// Append the raw request body at the claimed offset.
async fn append_chunk(
    State(state): State<AppState>,
    Query(params): Query<AppendParams>,
    body: Body,
) -> Result<AppendOutcome, UploadError> {
    let uploads = state.uploads().clone();
    let reader = body_reader(body);

    run_blocking(move || uploads.append_chunk(&params.upload_id, params.offset, reader)).await
}

/// GET /p12/chunkedUpload?uploadId=
///
/// Report the confirmed offset so a client can resume.
async fn upload_status(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> Result<Response, UploadError> {
    let uploads = state.uploads().clone();

    let progress = run_blocking(move || uploads.session_offset(&params.upload_id)).await?;

    Ok(match progress {
        Some(progress) => Json(progress).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /p12/commitChunkedUpload?uploadId=
///
/// Rename the staging file to the `filename` given in the JSON body.
///
/// The body is only parsed once the session resolves, so an unknown
/// session answers 204 whatever the body holds.
async fn commit_upload(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
    body: Bytes,
) -> Result<CommitOutcome, UploadError> {
    let uploads = state.uploads().clone();

    run_blocking(move || {
        if uploads.session_offset(&params.upload_id)?.is_none() {
            return Ok(CommitOutcome::UnknownSession);
        }

        let request: CommitRequest = serde_json::from_slice(&body)
            .map_err(|e| UploadError::InvalidRequest(format!("Malformed commit body: {}", e)))?;

        uploads.commit(&params.upload_id, &request.filename)
    })
    .await
}

// ============================================================================
// Helpers
// ============================================================================

/// Run a blocking controller operation on the blocking thread pool
async fn run_blocking<T, F>(operation: F) -> Result<T, UploadError>
where
    F: FnOnce() -> Result<T, UploadError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| UploadError::InternalError(format!("Upload task failed: {}", e)))?
}

// ============================================================================
// Tests
// ============================================================================
