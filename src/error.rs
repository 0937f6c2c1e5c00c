//! Error types for the dita-gateway service.
//!
//! Two distinct error types reflect two distinct failure domains:
//!
//! * [`GatewayError`]: everything a request can fail with (a bad upload,
//!   a bundle with the wrong shape, an unknown session, or a pipeline run
//!   that did not produce its artifacts). Every variant maps to one HTTP
//!   status via [`GatewayError::status_code`].
//!
//! * [`StageError`]: a failure inside one external pipeline stage. It
//!   always carries the [`Stage`] it came from so a caller can tell a
//!   conversion crash apart from an extraction crash.

use crate::pipeline::Stage;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// All errors surfaced by the gateway library.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// The multipart request had no `file` field.
    #[error("No archive was uploaded (expected a multipart field named 'file')")]
    UploadMissing,

    /// The request body could not be parsed (malformed multipart or JSON).
    #[error("Malformed request: {detail}")]
    BadRequest { detail: String },

    /// The upload could not be persisted to the intake workspace.
    #[error("Failed to write upload to '{path}': {source}")]
    IntakeWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload exceeded the configured size limit.
    #[error("Upload exceeds the {limit}-byte limit")]
    UploadTooLarge { limit: u64 },

    /// The archive container is corrupt or not a zip file.
    #[error("Failed to unpack archive: {detail}")]
    CorruptArchive { detail: String },

    /// An archive entry would land outside the extraction directory.
    #[error("Archive entry '{entry}' escapes the extraction directory")]
    UnsafeArchiveEntry { entry: String },

    // ── Discovery errors ──────────────────────────────────────────────────
    /// No directory in the upload directly contains a content file.
    #[error("No folder containing .{extension} files was found in the upload")]
    ContentRootNotFound { extension: String },

    /// A content root was found but its metadata file was not.
    #[error("Metadata file '{filename}' not found (expected in the content folder or its '{subdir}/' subfolder)")]
    MetadataNotFound { filename: String, subdir: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The content root exists but does not have the canonical shape.
    #[error("Invalid bundle layout: {message}")]
    InvalidLayout { message: String },

    /// The intake workspace exists but was never unpacked.
    #[error("Session {token} has no extracted archive")]
    ExtractionMissing { token: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// One of the external stages failed.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Another pipeline run for the same session is in flight.
    #[error("Session {token} is already being processed")]
    SessionBusy { token: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// Unknown, malformed, or evicted session token.
    #[error("Session '{token}' does not exist")]
    SessionNotFound { token: String },

    /// The session exists but the requested file does not.
    #[error("File '{filename}' does not exist for session '{token}'")]
    ArtifactNotFound { token: String, filename: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for this error: 4xx when the bundle shape or the request
    /// is wrong, 5xx when unpacking, the tooling, or the host failed.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UploadMissing
            | GatewayError::BadRequest { .. }
            | GatewayError::ContentRootNotFound { .. }
            | GatewayError::MetadataNotFound { .. }
            | GatewayError::InvalidLayout { .. }
            | GatewayError::ExtractionMissing { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::SessionNotFound { .. } | GatewayError::ArtifactNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::SessionBusy { .. } => StatusCode::CONFLICT,
            GatewayError::IntakeWrite { .. }
            | GatewayError::CorruptArchive { .. }
            | GatewayError::UnsafeArchiveEntry { .. }
            | GatewayError::Stage(_)
            | GatewayError::InvalidConfig(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Renders as `{"error": "<message>"}` with [`GatewayError::status_code`].
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), "{message}");
        } else {
            warn!(status = status.as_u16(), "{message}");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// A failure of one external pipeline stage.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed: {kind}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: StageFailure,
}

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum StageFailure {
    /// The tool exited non-zero; `diagnostics` is its captured stderr
    /// (stdout when stderr was empty).
    #[error("exit code {code:?}: {diagnostics}")]
    ExitStatus {
        code: Option<i32>,
        diagnostics: String,
    },

    /// The tool exceeded the stage timeout and was killed.
    #[error("timed out after {timeout:?} and was terminated")]
    TimedOut { timeout: Duration },

    /// The tool could not be started at all.
    #[error("could not start tool: {detail}")]
    SpawnFailed { detail: String },

    /// The tool exited zero but left its output directory empty.
    #[error("exited successfully but produced no files in '{}'", dir.display())]
    EmptyOutput { dir: PathBuf },

    /// The tool exited zero but an expected artifact is missing.
    #[error("expected artifact '{}' was not produced", path.display())]
    MissingArtifact { path: PathBuf },
}

impl StageError {
    pub fn new(stage: Stage, kind: StageFailure) -> Self {
        Self { stage, kind }
    }
}
