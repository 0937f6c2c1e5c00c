//! HTTP surface.
//!
//! | Route                                  | Handler          |
//! |----------------------------------------|------------------|
//! | `POST /api/upload`                     | `upload`         |
//! | `POST /api/validate`                   | `run_pipeline`   |
//! | `GET  /api/download/{temp_id}/{file}`  | `download`       |
//! | `GET  /`, `GET /static/{file}`         | landing page     |
//! | `GET  /healthz`                        | liveness         |
//!
//! Every handler returns `Result<_, GatewayError>`; errors render as
//! `{"error": "..."}` with the status from [`GatewayError::status_code`].

use crate::bundle::{find_content_root, validate};
use crate::config::GatewayConfig;
use crate::download::{is_plain_filename, DownloadGateway, XLSX_CONTENT_TYPE};
use crate::error::GatewayError;
use crate::intake::ArchiveIntake;
use crate::pipeline::{PipelineRunner, EXCEL1, EXCEL2};
use crate::session::{SessionGates, SessionToken};
use crate::store::{EphemeralStore, Namespace, EXTRACTED_DIR};
use crate::sweeper::RetentionSweeper;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Slack on top of `max_upload_bytes` for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state behind every handler.
#[derive(Debug)]
pub struct AppState {
    pub config: GatewayConfig,
    pub store: EphemeralStore,
    pub intake: ArchiveIntake,
    pub runner: PipelineRunner,
    pub downloads: DownloadGateway,
    pub gates: SessionGates,
}

impl AppState {
    /// Build the state and create both workspace roots.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let store = EphemeralStore::from_config(&config);
        store.ensure_roots().map_err(|e| {
            GatewayError::Internal(format!("Failed to create workspace roots: {e}"))
        })?;
        Ok(Self {
            intake: ArchiveIntake::new(store.clone(), &config),
            runner: PipelineRunner::from_config(&config),
            downloads: DownloadGateway::new(store.clone()),
            gates: SessionGates::new(),
            store,
            config,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub temp_id: String,
    /// Content root relative to the extracted archive (`.` for the top).
    pub dita_folder: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub temp_id: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub success: bool,
    pub message: String,
    pub excel1: String,
    pub excel2: String,
}

/// Assemble the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(index))
        .route("/static/{file}", get(static_file))
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/upload", post(upload))
        .route("/api/validate", post(run_pipeline))
        .route("/api/download/{temp_id}/{filename}", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind `config.bind_addr` and serve until `shutdown` resolves.
pub async fn serve<F>(config: GatewayConfig, shutdown: F) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
        GatewayError::Internal(format!("Failed to bind {}: {e}", config.bind_addr))
    })?;
    serve_on(listener, config, shutdown).await
}

/// Serve on an already-bound listener, running the retention sweeper for
/// the lifetime of the server.
pub async fn serve_on<F>(
    listener: TcpListener,
    config: GatewayConfig,
    shutdown: F,
) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState::new(config)?);
    let sweeper = RetentionSweeper::from_config(state.store.clone(), &state.config).start();

    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{addr}");
    }
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    info!("Server stopped, shutting down sweeper");
    sweeper.stop().await;
    served.map_err(|e| GatewayError::Internal(format!("Server error: {e}")))
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// Accept a zipped bundle, unpack it, and check its shape.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    let token = SessionToken::generate();
    let mut extracted = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&state, e))? {
        if field.name() != Some("file") {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        let declared = field.file_name().map(str::to_owned);
        extracted = Some(state.intake.ingest(&token, field, declared.as_deref()).await?);
        break;
    }
    let extracted = extracted.ok_or(GatewayError::UploadMissing)?;

    let layout = state.config.layout.clone();
    let tree = extracted.clone();
    let inspected = tokio::task::spawn_blocking(move || {
        let (content_root, _metadata) = find_content_root(&tree, &layout).into_result(&layout)?;
        let verdict = validate(&content_root, &layout).into_result()?;
        Ok::<_, GatewayError>((content_root, verdict))
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("Inspection task panicked: {e}")))?;

    let (content_root, verdict) = match inspected {
        Ok(found) => found,
        Err(e) => {
            // The token is never handed out, so nothing can reach this workspace again.
            if let Err(cleanup) = state.store.discard(&token, Namespace::Intake) {
                warn!("Could not discard rejected upload {}: {}", token, cleanup);
            }
            return Err(e);
        }
    };

    info!("Session {} accepted: {}", token, verdict.message);
    Ok(Json(UploadResponse {
        success: true,
        message: verdict.message,
        temp_id: token.to_string(),
        dita_folder: relative_display(&extracted, &content_root),
    }))
}

/// Run both pipeline stages for an uploaded session.
async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, GatewayError> {
    let Json(request) = body.map_err(|e| GatewayError::BadRequest {
        detail: e.body_text(),
    })?;
    let not_found = || GatewayError::SessionNotFound {
        token: request.temp_id.clone(),
    };
    let token = SessionToken::parse(&request.temp_id).ok_or_else(not_found)?;
    let workspace = state
        .store
        .resolve(&token, Namespace::Intake)
        .ok_or_else(not_found)?;
    let extracted = workspace.join(EXTRACTED_DIR);
    if !extracted.is_dir() {
        return Err(GatewayError::ExtractionMissing {
            token: token.to_string(),
        });
    }

    let guard = state
        .gates
        .try_acquire(&token)
        .ok_or_else(|| GatewayError::SessionBusy {
            token: token.to_string(),
        })?;
    let outcome = pipeline_for(&state, &token, extracted).await;
    drop(guard);
    state.gates.prune_idle();
    outcome?;

    info!("Session {} processed", token);
    Ok(Json(ValidateResponse {
        success: true,
        message: "Validation completed".into(),
        excel1: download_path(&token, EXCEL1),
        excel2: download_path(&token, EXCEL2),
    }))
}

async fn pipeline_for(
    state: &AppState,
    token: &SessionToken,
    extracted: PathBuf,
) -> Result<(), GatewayError> {
    // Restart the intake TTL so the sweeper leaves it alone while we work.
    if let Err(e) = state.store.touch(token, Namespace::Intake) {
        debug!("Could not refresh intake mtime for {}: {}", token, e);
    }

    let layout = state.config.layout.clone();
    let (content_root, metadata) = tokio::task::spawn_blocking(move || {
        find_content_root(&extracted, &layout).into_result(&layout)
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("Discovery task panicked: {e}")))??;

    let result_workspace = state.store.create_result(token)?;
    let run = state
        .runner
        .run(&content_root, &metadata, &result_workspace)
        .await?;
    run.into_result()?;
    Ok(())
}

/// Stream a finished artifact back as an attachment.
async fn download(
    State(state): State<Arc<AppState>>,
    Path((temp_id, filename)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let path = state.downloads.resolve(&temp_id, &filename)?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        // evicted between resolve and open
        std::io::ErrorKind::NotFound => GatewayError::ArtifactNotFound {
            token: temp_id.clone(),
            filename: filename.clone(),
        },
        _ => GatewayError::Internal(format!("Failed to open '{}': {e}", path.display())),
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| GatewayError::Internal(format!("Failed to stat '{}': {e}", path.display())))?
        .len();

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn index(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read_to_string(state.config.static_dir.join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_file(State(state): State<Arc<AppState>>, Path(file): Path<String>) -> Response {
    if !is_plain_filename(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(state.config.static_dir.join(&file)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, static_content_type(&file))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn multipart_error(state: &AppState, e: axum::extract::multipart::MultipartError) -> GatewayError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::UploadTooLarge {
            limit: state.config.max_upload_bytes,
        }
    } else {
        GatewayError::BadRequest {
            detail: e.body_text(),
        }
    }
}

fn download_path(token: &SessionToken, filename: &str) -> String {
    format!("/api/download/{token}/{filename}")
}

fn relative_display(base: &std::path::Path, path: &std::path::Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".into(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.display().to_string(),
    }
}

fn static_content_type(file: &str) -> &'static str {
    match file.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
