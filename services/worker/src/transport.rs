use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_DISPOSITION, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use codec::strip_source_labels;
use protocol::{
    COMPRESS_PATH, DECOMPRESS_PATH, HEADER_FILENAME, HEADER_SEQUENCE, RECEIVE_CHUNK_PATH,
    SEARCH_PATH,
};
use tracing::{info, warn};

use crate::bundle::bundle_directory;
use crate::compress::CompressContext;
use crate::shard::ShardState;

const MAX_HTTP_BODY_BYTES: usize = 64 * 1024 * 1024;

pub struct WorkerRuntime {
    shard: ShardState,
    compress: CompressContext,
    reconstruction_dir: PathBuf,
    label: String,
}

pub type SharedRuntime = Arc<WorkerRuntime>;

impl WorkerRuntime {
    pub fn new(
        shard: ShardState,
        compress: CompressContext,
        reconstruction_dir: PathBuf,
        label: String,
    ) -> Self {
        Self {
            shard,
            compress,
            reconstruction_dir,
            label,
        }
    }

    pub fn shard(&self) -> &ShardState {
        &self.shard
    }
}

pub fn build_router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route(RECEIVE_CHUNK_PATH, post(handle_receive_chunk))
        .route(COMPRESS_PATH, get(handle_compress))
        .route(DECOMPRESS_PATH, get(handle_decompress))
        .route(SEARCH_PATH, post(handle_search))
        .route("/health", get(|| async { "{\"status\":\"ok\"}" }))
        .with_state(runtime)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

pub async fn serve(runtime: SharedRuntime, bind_addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("worker listening on http://{bind_addr}");
    serve_on(runtime, listener).await
}

/// Serves on an already-bound listener; tests use this with port 0.
pub async fn serve_on(
    runtime: SharedRuntime,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(runtime)).await
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

async fn handle_receive_chunk(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sequence = match required_header(&headers, HEADER_SEQUENCE) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let original_filename = match required_header(&headers, HEADER_FILENAME) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let sequence: u64 = match sequence.parse() {
        Ok(sequence) => sequence,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("header '{HEADER_SEQUENCE}' must be a non-negative integer"),
            );
        }
    };

    match runtime
        .shard
        .write_chunk(&original_filename, sequence, &body)
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed persisting chunk {sequence}: {err}"),
        ),
    }
}

async fn handle_compress(State(runtime): State<SharedRuntime>) -> Response {
    match runtime.compress.run_cycle(&runtime.shard).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            &err.to_string(),
        ),
    }
}

async fn handle_decompress(State(runtime): State<SharedRuntime>) -> Response {
    let codec = runtime.compress.codec().clone();
    let out_dir = runtime.reconstruction_dir.clone();
    let bundled = tokio::task::spawn_blocking(move || {
        codec.decompress(&out_dir).map_err(|err| err.to_string())?;
        let bundle = bundle_directory(&out_dir).map_err(|err| err.to_string());
        // The reconstruction directory is transient either way.
        std::fs::remove_dir_all(&out_dir).ok();
        bundle
    })
    .await;

    match bundled {
        Ok(Ok(bytes)) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "application/zip".to_string()),
                (
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.zip\"", runtime.label),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(message)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "decompress task was cancelled",
        ),
    }
}

async fn handle_search(State(runtime): State<SharedRuntime>, query: String) -> Response {
    let codec = runtime.compress.codec().clone();
    let searched = tokio::task::spawn_blocking(move || codec.search(&query)).await;
    match searched {
        Ok(Ok(raw)) => (StatusCode::OK, strip_source_labels(&raw)).into_response(),
        Ok(Err(err)) => {
            let message = err
                .diagnostic()
                .map(|d| d.to_string())
                .unwrap_or_else(|| err.to_string());
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "search task was cancelled"),
    }
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, Response> {
    let value = headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if value.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("missing required header '{name}'"),
        ));
    }
    Ok(value.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    warn!(status = status.as_u16(), "worker request failed: {message}");
    (status, message.to_string()).into_response()
}
