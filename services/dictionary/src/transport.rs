use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dictstore::{DictionaryStore, StoreError, persist_snapshot};
use protocol::{DictionaryUpload, GLOBAL_DICTIONARY_PATH, GlobalDictionary, UPLOAD_PATH};
use tracing::{info, warn};

const MAX_HTTP_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    store: Arc<DictionaryStore>,
    snapshot_path: PathBuf,
}

impl AppState {
    pub fn new(store: Arc<DictionaryStore>, snapshot_path: PathBuf) -> Self {
        Self {
            store,
            snapshot_path,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(UPLOAD_PATH, post(handle_upload))
        .route(GLOBAL_DICTIONARY_PATH, get(handle_get_global_dictionary))
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

pub async fn serve(state: AppState, bind_addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("dictionary service listening on http://{bind_addr}");
    serve_on(state, listener).await
}

/// Serves on an already-bound listener; tests use this with port 0.
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

async fn handle_upload(State(state): State<AppState>, body: String) -> Response {
    let upload: DictionaryUpload = match serde_json::from_str(&body) {
        Ok(upload) => upload,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("upload body is not valid dictionary JSON: {err}"),
            );
        }
    };
    let store = Arc::clone(&state.store);
    let merged = tokio::task::spawn_blocking(move || store.merge(&upload)).await;
    match merged {
        Ok(Ok(snapshot)) => snapshot_response(&state, snapshot),
        Ok(Err(err)) => {
            let (status, message) = map_store_error(&err);
            error_response(status, &message)
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dictionary merge task failed",
        ),
    }
}

async fn handle_get_global_dictionary(State(state): State<AppState>) -> Response {
    let store = Arc::clone(&state.store);
    let read = tokio::task::spawn_blocking(move || store.snapshot()).await;
    match read {
        Ok(Ok(snapshot)) => snapshot_response(&state, snapshot),
        Ok(Err(err)) => {
            let (status, message) = map_store_error(&err);
            error_response(status, &message)
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dictionary snapshot task failed",
        ),
    }
}

// Persist-then-respond: the side file and the response body carry the same
// total mapping, so workers and operators read identical state.
fn snapshot_response(state: &AppState, snapshot: GlobalDictionary) -> Response {
    if let Err(err) = persist_snapshot(&state.snapshot_path, &snapshot) {
        warn!("dictionary snapshot persistence failed: {err}");
    }
    match serde_json::to_string(&snapshot) {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed rendering snapshot: {err}"),
        ),
    }
}

fn map_store_error(err: &StoreError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    warn!(status = status.as_u16(), "dictionary request failed: {message}");
    (status, message.to_string()).into_response()
}
