pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use pdf_chat_core::{ChatOrchestrator, DocumentIndexer};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use auth::{ApiKey, API_KEY_HEADER};
pub use error::{ApiError, ErrorResponse};
pub use rate_limit::{RateLimits, RouteRateLimiter};

/// Slack on top of the file size for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub dir: PathBuf,
    pub max_file_size: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<DocumentIndexer>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub limits: Arc<RateLimits>,
    pub api_key: Arc<str>,
    pub uploads: Arc<UploadSettings>,
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.uploads.max_file_size.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(handlers::root))
        .route(
            "/ingest",
            post(handlers::ingest).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/chat", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/session/:session_id", delete(handlers::delete_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
