//! HTTP routes
//!
//! Thin marshaling over the core registries. All endpoints live under
//! `/api`:
//! - POST   /api/upload                                  - upload PDFs into a session
//! - GET    /api/session/:session_id/files               - list session files
//! - DELETE /api/session/:session_id/file/:file_id       - delete one file
//! - DELETE /api/session/:session_id                     - delete a session
//! - GET    /api/session/:session_id                     - session summary
//! - GET    /api/pdf/:session_id/:file_id/metadata       - document metadata
//! - GET    /api/pdf/:session_id/:file_id/thumbnail/:page - one thumbnail (JPEG)
//! - POST   /api/pdf/:session_id/:file_id/thumbnails     - batch thumbnail render
//! - GET    /api/pdf/:session_id/:file_id/pages          - paginated page listing
//! - POST   /api/merge                                   - merge selected pages
//! - GET    /api/job/:job_id/status                      - merge job status
//! - GET    /api/download/:job_id                        - download merged output
//! - GET    /api/health                                  - health and storage stats
//! - GET    /api/metrics                                 - request/render metrics

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ServiceError;
use crate::state::AppState;

pub mod merge;
pub mod preview;
pub mod system;
pub mod upload;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        });
        (status, body).into_response()
    }
}

/// Assemble the API router
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload::upload_files))
        .route("/session/:session_id/files", get(upload::list_session_files))
        .route(
            "/session/:session_id/file/:file_id",
            delete(upload::delete_file),
        )
        .route(
            "/session/:session_id",
            get(system::session_info).delete(system::delete_session),
        )
        .route(
            "/pdf/:session_id/:file_id/metadata",
            get(upload::get_pdf_metadata),
        )
        .route(
            "/pdf/:session_id/:file_id/thumbnail/:page",
            get(preview::get_page_thumbnail),
        )
        .route(
            "/pdf/:session_id/:file_id/thumbnails",
            post(preview::render_thumbnail_batch),
        )
        .route("/pdf/:session_id/:file_id/pages", get(preview::list_pages))
        .route("/merge", post(merge::merge_pdfs))
        .route("/job/:job_id/status", get(merge::get_job_status))
        .route("/download/:job_id", get(merge::download_merged))
        .route("/health", get(system::health_check))
        .route("/metrics", get(system::get_metrics))
}

/// Record request latency into the metrics collector
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics().record_request(started.elapsed());
    response
}

// ============================================================================
// Tests
// ============================================================================
