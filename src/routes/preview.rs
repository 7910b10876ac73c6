//! Thumbnail and page-listing endpoints

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::session::FileRecord;
use crate::state::AppState;
use crate::thumbnail::ThumbnailService;

async fn lookup_file(
    state: &AppState,
    session_id: &str,
    file_id: &str,
) -> Result<FileRecord, ServiceError> {
    let record = state
        .sessions()
        .get_file(session_id, file_id)
        .await
        .ok_or_else(|| ServiceError::FileNotFound(file_id.to_string()))?;
    if !record.path.is_file() {
        return Err(ServiceError::FileNotFound(file_id.to_string()));
    }
    Ok(record)
}

fn thumbnail_url(session_id: &str, file_id: &str, page: u32) -> String {
    format!("/api/pdf/{}/{}/thumbnail/{}", session_id, file_id, page)
}

/// GET /api/pdf/:session_id/:file_id/thumbnail/:page
///
/// Serve one page thumbnail, rendering and caching it on first access.
/// Page 0 is malformed input; a page past the end of the document is a
/// resource that does not exist.
pub async fn get_page_thumbnail(
    State(state): State<AppState>,
    Path((session_id, file_id, page)): Path<(String, String, u32)>,
) -> Result<Response, ServiceError> {
    let record = lookup_file(&state, &session_id, &file_id).await?;

    if page < 1 {
        return Err(ServiceError::Validation(
            "page number must be at least 1".to_string(),
        ));
    }
    if page as usize > record.page_count {
        return Err(ServiceError::FileNotFound(format!(
            "page {} does not exist, PDF has {} page(s)",
            page, record.page_count
        )));
    }

    let cache_dir = state.sessions().thumbnail_dir(&session_id, &file_id);
    let thumbnail_path = state
        .thumbnails()
        .get_or_render(&record.path, page, &cache_dir)
        .await?;

    let bytes = tokio::fs::read(&thumbnail_path).await?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CACHE_CONTROL, "max-age=3600")
        .body(Body::from(bytes))
        .map_err(|e| ServiceError::Render(e.to_string()))?;
    Ok(response)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchThumbnailRequest {
    pub pages: Vec<u32>,
    /// Re-render even if a cached entry exists
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchThumbnailEntry {
    pub page_number: u32,
    pub url: String,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchThumbnailError {
    pub page_number: u32,
    pub error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchThumbnailResponse {
    pub file_id: String,
    pub thumbnails: Vec<BatchThumbnailEntry>,
    pub errors: Vec<BatchThumbnailError>,
    pub count: usize,
    pub total_pages: usize,
}

/// POST /api/pdf/:session_id/:file_id/thumbnails
///
/// Render a list of pages in one bounded-concurrency batch. Individual
/// page failures land in `errors`; they never abort the batch.
pub async fn render_thumbnail_batch(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
    Json(request): Json<BatchThumbnailRequest>,
) -> Result<Json<BatchThumbnailResponse>, ServiceError> {
    let record = lookup_file(&state, &session_id, &file_id).await?;

    let cache_dir = state.sessions().thumbnail_dir(&session_id, &file_id);
    let outcomes = state
        .thumbnails()
        .render_batch(&record.path, &request.pages, &cache_dir, request.force)
        .await?;

    let mut thumbnails = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(_) => thumbnails.push(BatchThumbnailEntry {
                page_number: outcome.page,
                url: thumbnail_url(&session_id, &file_id, outcome.page),
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            }),
            Err(e) => errors.push(BatchThumbnailError {
                page_number: outcome.page,
                error: e.to_string(),
            }),
        }
    }

    let count = thumbnails.len();
    Ok(Json(BatchThumbnailResponse {
        file_id,
        thumbnails,
        errors,
        count,
        total_pages: record.page_count,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    50
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListEntry {
    pub page_number: u32,
    pub thumbnail_url: String,
    /// Whether a cached thumbnail already exists for this page
    pub cached: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListResponse {
    pub file_id: String,
    pub total_pages: usize,
    pub page: usize,
    pub per_page: usize,
    pub pages: Vec<PageListEntry>,
}

/// GET /api/pdf/:session_id/:file_id/pages
///
/// Paginated enumeration of a document's pages. Never renders: a file
/// with ten thousand pages costs ten thousand stats at most, not ten
/// thousand rasterizations.
pub async fn list_pages(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
    Query(query): Query<PageListQuery>,
) -> Result<Json<PageListResponse>, ServiceError> {
    if query.page < 1 || query.per_page < 1 {
        return Err(ServiceError::Validation(
            "page and perPage must be at least 1".to_string(),
        ));
    }

    let record = lookup_file(&state, &session_id, &file_id).await?;
    let cache_dir = state.sessions().thumbnail_dir(&session_id, &file_id);

    let start = (query.page - 1) * query.per_page + 1;
    let end = (start + query.per_page - 1).min(record.page_count);

    let mut pages = Vec::new();
    if start <= record.page_count {
        for number in start..=end {
            let number = number as u32;
            let cached =
                ThumbnailService::cache_path(&record.path, number, &cache_dir).is_file();
            pages.push(PageListEntry {
                page_number: number,
                thumbnail_url: thumbnail_url(&session_id, &file_id, number),
                cached,
            });
        }
    }

    Ok(Json(PageListResponse {
        file_id,
        total_pages: record.page_count,
        page: query.page,
        per_page: query.per_page,
        pages,
    }))
}
