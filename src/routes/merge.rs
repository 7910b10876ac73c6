//! Merge, job status and download endpoints

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::merge::{JobStatus, PageSelection};
use crate::pdf::{DocMetadata, MergeOptions};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeApiRequest {
    pub session_id: String,
    pub selections: Vec<PageSelection>,
    #[serde(default = "default_output_filename")]
    pub output_filename: String,
    #[serde(default)]
    pub add_page_numbers: bool,
    #[serde(default)]
    pub watermark_text: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

fn default_output_filename() -> String {
    "merged.pdf".to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub output_filename: String,
    pub total_pages: usize,
    pub download_url: String,
}

/// POST /api/merge
///
/// Merge selected pages across the session's files, strictly in
/// declaration order. The merge runs synchronously; the response
/// carries a terminal status.
pub async fn merge_pdfs(
    State(state): State<AppState>,
    Json(request): Json<MergeApiRequest>,
) -> Result<Json<MergeResponse>, ServiceError> {
    let options = MergeOptions {
        watermark_text: request.watermark_text,
        add_page_numbers: request.add_page_numbers,
        password: request.password,
        metadata: DocMetadata {
            title: request.title,
            author: request.author,
            subject: request.subject,
        },
    };

    let record = state
        .jobs()
        .create_job(
            &request.session_id,
            &request.selections,
            &request.output_filename,
            &options,
        )
        .await?;

    Ok(Json(MergeResponse {
        download_url: format!("/api/download/{}", record.job_id),
        job_id: record.job_id,
        status: record.status,
        output_filename: record.output_filename,
        total_pages: record.total_pages,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub output_filename: String,
    pub total_pages: usize,
    pub download_url: String,
}

/// GET /api/job/:job_id/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServiceError> {
    let record = state
        .jobs()
        .get_job(&job_id)
        .await
        .ok_or_else(|| ServiceError::JobNotFound(job_id.clone()))?;

    Ok(Json(JobStatusResponse {
        download_url: format!("/api/download/{}", record.job_id),
        job_id: record.job_id,
        status: record.status,
        output_filename: record.output_filename,
        total_pages: record.total_pages,
    }))
}

/// GET /api/download/:job_id
///
/// Stream the merged artifact. Resolution falls back to the filesystem
/// for jobs created before the last restart.
pub async fn download_merged(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ServiceError> {
    let (record, bytes) = state.jobs().open_download(&job_id).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", record.output_filename),
        )
        .body(Body::from(bytes))
        .map_err(|e| ServiceError::Render(e.to_string()))?;
    Ok(response)
}
