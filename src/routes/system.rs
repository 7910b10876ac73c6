//! Health, metrics and session administration endpoints

use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::error::ServiceError;
use crate::metrics::MetricsSnapshot;
use crate::session::SessionInfo;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub uploads_mb: f64,
    pub thumbnails_mb: f64,
    pub merged_mb: f64,
    pub total_mb: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub storage: StorageStats,
    pub metrics: MetricsSnapshot,
}

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = state.config().storage.clone();
    let (uploads, thumbnails, merged) = tokio::task::spawn_blocking(move || {
        (
            folder_size(&storage.upload_root),
            folder_size(&storage.thumbnail_root),
            folder_size(&storage.merged_root),
        )
    })
    .await
    .unwrap_or((0, 0, 0));

    let to_mb = |bytes: u64| (bytes as f64) / (1024.0 * 1024.0);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        storage: StorageStats {
            uploads_mb: to_mb(uploads),
            thumbnails_mb: to_mb(thumbnails),
            merged_mb: to_mb(merged),
            total_mb: to_mb(uploads + thumbnails + merged),
        },
        metrics: state.metrics().snapshot(),
    })
}

/// GET /api/metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics().snapshot())
}

/// GET /api/session/:session_id
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ServiceError> {
    state
        .sessions()
        .session_info(&session_id)
        .await
        .map(Json)
        .ok_or(ServiceError::SessionNotFound(session_id))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionResponse {
    pub message: String,
    pub session_id: String,
}

/// DELETE /api/session/:session_id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, ServiceError> {
    // Drop job records first; their artifacts go with the directories
    state
        .jobs()
        .forget_sessions(std::slice::from_ref(&session_id))
        .await;

    if !state.sessions().delete_session(&session_id).await {
        return Err(ServiceError::SessionNotFound(session_id));
    }
    Ok(Json(DeleteSessionResponse {
        message: "Session cleaned up successfully".to_string(),
        session_id,
    }))
}

fn folder_size(root: &FsPath) -> u64 {
    let mut total = 0;
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(metadata) = entry.metadata() {
                total += metadata.len();
            }
        }
    }
    total
}
