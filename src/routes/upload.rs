//! Upload and file management endpoints

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::error::ServiceError;
use crate::pdf::PageGeometry;
use crate::session::FileRecord;
use crate::state::AppState;
use crate::util;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub original_filename: String,
    pub page_count: usize,
    pub file_size: u64,
    pub file_size_formatted: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub session_id: String,
    pub uploaded_files: Vec<UploadedFile>,
    pub errors: Vec<String>,
    pub success_count: usize,
    pub error_count: usize,
}

/// POST /api/upload
///
/// Multipart upload of one or more PDFs. An optional `session_id` field
/// targets an existing session; otherwise a new one is created. Each
/// file is validated independently: one bad file never fails the batch.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ServiceError> {
    let mut session_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::Validation(format!("bad session_id field: {}", e)))?;
                if !value.is_empty() {
                    session_id = Some(value);
                }
            }
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::Validation(format!("failed to read file data: {}", e)))?;
                files.push((filename, data.to_vec()));
            }
            _ => {}
        }
    }

    if files.is_empty() || files.iter().all(|(name, _)| name.is_empty()) {
        return Err(ServiceError::Validation("no files provided".to_string()));
    }

    let limits = state.config().limits.clone();
    if files.len() > limits.max_files_per_request {
        return Err(ServiceError::Validation(format!(
            "too many files, maximum {} allowed",
            limits.max_files_per_request
        )));
    }

    let session_id = session_id.unwrap_or_else(util::generate_session_id);
    let session_dir = state.sessions().create_session(&session_id).await?;

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    for (original_filename, data) in files {
        if !original_filename.to_ascii_lowercase().ends_with(".pdf") {
            errors.push(format!("{}: Invalid file type", original_filename));
            continue;
        }
        if data.is_empty() {
            errors.push(format!("{}: File is empty", original_filename));
            continue;
        }
        if data.len() as u64 > limits.max_file_size {
            errors.push(format!(
                "{}: File size exceeds maximum of {}",
                original_filename,
                util::format_file_size(limits.max_file_size)
            ));
            continue;
        }
        if !data.starts_with(b"%PDF") {
            errors.push(format!(
                "{}: File does not appear to be a valid PDF",
                original_filename
            ));
            continue;
        }

        let file_id = util::generate_file_id();
        let filename = util::ensure_pdf_extension(&util::sanitize_filename(&original_filename));
        let path = session_dir.join(format!("{}_{}", file_id, filename));
        let file_size = data.len() as u64;

        if let Err(e) = tokio::fs::write(&path, &data).await {
            tracing::error!(file = %original_filename, error = %e, "Failed to store upload");
            errors.push(format!("{}: storage error", original_filename));
            continue;
        }

        // Structural validation happens after the write; a corrupt file
        // is unlinked before it can enter the index
        if let Err(e) = state.engine().validate(&path).await {
            let _ = tokio::fs::remove_file(&path).await;
            errors.push(format!("{}: {}", original_filename, e));
            continue;
        }
        let page_count = match state.engine().page_count(&path).await {
            Ok(count) => count,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                errors.push(format!("{}: {}", original_filename, e));
                continue;
            }
        };

        state
            .sessions()
            .add_file(FileRecord {
                file_id: file_id.clone(),
                session_id: session_id.clone(),
                path,
                filename: filename.clone(),
                original_filename: original_filename.clone(),
                page_count,
                file_size,
                added_at: Utc::now(),
            })
            .await;

        tracing::info!(
            session_id = %session_id,
            file_id = %file_id,
            filename = %original_filename,
            page_count = page_count,
            "Uploaded file"
        );

        uploaded.push(UploadedFile {
            file_id,
            filename,
            original_filename,
            page_count,
            file_size,
            file_size_formatted: util::format_file_size(file_size),
        });
    }

    let status = if uploaded.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    let response = UploadResponse {
        session_id,
        success_count: uploaded.len(),
        error_count: errors.len(),
        uploaded_files: uploaded,
        errors,
    };
    Ok((status, Json(response)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListEntry {
    pub file_id: String,
    pub filename: String,
    pub original_filename: String,
    pub page_count: usize,
    pub file_size: u64,
    pub file_size_formatted: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    pub session_id: String,
    pub files: Vec<FileListEntry>,
    pub count: usize,
}

/// GET /api/session/:session_id/files
pub async fn list_session_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<FileListResponse> {
    let files = state.sessions().list_files(&session_id).await;

    let mut entries: Vec<FileListEntry> = files
        .into_values()
        .map(|record| FileListEntry {
            file_id: record.file_id,
            filename: record.filename,
            original_filename: record.original_filename,
            page_count: record.page_count,
            file_size: record.file_size,
            file_size_formatted: util::format_file_size(record.file_size),
        })
        .collect();
    entries.sort_by(|a, b| a.file_id.cmp(&b.file_id));

    let count = entries.len();
    Json(FileListResponse {
        session_id,
        files: entries,
        count,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub message: String,
    pub file_id: String,
}

/// DELETE /api/session/:session_id/file/:file_id
pub async fn delete_file(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
) -> Result<Json<DeleteFileResponse>, ServiceError> {
    if !state.sessions().delete_file(&session_id, &file_id).await {
        return Err(ServiceError::FileNotFound(file_id));
    }
    Ok(Json(DeleteFileResponse {
        message: "File deleted successfully".to_string(),
        file_id,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadataResponse {
    pub file_id: String,
    pub filename: String,
    pub page_count: usize,
    pub file_size: u64,
    pub pages: Vec<PageGeometry>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
}

/// GET /api/pdf/:session_id/:file_id/metadata
pub async fn get_pdf_metadata(
    State(state): State<AppState>,
    Path((session_id, file_id)): Path<(String, String)>,
) -> Result<Json<PdfMetadataResponse>, ServiceError> {
    let record = state
        .sessions()
        .get_file(&session_id, &file_id)
        .await
        .ok_or_else(|| ServiceError::FileNotFound(file_id.clone()))?;

    if !record.path.is_file() {
        return Err(ServiceError::FileNotFound(file_id));
    }

    let meta = state.engine().document_meta(&record.path).await?;

    Ok(Json(PdfMetadataResponse {
        file_id,
        filename: record.filename,
        page_count: meta.page_count,
        file_size: record.file_size,
        pages: meta.pages,
        title: meta.title,
        author: meta.author,
        subject: meta.subject,
    }))
}
