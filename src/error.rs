//! Service error taxonomy
//!
//! Every core operation reports one of these variants. Reconstruction
//! probes that fail are absorbed by the registries and surface as the
//! corresponding not-found variant, so callers cannot distinguish
//! "never existed" from "corrupted on disk".

use axum::http::StatusCode;

use crate::pdf::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Merged output missing for job: {0}")]
    OutputMissing(String),
}

impl ServiceError {
    /// Stable machine-readable code for the boundary layer
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Render(_) => "RENDER_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::OutputMissing(_) => "OUTPUT_MISSING",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) | Self::FileNotFound(_) | Self::JobNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OutputMissing(_) => StatusCode::GONE,
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(e) => ServiceError::Io(e),
            other => ServiceError::Render(other.to_string()),
        }
    }
}
