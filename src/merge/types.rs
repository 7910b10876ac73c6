//! Merge job types

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file plus the ordered pages to take from it.
///
/// The atomic unit of a merge request: pages are emitted exactly in
/// this order, duplicates included.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSelection {
    pub file_id: String,
    /// 1-indexed page numbers
    pub pages: Vec<u32>,
}

/// Terminal job states. Merges run synchronously inside the request,
/// so no in-between state is ever observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// One merge job. Reconstructible from the artifact filename for
/// completed jobs; failed jobs leave no artifact and live in memory
/// only.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub session_id: String,
    pub output_path: PathBuf,
    pub output_filename: String,
    pub status: JobStatus,
    pub total_pages: usize,
    pub created_at: DateTime<Utc>,
}
