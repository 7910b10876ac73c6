//! Session registry types

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One stored PDF inside a session.
///
/// `path` always follows `{file_id}_{filename}` inside the session's
/// upload directory. That convention is load-bearing: it is the only
/// thing that lets the registry rebuild this record from disk.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_id: String,
    pub session_id: String,
    pub path: PathBuf,
    /// Sanitized on-disk filename
    pub filename: String,
    /// Name the client originally supplied
    pub original_filename: String,
    pub page_count: usize,
    pub file_size: u64,
    pub added_at: DateTime<Utc>,
}

/// In-memory record for one session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub created_at: DateTime<Utc>,
    pub files: HashMap<String, FileRecord>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            files: HashMap::new(),
        }
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Session summary for the admin surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub files: Vec<SessionFileInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFileInfo {
    pub file_id: String,
    pub filename: String,
    pub page_count: usize,
    pub file_size: u64,
}
