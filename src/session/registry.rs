//! Session registry
//!
//! Dual-layer index: an in-memory map for O(1) lookups, backed by the
//! content store's filename conventions. Every miss falls back to a
//! directory scan, and every successful scan repopulates memory, so
//! callers behave identically whether the process just started or has
//! been running for days.
//!
//! Probe failures (unreadable PDF, malformed name) are absorbed: the
//! entry is reported absent. The internal probe keeps the failure
//! distinct in its Result so that policy lives in exactly one place.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::config::StorageConfig;
use crate::pdf::{EngineError, PdfEngine};

use super::types::{FileRecord, SessionFileInfo, SessionInfo, SessionRecord};

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    upload_root: PathBuf,
    thumbnail_root: PathBuf,
    merged_root: PathBuf,
    engine: Arc<dyn PdfEngine>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new(storage: &StorageConfig, engine: Arc<dyn PdfEngine>) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                upload_root: storage.upload_root.clone(),
                thumbnail_root: storage.thumbnail_root.clone(),
                merged_root: storage.merged_root.clone(),
                engine,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    // ========================================================================
    // Paths
    // ========================================================================

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.inner.upload_root.join(session_id)
    }

    pub fn thumbnail_dir(&self, session_id: &str, file_id: &str) -> PathBuf {
        self.inner.thumbnail_root.join(session_id).join(file_id)
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create the session directory and its in-memory record
    pub async fn create_session(&self, session_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut sessions = self.inner.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);

        tracing::info!(session_id = %session_id, "Created session");
        Ok(dir)
    }

    /// A session exists if it has an in-memory record or a directory on disk
    pub async fn session_exists(&self, session_id: &str) -> bool {
        {
            let sessions = self.inner.sessions.read().await;
            if sessions.contains_key(session_id) {
                return true;
            }
        }
        self.session_dir(session_id).is_dir()
    }

    // ========================================================================
    // File Index
    // ========================================================================

    /// Index an uploaded file. Creates the session record on the fly if
    /// the caller uploaded into a session this process has never seen.
    pub async fn add_file(&self, record: FileRecord) {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| {
                tracing::warn!(session_id = %record.session_id, "Session not in memory, creating record");
                SessionRecord::new()
            });

        tracing::debug!(
            session_id = %record.session_id,
            file_id = %record.file_id,
            filename = %record.filename,
            "Indexed file"
        );
        session.files.insert(record.file_id.clone(), record);
    }

    /// Look up one file, falling back to filesystem reconstruction.
    pub async fn get_file(&self, session_id: &str, file_id: &str) -> Option<FileRecord> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(session) = sessions.get(session_id) {
                if let Some(record) = session.files.get(file_id) {
                    return Some(record.clone());
                }
            }
        }
        self.restore_file(session_id, file_id).await
    }

    /// List all files in a session, reconstructing from disk when the
    /// in-memory index has nothing for it.
    pub async fn list_files(&self, session_id: &str) -> HashMap<String, FileRecord> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(session) = sessions.get(session_id) {
                if !session.files.is_empty() {
                    return session.files.clone();
                }
            }
        }
        self.restore_session_files(session_id).await
    }

    /// Delete one file: backing bytes first, then the index entry.
    /// If the unlink fails the index entry stays, so index and disk
    /// never disagree.
    pub async fn delete_file(&self, session_id: &str, file_id: &str) -> bool {
        let Some(record) = self.get_file(session_id, file_id).await else {
            return false;
        };

        match tokio::fs::remove_file(&record.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    file_id = %file_id,
                    error = %e,
                    "Failed to unlink file, keeping index entry"
                );
                return false;
            }
        }

        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.files.remove(file_id);
        }

        tracing::info!(session_id = %session_id, file_id = %file_id, "Deleted file");
        true
    }

    /// Drop a session: index entry plus its directories under all three
    /// content store roots. Returns false when nothing existed.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let had_record = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(session_id).is_some()
        };

        let mut had_dirs = false;
        for root in [
            &self.inner.upload_root,
            &self.inner.thumbnail_root,
            &self.inner.merged_root,
        ] {
            let dir = root.join(session_id);
            if dir.is_dir() {
                had_dirs = true;
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    tracing::error!(session_id = %session_id, dir = %dir.display(), error = %e, "Failed to remove session directory");
                }
            }
        }

        if had_record || had_dirs {
            tracing::info!(session_id = %session_id, "Deleted session");
        }
        had_record || had_dirs
    }

    /// Session summary; reconstructs the file index first if needed.
    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        if !self.session_exists(session_id).await {
            return None;
        }
        // Populates memory for sessions only present on disk
        let _ = self.list_files(session_id).await;

        let sessions = self.inner.sessions.read().await;
        let Some(session) = sessions.get(session_id) else {
            // Directory exists but holds no files yet
            return Some(SessionInfo {
                session_id: session_id.to_string(),
                created_at: dir_mtime(&self.session_dir(session_id)).unwrap_or_else(Utc::now),
                file_count: 0,
                files: Vec::new(),
            });
        };
        let mut files: Vec<SessionFileInfo> = session
            .files
            .values()
            .map(|record| SessionFileInfo {
                file_id: record.file_id.clone(),
                filename: record.filename.clone(),
                page_count: record.page_count,
                file_size: record.file_size,
            })
            .collect();
        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));

        Some(SessionInfo {
            session_id: session_id.to_string(),
            created_at: session.created_at,
            file_count: files.len(),
            files,
        })
    }

    // ========================================================================
    // Garbage Collection
    // ========================================================================

    /// Sweep expired sessions. Two passes: tracked sessions by creation
    /// time, then orphaned directories (left by a previous process) by
    /// modification time across all three roots. Returns the ids that
    /// were removed; a second sweep right after is a no-op.
    pub async fn sweep_expired(&self, max_age: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        let mut removed: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let expired: Vec<String> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, record)| record.created_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for session_id in expired {
            if self.delete_session(&session_id).await && seen.insert(session_id.clone()) {
                removed.push(session_id);
            }
        }

        for root in [
            &self.inner.upload_root,
            &self.inner.thumbnail_root,
            &self.inner.merged_root,
        ] {
            match std::fs::read_dir(root) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if !path.is_dir() {
                            continue;
                        }
                        let Some(modified) = dir_mtime(&path) else {
                            continue;
                        };
                        if modified < cutoff {
                            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                                tracing::error!(dir = %path.display(), error = %e, "Failed to remove expired directory");
                                continue;
                            }
                            let session_id =
                                entry.file_name().to_string_lossy().to_string();
                            tracing::info!(session_id = %session_id, dir = %path.display(), "Removed expired directory");
                            if seen.insert(session_id.clone()) {
                                removed.push(session_id);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(root = %root.display(), error = %e, "Failed to scan root for expired sessions");
                }
            }
        }

        // Drop in-memory records for sessions whose directories just went away
        {
            let mut sessions = self.inner.sessions.write().await;
            for session_id in &removed {
                sessions.remove(session_id);
            }
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept expired sessions");
        }
        removed
    }

    // ========================================================================
    // Reconstruction
    // ========================================================================

    /// Rebuild one file record from the `{file_id}_*` naming convention.
    async fn restore_file(&self, session_id: &str, file_id: &str) -> Option<FileRecord> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return None;
        }

        let prefix = format!("{}_", file_id);
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if !path.is_file() || !name.starts_with(&prefix) || !has_pdf_extension(&path) {
                continue;
            }

            let filename = name[prefix.len()..].to_string();
            match self.probe(session_id, file_id, &path, &filename).await {
                Ok(record) => {
                    self.remember(record.clone()).await;
                    tracing::info!(
                        session_id = %session_id,
                        file_id = %file_id,
                        "Restored file from filesystem"
                    );
                    return Some(record);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        file_id = %file_id,
                        error = %e,
                        "Could not restore file from filesystem"
                    );
                    continue;
                }
            }
        }
        None
    }

    /// Rebuild every file record in a session directory, skipping
    /// entries that fail to parse without aborting the scan.
    async fn restore_session_files(&self, session_id: &str) -> HashMap<String, FileRecord> {
        let dir = self.session_dir(session_id);
        let mut restored = HashMap::new();
        if !dir.is_dir() {
            return restored;
        }

        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return restored;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() || !has_pdf_extension(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Format is "{file_id}_{filename}"; anything else is not ours
            let Some((file_id, rest)) = stem.split_once('_') else {
                continue;
            };
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("pdf");
            let filename = format!("{}.{}", rest, extension);

            match self.probe(session_id, file_id, &path, &filename).await {
                Ok(record) => {
                    restored.insert(file_id.to_string(), record);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        file = %path.display(),
                        error = %e,
                        "Could not restore file, skipping"
                    );
                }
            }
        }

        if !restored.is_empty() {
            let mut sessions = self.inner.sessions.write().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(SessionRecord::new);
            for (file_id, record) in &restored {
                session.files.insert(file_id.clone(), record.clone());
            }
            tracing::info!(
                session_id = %session_id,
                count = restored.len(),
                "Restored files from filesystem"
            );
        }
        restored
    }

    /// Probe a stored file: page count via the rendering gateway,
    /// size and timestamp via stat. The Err side is intentionally kept
    /// distinct here; public lookups collapse it to absence.
    async fn probe(
        &self,
        session_id: &str,
        file_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<FileRecord, EngineError> {
        let page_count = self.inner.engine.page_count(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let added_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(FileRecord {
            file_id: file_id.to_string(),
            session_id: session_id.to_string(),
            path: path.to_path_buf(),
            filename: filename.to_string(),
            original_filename: filename.to_string(),
            page_count,
            file_size: metadata.len(),
            added_at,
        })
    }

    async fn remember(&self, record: FileRecord) {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions
            .entry(record.session_id.clone())
            .or_insert_with(SessionRecord::new);
        session.files.insert(record.file_id.clone(), record);
    }
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn dir_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

// ============================================================================
// Tests
// ============================================================================
