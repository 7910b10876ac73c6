//! Merge job registry

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::ServiceError;
use crate::pdf::{MergeOptions, MergeSource, PdfEngine};
use crate::session::SessionRegistry;
use crate::util;

use super::types::{JobRecord, JobStatus, PageSelection};

#[derive(Clone)]
pub struct MergeJobRegistry {
    inner: Arc<MergeJobRegistryInner>,
}

struct MergeJobRegistryInner {
    merged_root: PathBuf,
    engine: Arc<dyn PdfEngine>,
    sessions: SessionRegistry,
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl MergeJobRegistry {
    pub fn new(
        merged_root: PathBuf,
        engine: Arc<dyn PdfEngine>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(MergeJobRegistryInner {
                merged_root,
                engine,
                sessions,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    // ========================================================================
    // Job Creation
    // ========================================================================

    /// Validate the selections, run the merge synchronously, publish
    /// the artifact, and index the job. Validation failures abort
    /// before any byte is written; a failing merge leaves no partial
    /// output on disk.
    pub async fn create_job(
        &self,
        session_id: &str,
        selections: &[PageSelection],
        output_filename: &str,
        options: &MergeOptions,
    ) -> Result<JobRecord, ServiceError> {
        let (sources, total_pages) = self.resolve_selections(session_id, selections).await?;

        let job_id = util::generate_job_id();
        let output_filename =
            util::ensure_pdf_extension(&util::sanitize_filename(output_filename));

        let output_dir = self.inner.merged_root.join(session_id);
        tokio::fs::create_dir_all(&output_dir).await?;
        let output_path = output_dir.join(format!("{}_{}", job_id, output_filename));

        let bytes = match self.inner.engine.merge(&sources, options).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    job_id = %job_id,
                    error = %e,
                    "Merge failed"
                );
                let record = JobRecord {
                    job_id: job_id.clone(),
                    session_id: session_id.to_string(),
                    output_path,
                    output_filename,
                    status: JobStatus::Failed,
                    total_pages: 0,
                    created_at: Utc::now(),
                };
                self.inner
                    .jobs
                    .write()
                    .await
                    .insert(job_id, record);
                return Err(e.into());
            }
        };

        // Publish atomically so a concurrent download can never observe
        // a half-written artifact
        let tmp_path = output_path.with_extension("pdf.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &output_path).await?;

        let record = JobRecord {
            job_id: job_id.clone(),
            session_id: session_id.to_string(),
            output_path,
            output_filename,
            status: JobStatus::Completed,
            total_pages,
            created_at: Utc::now(),
        };

        {
            let mut jobs = self.inner.jobs.write().await;
            jobs.insert(job_id.clone(), record.clone());
        }

        tracing::info!(
            session_id = %session_id,
            job_id = %job_id,
            total_pages = total_pages,
            output = %record.output_path.display(),
            "Merge completed"
        );
        Ok(record)
    }

    /// Resolve selections against the session registry and validate
    /// every page number before any work happens.
    async fn resolve_selections(
        &self,
        session_id: &str,
        selections: &[PageSelection],
    ) -> Result<(Vec<MergeSource>, usize), ServiceError> {
        if selections.is_empty() {
            return Err(ServiceError::Validation(
                "at least one file must be selected".to_string(),
            ));
        }

        let mut sources = Vec::with_capacity(selections.len());
        let mut total_pages = 0;

        for selection in selections {
            let record = self
                .inner
                .sessions
                .get_file(session_id, &selection.file_id)
                .await
                .ok_or_else(|| ServiceError::FileNotFound(selection.file_id.clone()))?;

            if !record.path.is_file() {
                return Err(ServiceError::FileNotFound(selection.file_id.clone()));
            }

            if selection.pages.is_empty() {
                return Err(ServiceError::Validation(format!(
                    "no pages selected for {}",
                    selection.file_id
                )));
            }
            for &page in &selection.pages {
                if page == 0 || page as usize > record.page_count {
                    return Err(ServiceError::Validation(format!(
                        "page {} out of range (1-{}) for {}",
                        page, record.page_count, selection.file_id
                    )));
                }
            }

            total_pages += selection.pages.len();
            sources.push(MergeSource {
                path: record.path.clone(),
                pages: selection.pages.clone(),
            });
        }

        Ok((sources, total_pages))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Look up a job, reconstructing the record from the merged-output
    /// root on a miss.
    pub async fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        {
            let jobs = self.inner.jobs.read().await;
            if let Some(record) = jobs.get(job_id) {
                return Some(record.clone());
            }
        }
        self.restore_job(job_id).await
    }

    /// Artifact path for a job, if the job is known
    pub async fn output_path(&self, job_id: &str) -> Option<PathBuf> {
        self.get_job(job_id).await.map(|record| record.output_path)
    }

    /// Resolve a job to its artifact bytes for download.
    ///
    /// An unknown id is `JobNotFound`; a known job whose artifact has
    /// vanished is `OutputMissing`, so callers can tell the difference.
    pub async fn open_download(&self, job_id: &str) -> Result<(JobRecord, Vec<u8>), ServiceError> {
        let record = self
            .get_job(job_id)
            .await
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        if record.status != JobStatus::Completed {
            return Err(ServiceError::OutputMissing(job_id.to_string()));
        }

        match tokio::fs::read(&record.output_path).await {
            Ok(bytes) => Ok((record, bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::OutputMissing(job_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop in-memory job records belonging to swept sessions. Their
    /// artifacts are removed with the session directories.
    pub async fn forget_sessions(&self, session_ids: &[String]) -> usize {
        if session_ids.is_empty() {
            return 0;
        }
        let mut jobs = self.inner.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| !session_ids.contains(&record.session_id));
        before - jobs.len()
    }

    // ========================================================================
    // Reconstruction
    // ========================================================================

    /// Rebuild a job record by scanning every session subdirectory of
    /// the merged root for `{job_id}_*`. Page count is best-effort: a
    /// probe failure degrades to zero rather than failing the lookup.
    async fn restore_job(&self, job_id: &str) -> Option<JobRecord> {
        let root = &self.inner.merged_root;
        let prefix = format!("{}_", job_id);

        let mut roots = tokio::fs::read_dir(root).await.ok()?;
        while let Ok(Some(session_entry)) = roots.next_entry().await {
            let session_dir = session_entry.path();
            if !session_dir.is_dir() {
                continue;
            }

            let Ok(mut files) = tokio::fs::read_dir(&session_dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = files.next_entry().await {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if !path.is_file() || !name.starts_with(&prefix) || !is_pdf(&path) {
                    continue;
                }

                let output_filename = name[prefix.len()..].to_string();
                let total_pages = match self.inner.engine.page_count(&path).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(
                            job_id = %job_id,
                            error = %e,
                            "Could not read page count of restored artifact"
                        );
                        0
                    }
                };
                let created_at = tokio::fs::metadata(&path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(Utc::now);

                let record = JobRecord {
                    job_id: job_id.to_string(),
                    session_id: session_entry.file_name().to_string_lossy().to_string(),
                    output_path: path,
                    output_filename,
                    status: JobStatus::Completed,
                    total_pages,
                    created_at,
                };

                {
                    let mut jobs = self.inner.jobs.write().await;
                    jobs.insert(job_id.to_string(), record.clone());
                }
                tracing::info!(job_id = %job_id, "Restored job from filesystem");
                return Some(record);
            }
        }
        None
    }
}

fn is_pdf(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::StorageConfig;
    use crate::pdf::stub::StubEngine;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        engine: Arc<StubEngine>,
        sessions: SessionRegistry,
        jobs: MergeJobRegistry,
        upload_root: PathBuf,
        merged_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            upload_root: dir.path().join("uploads"),
            thumbnail_root: dir.path().join("thumbnails"),
            merged_root: dir.path().join("merged"),
        };
        let engine = Arc::new(StubEngine::new(3));
        let sessions = SessionRegistry::new(&storage, engine.clone());
        let jobs = MergeJobRegistry::new(
            storage.merged_root.clone(),
            engine.clone(),
            sessions.clone(),
        );
        Fixture {
            engine,
            sessions,
            jobs,
            upload_root: storage.upload_root,
            merged_root: storage.merged_root,
            _dir: dir,
        }
    }

    fn write_upload(fixture: &Fixture, session: &str, name: &str, pages: usize) {
        let dir = fixture.upload_root.join(session);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), format!("%PDF-1.4\npages={}\n", pages)).unwrap();
    }

    fn selection(file_id: &str, pages: &[u32]) -> PageSelection {
        PageSelection {
            file_id: file_id.to_string(),
            pages: pages.to_vec(),
        }
    }

    #[tokio::test]
    async fn job_concatenates_pages_in_declaration_order() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 2);
        write_upload(&fx, "s1", "f2_b.pdf", 3);

        let record = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[2, 1]), selection("f2", &[1, 3])],
                "merged",
                &MergeOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.total_pages, 4);
        assert_eq!(record.output_filename, "merged.pdf");
        assert!(record.output_path.is_file());

        // The stub artifact records source and page per line, in order
        let body = std::fs::read_to_string(&record.output_path).unwrap();
        let lines: Vec<&str> = body.lines().skip(1).collect();
        assert_eq!(lines, vec!["page f1_a 2", "page f1_a 1", "page f2_b 1", "page f2_b 3"]);
    }

    #[tokio::test]
    async fn out_of_range_page_fails_validation_with_no_output() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 2);

        let err = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[1, 3])],
                "merged",
                &MergeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        // Nothing was written for the failed job
        let session_dir = fx.merged_root.join("s1");
        let artifacts = std::fs::read_dir(&session_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(artifacts, 0);
    }

    #[tokio::test]
    async fn zero_page_number_is_rejected() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 2);

        let err = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[0])],
                "merged",
                &MergeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_selection_list_is_rejected() {
        let fx = fixture();
        let err = fx
            .jobs
            .create_job("s1", &[], "merged", &MergeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let fx = fixture();
        let err = fx
            .jobs
            .create_job(
                "s1",
                &[selection("ghost", &[1])],
                "merged",
                &MergeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn job_survives_restart_via_artifact_filename() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 3);

        let record = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[1, 2, 3])],
                "bundle.pdf",
                &MergeOptions::default(),
            )
            .await
            .unwrap();

        // Restart: new registry over the same merged root
        let restarted = MergeJobRegistry::new(
            fx.merged_root.clone(),
            fx.engine.clone(),
            fx.sessions.clone(),
        );
        let restored = restarted.get_job(&record.job_id).await.expect("restored");
        assert_eq!(restored.output_filename, "bundle.pdf");
        assert_eq!(restored.session_id, "s1");
        assert_eq!(restored.status, JobStatus::Completed);
        assert_eq!(restored.total_pages, 3);
        assert_eq!(
            restarted.output_path(&record.job_id).await,
            Some(record.output_path)
        );
    }

    #[tokio::test]
    async fn download_distinguishes_missing_output_from_unknown_job() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 2);

        let record = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[1])],
                "out",
                &MergeOptions::default(),
            )
            .await
            .unwrap();

        let (returned, bytes) = fx.jobs.open_download(&record.job_id).await.unwrap();
        assert_eq!(returned.job_id, record.job_id);
        assert!(!bytes.is_empty());

        // Artifact vanishes out from under the index
        std::fs::remove_file(&record.output_path).unwrap();
        let err = fx.jobs.open_download(&record.job_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::OutputMissing(_)));

        let err = fx.jobs.open_download("no-such-job").await.unwrap_err();
        assert!(matches!(err, ServiceError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn forget_sessions_drops_job_records() {
        let fx = fixture();
        write_upload(&fx, "s1", "f1_a.pdf", 2);

        let record = fx
            .jobs
            .create_job(
                "s1",
                &[selection("f1", &[1])],
                "out",
                &MergeOptions::default(),
            )
            .await
            .unwrap();

        let dropped = fx.jobs.forget_sessions(&["s1".to_string()]).await;
        assert_eq!(dropped, 1);

        // The artifact still exists, so the job remains reconstructible
        assert!(fx.jobs.get_job(&record.job_id).await.is_some());

        // Once the artifact is gone too, the job is gone for good
        fx.jobs.forget_sessions(&["s1".to_string()]).await;
        std::fs::remove_file(&record.output_path).unwrap();
        assert!(fx.jobs.get_job(&record.job_id).await.is_none());
    }
}
