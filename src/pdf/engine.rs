//! Production `PdfEngine`
//!
//! Bridges the synchronous PDF primitives onto the async runtime.
//! Every call is offloaded to the blocking thread pool and bounded by a
//! timeout: some malformed PDFs make the underlying libraries hang, and
//! the request should fail rather than wait forever. The blocking
//! thread may keep running past the timeout, but the caller gets an
//! answer.

use std::path::Path;

use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use super::{
    assemble, raster, EngineError, MergeOptions, MergeSource, PageImage, PdfEngine, PdfMeta,
};

/// Timeout for page counting and metadata reads
const PROBE_TIMEOUT_SECS: u64 = 15;
/// Timeout for single-page rasterization
const RENDER_TIMEOUT_SECS: u64 = 30;
/// Timeout for merge assembly (can touch many documents)
const MERGE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Default)]
pub struct DefaultPdfEngine;

impl DefaultPdfEngine {
    pub fn new() -> Self {
        Self
    }
}

async fn run_blocking<T, F>(timeout_secs: u64, f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    let result = timeout(
        Duration::from_secs(timeout_secs),
        tokio::task::spawn_blocking(f),
    )
    .await;

    match result {
        Ok(join_result) => {
            join_result.map_err(|e| EngineError::Render(format!("Task join error: {}", e)))?
        }
        Err(_) => Err(EngineError::Timeout(timeout_secs)),
    }
}

#[async_trait]
impl PdfEngine for DefaultPdfEngine {
    async fn page_count(&self, path: &Path) -> Result<usize, EngineError> {
        let path = path.to_path_buf();
        run_blocking(PROBE_TIMEOUT_SECS, move || raster::page_count(&path)).await
    }

    async fn document_meta(&self, path: &Path) -> Result<PdfMeta, EngineError> {
        let path = path.to_path_buf();
        run_blocking(PROBE_TIMEOUT_SECS, move || {
            assemble::read_document_meta(&path)
        })
        .await
    }

    async fn render_page(
        &self,
        path: &Path,
        page: u32,
        dpi: u32,
    ) -> Result<PageImage, EngineError> {
        let path = path.to_path_buf();
        run_blocking(RENDER_TIMEOUT_SECS, move || {
            raster::render_page(&path, page, dpi)
        })
        .await
    }

    async fn merge(
        &self,
        sources: &[MergeSource],
        options: &MergeOptions,
    ) -> Result<Vec<u8>, EngineError> {
        let sources = sources.to_vec();
        let options = options.clone();
        run_blocking(MERGE_TIMEOUT_SECS, move || {
            assemble::merge(&sources, &options)
        })
        .await
    }

    async fn validate(&self, path: &Path) -> Result<(), EngineError> {
        let path = path.to_path_buf();
        run_blocking(PROBE_TIMEOUT_SECS, move || raster::validate(&path)).await
    }
}
