//! Thumbnail cache manager
//!
//! Cache-or-compute over the content store. The cache key is
//! `(pdf stem, page number)` and the key's canonical path IS the cache
//! entry: a hit is a plain existence check, no registry lookup. Entries
//! are written once and never mutated, so hits need no locking.
//!
//! Misses are serialized per key: the first requester renders and
//! publishes (temp file + atomic rename), concurrent requesters for the
//! same key wait and then read the published file. A global semaphore
//! bounds how many renders run at once across all requests, batch or
//! not.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use image::imageops::FilterType;
use tokio::sync::{Mutex, Semaphore};

use crate::config::{LimitConfig, PreviewConfig};
use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::pdf::PdfEngine;

#[derive(Clone)]
pub struct ThumbnailService {
    inner: Arc<ThumbnailServiceInner>,
}

struct ThumbnailServiceInner {
    engine: Arc<dyn PdfEngine>,
    metrics: Metrics,
    size: u32,
    quality: u8,
    dpi: u32,
    filter: FilterType,
    max_batch_pages: usize,
    render_slots: Semaphore,
    in_flight: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Outcome of one page in a batch render
#[derive(Debug)]
pub struct BatchPageOutcome {
    pub page: u32,
    pub elapsed: Duration,
    pub result: Result<PathBuf, ServiceError>,
}

impl ThumbnailService {
    pub fn new(
        engine: Arc<dyn PdfEngine>,
        metrics: Metrics,
        preview: &PreviewConfig,
        limits: &LimitConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ThumbnailServiceInner {
                engine,
                metrics,
                size: preview.thumbnail_size,
                quality: preview.thumbnail_quality,
                dpi: preview.thumbnail_dpi,
                filter: parse_filter(&preview.resample_filter),
                max_batch_pages: limits.max_batch_pages,
                render_slots: Semaphore::new(limits.render_concurrency.max(1)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Canonical cache path for `(stem(pdf_path), page)` under `cache_dir`
    pub fn cache_path(pdf_path: &Path, page: u32, cache_dir: &Path) -> PathBuf {
        let stem = pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        cache_dir.join(format!("{}_page_{}.jpg", stem, page))
    }

    /// Return the cached thumbnail for a page, rendering it first on a
    /// miss. Safe to call concurrently for the same page: exactly one
    /// render happens per cache key.
    pub async fn get_or_render(
        &self,
        pdf_path: &Path,
        page: u32,
        cache_dir: &Path,
    ) -> Result<PathBuf, ServiceError> {
        self.render(pdf_path, page, cache_dir, false).await
    }

    /// Like `get_or_render`, but `force` discards any cached entry first.
    pub async fn render(
        &self,
        pdf_path: &Path,
        page: u32,
        cache_dir: &Path,
        force: bool,
    ) -> Result<PathBuf, ServiceError> {
        let cache_path = Self::cache_path(pdf_path, page, cache_dir);

        if !force && cache_path.is_file() {
            tracing::debug!(path = %cache_path.display(), "Thumbnail cache hit");
            return Ok(cache_path);
        }

        // One render per key: take the key's mutex, then re-check the
        // cache because a concurrent holder may have published already.
        let key_lock = {
            let mut in_flight = self.inner.in_flight.lock().await;
            in_flight
                .entry(cache_path.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        if !force && cache_path.is_file() {
            return Ok(cache_path);
        }

        let outcome = self.render_uncached(pdf_path, page, &cache_path).await;

        // Waiters still holding the Arc keep the mutex alive; dropping
        // the map entry just stops new arrivals from queuing on it.
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            in_flight.remove(&cache_path);
        }

        outcome?;
        Ok(cache_path)
    }

    /// Render pages in a bounded-concurrency batch. One result per
    /// requested page, in request order; a failed page never aborts the
    /// rest. Requests above the batch limit are rejected outright.
    pub async fn render_batch(
        &self,
        pdf_path: &Path,
        pages: &[u32],
        cache_dir: &Path,
        force: bool,
    ) -> Result<Vec<BatchPageOutcome>, ServiceError> {
        if pages.is_empty() {
            return Err(ServiceError::Validation(
                "no pages requested".to_string(),
            ));
        }
        if pages.len() > self.inner.max_batch_pages {
            return Err(ServiceError::Validation(format!(
                "batch of {} pages exceeds the limit of {}",
                pages.len(),
                self.inner.max_batch_pages
            )));
        }

        let tasks = pages.iter().map(|&page| {
            let service = self.clone();
            let pdf_path = pdf_path.to_path_buf();
            let cache_dir = cache_dir.to_path_buf();
            async move {
                let started = Instant::now();
                let result = service.render(&pdf_path, page, &cache_dir, force).await;
                BatchPageOutcome {
                    page,
                    elapsed: started.elapsed(),
                    result,
                }
            }
        });

        Ok(join_all(tasks).await)
    }

    /// The miss path: rasterize, downscale, encode, publish atomically.
    async fn render_uncached(
        &self,
        pdf_path: &Path,
        page: u32,
        cache_path: &Path,
    ) -> Result<(), ServiceError> {
        let _permit = self
            .inner
            .render_slots
            .acquire()
            .await
            .map_err(|_| ServiceError::Render("render pool closed".to_string()))?;

        let started = Instant::now();

        let raw = self
            .inner
            .engine
            .render_page(pdf_path, page, self.inner.dpi)
            .await?;

        let size = self.inner.size;
        let quality = self.inner.quality;
        let filter = self.inner.filter;
        let jpeg = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ServiceError> {
            let image = image::RgbaImage::from_raw(raw.width, raw.height, raw.rgba)
                .ok_or_else(|| ServiceError::Render("invalid raster buffer".to_string()))?;
            let resized =
                image::DynamicImage::ImageRgba8(image).resize(size, size, filter);
            let rgb = resized.to_rgb8();
            let mut out = Vec::new();
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .encode_image(&rgb)
                .map_err(|e| ServiceError::Render(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| ServiceError::Render(format!("Task join error: {}", e)))??;

        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Publish atomically so a concurrent reader never sees a
        // partially written file at the canonical path.
        let tmp_path = cache_path.with_extension("jpg.tmp");
        tokio::fs::write(&tmp_path, &jpeg).await?;
        tokio::fs::rename(&tmp_path, cache_path).await?;

        let elapsed = started.elapsed();
        self.inner.metrics.record_thumbnail(elapsed);
        tracing::debug!(
            page = page,
            elapsed_ms = elapsed.as_millis() as u64,
            path = %cache_path.display(),
            "Generated thumbnail"
        );
        Ok(())
    }
}

fn parse_filter(name: &str) -> FilterType {
    match name.to_ascii_lowercase().as_str() {
        "nearest" => FilterType::Nearest,
        "triangle" => FilterType::Triangle,
        "catmullrom" => FilterType::CatmullRom,
        "gaussian" => FilterType::Gaussian,
        _ => FilterType::Lanczos3,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::pdf::stub::StubEngine;

    use super::*;

    fn service_with(engine: Arc<StubEngine>) -> ThumbnailService {
        let config = Config::default();
        ThumbnailService::new(engine, Metrics::new(), &config.preview, &config.limits)
    }

    fn write_fixture(dir: &TempDir, name: &str, pages: usize) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("%PDF-1.4\npages={}\n", pages)).unwrap();
        path
    }

    #[tokio::test]
    async fn second_request_is_a_cache_hit() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        let first = service.get_or_render(&pdf, 2, &cache_dir).await.unwrap();
        assert!(first.is_file());
        assert_eq!(first.file_name().unwrap().to_str().unwrap(), "doc_page_2.jpg");
        let bytes_first = std::fs::read(&first).unwrap();

        let second = service.get_or_render(&pdf, 2, &cache_dir).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), bytes_first);
        assert_eq!(engine.render_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_render_once() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let pdf = pdf.clone();
                let cache_dir = cache_dir.clone();
                tokio::spawn(async move { service.get_or_render(&pdf, 1, &cache_dir).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(engine.render_count(), 1);
    }

    #[tokio::test]
    async fn failed_render_leaves_no_cache_entry() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::failing(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        let err = service.get_or_render(&pdf, 1, &cache_dir).await.unwrap_err();
        assert!(matches!(err, ServiceError::Render(_)));
        let cache_path = ThumbnailService::cache_path(&pdf, 1, &cache_dir);
        assert!(!cache_path.exists());
    }

    #[tokio::test]
    async fn out_of_range_page_renders_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        assert!(service.get_or_render(&pdf, 4, &cache_dir).await.is_err());
        let cache_path = ThumbnailService::cache_path(&pdf, 4, &cache_dir);
        assert!(!cache_path.exists());
    }

    #[tokio::test]
    async fn batch_returns_one_outcome_per_page_in_request_order() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        // Page 9 is out of range: its slot fails, the rest succeed
        let outcomes = service
            .render_batch(&pdf, &[3, 9, 1], &cache_dir, false)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].page, 3);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].page, 9);
        assert!(outcomes[1].result.is_err());
        assert_eq!(outcomes[2].page, 1);
        assert!(outcomes[2].result.is_ok());
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected_not_truncated() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(500));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 500);
        let cache_dir = dir.path().join("cache");

        let pages: Vec<u32> = (1..=101).collect();
        let err = service
            .render_batch(&pdf, &pages, &cache_dir, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(engine.render_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let service = service_with(Arc::new(StubEngine::new(3)));
        let pdf = write_fixture(&dir, "doc.pdf", 3);

        let err = service
            .render_batch(&pdf, &[], &dir.path().join("cache"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn force_regenerates_a_cached_page() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new(3));
        let service = service_with(engine.clone());
        let pdf = write_fixture(&dir, "doc.pdf", 3);
        let cache_dir = dir.path().join("cache");

        service.get_or_render(&pdf, 1, &cache_dir).await.unwrap();
        service.render(&pdf, 1, &cache_dir, true).await.unwrap();
        assert_eq!(engine.render_count(), 2);
    }
}
