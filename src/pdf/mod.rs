//! Rendering gateway
//!
//! Seam between the registries and the PDF libraries. Everything the
//! core needs from a PDF goes through the `PdfEngine` trait:
//! - page counting and structural validation (MuPDF)
//! - single-page rasterization for thumbnails (MuPDF)
//! - page-level merge assembly with watermark/page-number stamping,
//!   metadata and encryption (lopdf)
//!
//! The production implementation offloads all of this to the blocking
//! thread pool with per-operation timeouts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub mod assemble;
pub mod engine;
pub mod raster;

pub use engine::DefaultPdfEngine;

// ============================================================================
// Types
// ============================================================================

/// One rasterized page, straight from the renderer
#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA samples, row-major
    pub rgba: Vec<u8>,
}

/// One source document plus the pages to take from it, in order
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub path: PathBuf,
    /// 1-indexed page numbers, already validated against the page count
    pub pages: Vec<u32>,
}

/// Formatting options applied during merge assembly
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    /// Diagonal text stamped on every page
    #[serde(default)]
    pub watermark_text: Option<String>,

    /// Stamp "Page i of n" at the bottom of every output page
    #[serde(default)]
    pub add_page_numbers: bool,

    /// Encrypt the output with this password during serialization
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub metadata: DocMetadata,
}

/// Document information dictionary fields for the merged output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// Document-level metadata read back from a stored PDF
#[derive(Debug, Clone)]
pub struct PdfMeta {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub pages: Vec<PageGeometry>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGeometry {
    pub page_number: u32,
    pub width: f32,
    pub height: f32,
    pub rotation: i64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to open PDF: {0}")]
    Open(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Merge failed: {0}")]
    Merge(String),

    #[error("Invalid or corrupted PDF: {0}")]
    Invalid(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mupdf::Error> for EngineError {
    fn from(err: mupdf::Error) -> Self {
        EngineError::Render(err.to_string())
    }
}

impl From<lopdf::Error> for EngineError {
    fn from(err: lopdf::Error) -> Self {
        EngineError::Merge(err.to_string())
    }
}

// ============================================================================
// Engine Trait
// ============================================================================

/// Gateway to the PDF libraries.
///
/// Implementations must be cheap to share (`Arc<dyn PdfEngine>`) and
/// must never block the async runtime.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    /// Number of pages in the document
    async fn page_count(&self, path: &Path) -> Result<usize, EngineError>;

    /// Document information plus per-page geometry
    async fn document_meta(&self, path: &Path) -> Result<PdfMeta, EngineError>;

    /// Rasterize exactly one page (1-indexed) at the given DPI
    async fn render_page(&self, path: &Path, page: u32, dpi: u32) -> Result<PageImage, EngineError>;

    /// Assemble the selected pages, in declaration order, into one PDF
    async fn merge(
        &self,
        sources: &[MergeSource],
        options: &MergeOptions,
    ) -> Result<Vec<u8>, EngineError>;

    /// Check the document is readable and has at least one page
    async fn validate(&self, path: &Path) -> Result<(), EngineError>;
}

// ============================================================================
// Test Stub
// ============================================================================

/// Render-counting stub engine for registry and cache tests.
///
/// Understands a tiny fixture format: a file starting with `%PDF` whose
/// body may carry a `pages=N` marker (page count) or one `page <stem> <n>`
/// line per merged page. This keeps reconstruction tests honest without
/// real PDF bytes.
#[cfg(test)]
pub mod stub {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub struct StubEngine {
        default_pages: usize,
        pub renders: AtomicUsize,
        pub probes: AtomicUsize,
        pub fail_renders: bool,
    }

    impl StubEngine {
        pub fn new(default_pages: usize) -> Self {
            Self {
                default_pages,
                renders: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
                fail_renders: false,
            }
        }

        pub fn failing(default_pages: usize) -> Self {
            Self {
                fail_renders: true,
                ..Self::new(default_pages)
            }
        }

        pub fn render_count(&self) -> usize {
            self.renders.load(Ordering::SeqCst)
        }

        pub fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        fn read_fixture(&self, path: &Path) -> Result<String, EngineError> {
            let bytes = std::fs::read(path)?;
            let text = String::from_utf8_lossy(&bytes).to_string();
            if !text.starts_with("%PDF") {
                return Err(EngineError::Invalid("missing %PDF header".to_string()));
            }
            Ok(text)
        }

        fn fixture_page_count(&self, text: &str) -> usize {
            if let Some(idx) = text.find("pages=") {
                let digits: String = text[idx + 6..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if let Ok(n) = digits.parse() {
                    return n;
                }
            }
            let merged_pages = text.lines().filter(|l| l.starts_with("page ")).count();
            if merged_pages > 0 {
                merged_pages
            } else {
                self.default_pages
            }
        }
    }

    #[async_trait]
    impl PdfEngine for StubEngine {
        async fn page_count(&self, path: &Path) -> Result<usize, EngineError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let text = self.read_fixture(path)?;
            Ok(self.fixture_page_count(&text))
        }

        async fn document_meta(&self, path: &Path) -> Result<PdfMeta, EngineError> {
            let count = self.page_count(path).await?;
            Ok(PdfMeta {
                page_count: count,
                title: None,
                author: None,
                subject: None,
                pages: (1..=count as u32)
                    .map(|n| PageGeometry {
                        page_number: n,
                        width: 612.0,
                        height: 792.0,
                        rotation: 0,
                    })
                    .collect(),
            })
        }

        async fn render_page(
            &self,
            path: &Path,
            page: u32,
            _dpi: u32,
        ) -> Result<PageImage, EngineError> {
            let text = self.read_fixture(path)?;
            let count = self.fixture_page_count(&text) as u32;
            if page < 1 || page > count {
                return Err(EngineError::Render(format!(
                    "page {} out of range (1-{})",
                    page, count
                )));
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            if self.fail_renders {
                return Err(EngineError::Render("stub render failure".to_string()));
            }
            // 4x4 white square
            Ok(PageImage {
                width: 4,
                height: 4,
                rgba: vec![255; 4 * 4 * 4],
            })
        }

        async fn merge(
            &self,
            sources: &[MergeSource],
            _options: &MergeOptions,
        ) -> Result<Vec<u8>, EngineError> {
            let mut out = String::from("%PDF-stub\n");
            for source in sources {
                let text = self.read_fixture(&source.path)?;
                let count = self.fixture_page_count(&text) as u32;
                let stem = source
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                for &page in &source.pages {
                    if page < 1 || page > count {
                        return Err(EngineError::Merge(format!(
                            "page {} out of range (1-{})",
                            page, count
                        )));
                    }
                    out.push_str(&format!("page {} {}\n", stem, page));
                }
            }
            Ok(out.into_bytes())
        }

        async fn validate(&self, path: &Path) -> Result<(), EngineError> {
            let text = self.read_fixture(path)?;
            if self.fixture_page_count(&text) == 0 {
                return Err(EngineError::Invalid("PDF has no pages".to_string()));
            }
            Ok(())
        }
    }
}
