//! MuPDF-backed rasterization primitives
//!
//! Synchronous; callers go through `DefaultPdfEngine`, which moves this
//! work onto the blocking thread pool.

use std::path::Path;

use mupdf::{Colorspace, Document, Matrix};

use super::{EngineError, PageImage};

fn open(path: &Path) -> Result<Document, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Open(format!("non-UTF8 path: {}", path.display())))?;
    Document::open(path_str).map_err(|e| EngineError::Open(e.to_string()))
}

pub fn page_count(path: &Path) -> Result<usize, EngineError> {
    let doc = open(path)?;
    Ok(doc.page_count()? as usize)
}

/// Rasterize one page (1-indexed) to an RGBA buffer at the given DPI.
pub fn render_page(path: &Path, page_number: u32, dpi: u32) -> Result<PageImage, EngineError> {
    let doc = open(path)?;
    let count = doc.page_count()? as u32;
    if page_number < 1 || page_number > count {
        return Err(EngineError::Render(format!(
            "page {} out of range (1-{})",
            page_number, count
        )));
    }

    let page = doc.load_page((page_number - 1) as i32)?;

    let scale = dpi as f32 / 72.0;
    let matrix = Matrix::new_scale(scale, scale);
    let colorspace = Colorspace::device_rgb();
    let pixmap = page.to_pixmap(&matrix, &colorspace, true, false)?;

    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    // Normalize whatever sample layout MuPDF gives us into RGBA
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = (y * width as usize + x) * n;
            let r = samples.get(offset).copied().unwrap_or(0);
            let g = samples.get(offset + 1).copied().unwrap_or(0);
            let b = samples.get(offset + 2).copied().unwrap_or(0);
            let a = if n >= 4 {
                samples.get(offset + 3).copied().unwrap_or(255)
            } else {
                255
            };
            rgba.extend_from_slice(&[r, g, b, a]);
        }
    }

    Ok(PageImage {
        width,
        height,
        rgba,
    })
}

/// Check the document opens, reports at least one page, and the first
/// page actually loads.
pub fn validate(path: &Path) -> Result<(), EngineError> {
    let doc = open(path).map_err(|e| EngineError::Invalid(e.to_string()))?;
    let count = doc
        .page_count()
        .map_err(|e| EngineError::Invalid(e.to_string()))?;
    if count == 0 {
        return Err(EngineError::Invalid("PDF has no pages".to_string()));
    }
    doc.load_page(0)
        .map_err(|e| EngineError::Invalid(e.to_string()))?;
    Ok(())
}
