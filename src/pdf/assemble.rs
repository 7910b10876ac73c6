//! lopdf-backed merge assembly
//!
//! Builds the merged output by grafting selected pages, in declaration
//! order, into a fresh document. Inherited page attributes (MediaBox,
//! Resources, Rotate) are inlined onto each grafted page because the
//! original Pages tree is not carried over. Watermark and page-number
//! stamps are appended content streams; encryption happens during final
//! serialization.
//!
//! Synchronous; callers go through `DefaultPdfEngine`.

use std::fmt::Write as _;
use std::path::Path;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::{DocMetadata, EngineError, MergeOptions, MergeSource, PageGeometry, PdfMeta};

const WATERMARK_FONT_SIZE: f32 = 48.0;
const PAGE_NUMBER_FONT_SIZE: f32 = 10.0;
/// Internal resource name for the stamp font; unusual on purpose so it
/// cannot collide with fonts already present on a grafted page.
const STAMP_FONT_NAME: &str = "FJn";

/// One page occurrence queued for the output document.
///
/// Each occurrence gets its own page object even when the same source
/// page is selected twice, so per-position stamps stay independent.
struct SelectedPage {
    dict: Dictionary,
    media_box: [f32; 4],
    resources: Dictionary,
    rotate: i64,
}

pub fn merge(sources: &[MergeSource], options: &MergeOptions) -> Result<Vec<u8>, EngineError> {
    if sources.is_empty() {
        return Err(EngineError::Merge("no sources to merge".to_string()));
    }

    let mut document = Document::with_version("1.5");
    let mut max_id: u32 = 1;
    let mut selected: Vec<SelectedPage> = Vec::new();

    for source in sources {
        let mut doc = Document::load(&source.path)
            .map_err(|e| EngineError::Open(format!("{}: {}", source.path.display(), e)))?;

        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let pages = doc.get_pages();

        // Fail fast: no output may exist if any page is out of range
        for &page in &source.pages {
            if page == 0 || !pages.contains_key(&page) {
                return Err(EngineError::Merge(format!(
                    "page {} out of range (1-{}) in {}",
                    page,
                    pages.len(),
                    source.path.display()
                )));
            }
        }

        for &page in &source.pages {
            let page_id = pages[&page];
            let dict = doc
                .get_object(page_id)
                .and_then(Object::as_dict)
                .cloned()
                .map_err(|e| EngineError::Merge(format!("bad page object: {}", e)))?;

            selected.push(SelectedPage {
                media_box: resolve_media_box(&doc, page_id),
                resources: resolve_dict(&doc, inherited(&doc, page_id, b"Resources")),
                rotate: inherited(&doc, page_id, b"Rotate")
                    .and_then(|o| deref(&doc, o).as_i64().ok())
                    .unwrap_or(0),
                dict,
            });
        }

        // Carry everything except the structural tree; pages are re-created
        for (object_id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    document.objects.insert(object_id, object);
                }
            }
        }
    }

    document.max_id = max_id;

    let stamping = options.watermark_text.is_some() || options.add_page_numbers;
    let font_id = if stamping {
        Some(document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }))
    } else {
        None
    };

    let pages_id = document.new_object_id();
    let total = selected.len();
    let mut kids: Vec<Object> = Vec::with_capacity(total);

    for (index, sel) in selected.into_iter().enumerate() {
        let mut dict = sel.dict;
        dict.set("Parent", Object::Reference(pages_id));
        dict.set(
            "MediaBox",
            Object::Array(sel.media_box.iter().map(|&v| Object::Real(v)).collect()),
        );
        if sel.rotate != 0 {
            dict.set("Rotate", Object::Integer(sel.rotate));
        }

        let mut resources = sel.resources;
        if let Some(font_id) = font_id {
            let stamp = stamp_content(options, &sel.media_box, index + 1, total);
            let stamp_id =
                document.add_object(Object::Stream(Stream::new(Dictionary::new(), stamp.into_bytes())));
            append_content(&mut dict, stamp_id);
            add_stamp_font(&document, &mut resources, font_id);
        }
        dict.set("Resources", Object::Dictionary(resources));

        let page_id = document.new_object_id();
        document.objects.insert(page_id, Object::Dictionary(dict));
        kids.push(Object::Reference(page_id));
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => total as i64,
    };
    document.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    document.trailer.set("Root", Object::Reference(catalog_id));

    set_metadata(&mut document, &options.metadata);

    document.renumber_objects();
    document.compress();

    if let Some(password) = &options.password {
        encrypt(&mut document, password)?;
    }

    let mut output = Vec::new();
    document
        .save_to(&mut output)
        .map_err(|e| EngineError::Merge(format!("failed to serialize output: {}", e)))?;

    Ok(output)
}

/// Read document information and per-page geometry.
pub fn read_document_meta(path: &Path) -> Result<PdfMeta, EngineError> {
    let doc =
        Document::load(path).map_err(|e| EngineError::Open(format!("{}: {}", path.display(), e)))?;

    let pages = doc.get_pages();
    let mut geometry = Vec::with_capacity(pages.len());
    for (&number, &page_id) in &pages {
        let media_box = resolve_media_box(&doc, page_id);
        geometry.push(PageGeometry {
            page_number: number,
            width: media_box[2] - media_box[0],
            height: media_box[3] - media_box[1],
            rotation: inherited(&doc, page_id, b"Rotate")
                .and_then(|o| deref(&doc, o).as_i64().ok())
                .unwrap_or(0),
        });
    }

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .map(|o| resolve_dict(&doc, Some(o)));

    let text_field = |key: &[u8]| -> Option<String> {
        info.as_ref()
            .and_then(|d| d.get(key).ok())
            .and_then(|o| match o {
                Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).to_string()),
                _ => None,
            })
    };

    Ok(PdfMeta {
        page_count: pages.len(),
        title: text_field(b"Title"),
        author: text_field(b"Author"),
        subject: text_field(b"Subject"),
        pages: geometry,
    })
}

// ============================================================================
// Attribute Resolution
// ============================================================================

/// Look up a page attribute, walking the Parent chain for inheritable
/// keys. Depth-limited against malformed cyclic trees.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_object(page_id).ok()?;
    for _ in 0..10 {
        let dict = current.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        let parent_id = dict.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent_id).ok()?;
    }
    None
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    if let Object::Reference(id) = obj {
        if let Ok(resolved) = doc.get_object(*id) {
            return resolved;
        }
    }
    obj
}

fn resolve_dict(doc: &Document, obj: Option<&Object>) -> Dictionary {
    match obj.map(|o| deref(doc, o)) {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

fn resolve_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    if let Some(obj) = inherited(doc, page_id, b"MediaBox") {
        if let Object::Array(arr) = deref(doc, obj) {
            let values: Vec<f32> = arr
                .iter()
                .filter_map(|o| match o {
                    Object::Integer(i) => Some(*i as f32),
                    Object::Real(r) => Some(*r),
                    _ => None,
                })
                .collect();
            if values.len() == 4 {
                return [values[0], values[1], values[2], values[3]];
            }
        }
    }
    // US Letter fallback
    [0.0, 0.0, 612.0, 792.0]
}

// ============================================================================
// Stamping
// ============================================================================

/// Build the content stream stamped onto one output page.
fn stamp_content(options: &MergeOptions, media_box: &[f32; 4], position: usize, total: usize) -> String {
    let width = media_box[2] - media_box[0];
    let height = media_box[3] - media_box[1];
    let mut content = String::new();

    if let Some(text) = &options.watermark_text {
        // Rough Helvetica advance: half the font size per character
        let text_width = text.chars().count() as f32 * WATERMARK_FONT_SIZE * 0.5;
        let (cos, sin) = (0.7071_f32, 0.7071_f32);
        let tx = media_box[0] + (width - text_width * cos) / 2.0;
        let ty = media_box[1] + (height - text_width * sin) / 2.0;

        content.push_str("q\n0.75 g\nBT\n");
        let _ = writeln!(content, "/{} {} Tf", STAMP_FONT_NAME, WATERMARK_FONT_SIZE);
        let _ = writeln!(content, "{} {} {} {} {} {} Tm", cos, sin, -sin, cos, tx, ty);
        let _ = writeln!(content, "({}) Tj", escape_text(text));
        content.push_str("ET\nQ\n");
    }

    if options.add_page_numbers {
        let label = format!("Page {} of {}", position, total);
        let label_width = label.chars().count() as f32 * PAGE_NUMBER_FONT_SIZE * 0.5;
        let tx = media_box[0] + (width - label_width) / 2.0;

        content.push_str("q\n0 g\nBT\n");
        let _ = writeln!(content, "/{} {} Tf", STAMP_FONT_NAME, PAGE_NUMBER_FONT_SIZE);
        let _ = writeln!(content, "{} {} Td", tx, media_box[1] + 20.0);
        let _ = writeln!(content, "({}) Tj", escape_text(&label));
        content.push_str("ET\nQ\n");
    }

    content
}

/// Escape a PDF literal string
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            _ => out.push(c),
        }
    }
    out
}

/// Append a content stream to a page dictionary, preserving whatever
/// Contents shape the page already uses.
fn append_content(page_dict: &mut Dictionary, content_id: ObjectId) {
    let existing = page_dict.get(b"Contents").ok().cloned();
    match existing {
        Some(Object::Reference(existing_id)) => {
            page_dict.set(
                "Contents",
                Object::Array(vec![
                    Object::Reference(existing_id),
                    Object::Reference(content_id),
                ]),
            );
        }
        Some(Object::Array(mut arr)) => {
            arr.push(Object::Reference(content_id));
            page_dict.set("Contents", Object::Array(arr));
        }
        _ => {
            page_dict.set("Contents", Object::Reference(content_id));
        }
    }
}

/// Register the stamp font in the page's Font resources, resolving an
/// indirect Font dictionary if necessary.
fn add_stamp_font(document: &Document, resources: &mut Dictionary, font_id: ObjectId) {
    let mut fonts = match resources.get(b"Font").map(|o| deref_in(document, o)) {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    fonts.set(STAMP_FONT_NAME, Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));
}

fn deref_in<'a>(document: &'a Document, obj: &'a Object) -> &'a Object {
    if let Object::Reference(id) = obj {
        if let Ok(resolved) = document.get_object(*id) {
            return resolved;
        }
    }
    obj
}

// ============================================================================
// Metadata & Encryption
// ============================================================================

fn set_metadata(document: &mut Document, metadata: &DocMetadata) {
    let mut info = Dictionary::new();
    if let Some(title) = &metadata.title {
        info.set("Title", Object::string_literal(title.as_str()));
    }
    if let Some(author) = &metadata.author {
        info.set("Author", Object::string_literal(author.as_str()));
    }
    if let Some(subject) = &metadata.subject {
        info.set("Subject", Object::string_literal(subject.as_str()));
    }
    if !info.is_empty() {
        let info_id = document.add_object(Object::Dictionary(info));
        document.trailer.set("Info", Object::Reference(info_id));
    }
}

fn encrypt(document: &mut Document, password: &str) -> Result<(), EngineError> {
    use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};

    let version = EncryptionVersion::V2 {
        document,
        owner_password: password,
        user_password: password,
        key_length: 128,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version)
        .map_err(|e| EngineError::Merge(format!("failed to derive encryption keys: {}", e)))?;
    document
        .encrypt(&state)
        .map_err(|e| EngineError::Merge(format!("failed to encrypt output: {}", e)))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use lopdf::content::{Content, Operation};
    use tempfile::TempDir;

    use super::*;

    /// Build a small PDF whose page contents carry a recognizable label,
    /// e.g. "A-p1", "A-p2", so page identity survives merging.
    fn write_test_pdf(dir: &TempDir, name: &str, label: &str, page_count: usize) -> PathBuf {
        let mut doc = Document::with_version("1.5");
        let page_tree_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => Object::Reference(font_id) },
        });

        let mut kids = Vec::new();
        for page in 1..=page_count {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 700.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("{}-p{}", label, page))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                Dictionary::new(),
                content.encode().unwrap_or_default(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(page_tree_id),
                "Contents" => Object::Reference(content_id),
                "Resources" => Object::Reference(resources_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::Reference(page_id));
        }

        let page_tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        };
        doc.objects.insert(page_tree_id, Object::Dictionary(page_tree));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(page_tree_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let path = dir.path().join(name);
        doc.save(&path).unwrap();
        path
    }

    fn page_text(doc: &Document, page_number: u32) -> String {
        let pages = doc.get_pages();
        let page_id = pages[&page_number];
        let content = doc.get_page_content(page_id).unwrap();
        String::from_utf8_lossy(&content).to_string()
    }

    #[test]
    fn merge_preserves_declaration_order() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 2);
        let b = write_test_pdf(&dir, "b.pdf", "B", 3);

        let sources = vec![
            MergeSource {
                path: a,
                pages: vec![2, 1],
            },
            MergeSource {
                path: b,
                pages: vec![1, 3],
            },
        ];

        let bytes = merge(&sources, &MergeOptions::default()).unwrap();
        let merged = Document::load_mem(&bytes).unwrap();

        assert_eq!(merged.get_pages().len(), 4);
        assert!(page_text(&merged, 1).contains("A-p2"));
        assert!(page_text(&merged, 2).contains("A-p1"));
        assert!(page_text(&merged, 3).contains("B-p1"));
        assert!(page_text(&merged, 4).contains("B-p3"));
    }

    #[test]
    fn duplicate_selections_are_kept() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 1);

        let sources = vec![MergeSource {
            path: a,
            pages: vec![1, 1],
        }];

        let bytes = merge(&sources, &MergeOptions::default()).unwrap();
        let merged = Document::load_mem(&bytes).unwrap();
        assert_eq!(merged.get_pages().len(), 2);
        assert!(page_text(&merged, 1).contains("A-p1"));
        assert!(page_text(&merged, 2).contains("A-p1"));
    }

    #[test]
    fn out_of_range_page_aborts_merge() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 2);

        let sources = vec![MergeSource {
            path: a,
            pages: vec![1, 3],
        }];

        let err = merge(&sources, &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::Merge(_)));
    }

    #[test]
    fn page_numbers_are_stamped_per_position() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 2);

        let options = MergeOptions {
            add_page_numbers: true,
            ..Default::default()
        };
        let sources = vec![MergeSource {
            path: a,
            pages: vec![2, 1],
        }];

        let bytes = merge(&sources, &options).unwrap();
        let merged = Document::load_mem(&bytes).unwrap();
        assert!(page_text(&merged, 1).contains("Page 1 of 2"));
        assert!(page_text(&merged, 2).contains("Page 2 of 2"));
    }

    #[test]
    fn watermark_is_stamped_on_every_page() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 2);

        let options = MergeOptions {
            watermark_text: Some("CONFIDENTIAL".to_string()),
            ..Default::default()
        };
        let sources = vec![MergeSource {
            path: a,
            pages: vec![1, 2],
        }];

        let bytes = merge(&sources, &options).unwrap();
        let merged = Document::load_mem(&bytes).unwrap();
        for page in 1..=2 {
            assert!(page_text(&merged, page).contains("CONFIDENTIAL"));
        }
    }

    #[test]
    fn metadata_lands_in_info_dictionary() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 1);

        let options = MergeOptions {
            metadata: DocMetadata {
                title: Some("Quarterly Report".to_string()),
                author: Some("Finance".to_string()),
                subject: None,
            },
            ..Default::default()
        };
        let sources = vec![MergeSource {
            path: a.clone(),
            pages: vec![1],
        }];

        let bytes = merge(&sources, &options).unwrap();
        let out = dir.path().join("merged.pdf");
        std::fs::write(&out, &bytes).unwrap();

        let meta = read_document_meta(&out).unwrap();
        assert_eq!(meta.page_count, 1);
        assert_eq!(meta.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(meta.author.as_deref(), Some("Finance"));
        assert_eq!(meta.subject, None);
    }

    #[test]
    fn read_meta_reports_page_geometry() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 3);

        let meta = read_document_meta(&a).unwrap();
        assert_eq!(meta.page_count, 3);
        assert_eq!(meta.pages.len(), 3);
        assert_eq!(meta.pages[0].page_number, 1);
        assert!((meta.pages[0].width - 612.0).abs() < 0.01);
        assert!((meta.pages[0].height - 792.0).abs() < 0.01);
    }

    #[test]
    fn encrypted_output_is_produced() {
        let dir = TempDir::new().unwrap();
        let a = write_test_pdf(&dir, "a.pdf", "A", 1);

        let options = MergeOptions {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let sources = vec![MergeSource {
            path: a,
            pages: vec![1],
        }];

        let bytes = merge(&sources, &options).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        // Encrypted documents carry an /Encrypt entry in the trailer
        assert!(bytes.windows(8).any(|w| w == b"/Encrypt"));
    }
}
