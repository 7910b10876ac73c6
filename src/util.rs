//! Identifier generation and filename handling

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate an unguessable session identifier.
///
/// Hashes the current time together with fresh random bytes so the id
/// doubles as a capability: knowing it is the only way to reach the
/// session's files.
pub fn generate_session_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_file_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn generate_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Sanitize a client-supplied filename for on-disk storage.
///
/// Strips path components and reduces the name to a conservative ASCII
/// set. The result never contains `/`, `\` or a leading dot, and is
/// never empty. The underscore that joins id and name in the storage
/// convention stays unambiguous because ids never contain one.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => out.push(c),
            ' ' => out.push('_'),
            _ => {}
        }
    }

    let trimmed = out.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "document.pdf".to_string()
    } else {
        trimmed
    }
}

/// Append `.pdf` unless the name already ends with it
pub fn ensure_pdf_extension(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{}.pdf", name)
    }
}

/// Human-readable file size, e.g. "1.5 MB"
pub fn format_file_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_hex() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn file_ids_contain_no_separator() {
        let id = generate_file_id();
        assert!(!id.contains('_'));
        assert!(!id.contains('-'));
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\report.pdf"), "report.pdf");
    }

    #[test]
    fn sanitize_replaces_spaces_and_drops_specials() {
        assert_eq!(sanitize_filename("my report (v2).pdf"), "my_report_v2.pdf");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_filename(""), "document.pdf");
        assert_eq!(sanitize_filename("???"), "document.pdf");
        assert_eq!(sanitize_filename("..."), "document.pdf");
    }

    #[test]
    fn pdf_extension_is_appended_once() {
        assert_eq!(ensure_pdf_extension("merged"), "merged.pdf");
        assert_eq!(ensure_pdf_extension("merged.pdf"), "merged.pdf");
        assert_eq!(ensure_pdf_extension("merged.PDF"), "merged.PDF");
    }

    #[test]
    fn sizes_are_formatted_with_units() {
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }
}
