//! Plain-text extraction for the supported upload formats.

use parley_core::error::IngestError;
use std::path::Path;

pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/markdown",
    "application/json",
];

/// Guess a supported MIME type from a file extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "txt" | "text" => Some("text/plain"),
        "md" | "markdown" => Some("text/markdown"),
        "json" => Some("application/json"),
        _ => None,
    }
}

/// Lowercase, drop parameters (`; charset=utf-8`) and fold aliases.
pub fn normalize_mime(mime_type: &str) -> String {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "text/x-markdown" => "text/markdown".to_string(),
        _ => base,
    }
}

pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&normalize_mime(mime_type).as_str())
}

/// Extract the text of a document. Fails with `UnsupportedFormat` for any
/// MIME type outside [`SUPPORTED_MIME_TYPES`].
///
/// PDF parsing is CPU-bound; async callers should run this on a blocking
/// thread.
pub fn extract_text(bytes: &[u8], mime_type: &str) -> Result<String, IngestError> {
    let text = match normalize_mime(mime_type).as_str() {
        "application/pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| IngestError::Extraction(e.to_string()))?,
        "text/plain" | "text/markdown" | "application/json" => {
            let text = String::from_utf8_lossy(bytes);
            text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
        }
        _ => return Err(IngestError::UnsupportedFormat(mime_type.to_string())),
    };

    let text = text.replace("\r\n", "\n");
    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument);
    }
    Ok(text)
}
