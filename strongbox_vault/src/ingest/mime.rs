//! MIME type resolution and display-name sanitizing

use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const PDF: &str = "application/pdf";

/// Detect MIME type from file content
pub fn detect_mime(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // Check magic bytes
    match &data[0..8] {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x25, 0x50, 0x44, 0x46, 0x2D, ..] => Some(PDF),
        [0x52, 0x49, 0x46, 0x46, ..] => {
            if data.len() >= 12 && &data[8..12] == b"WEBP" {
                Some("image/webp")
            } else {
                None
            }
        }
        _ => {
            // HEIC/HEIF: ISO box `ftyp` at offset 4
            if data.len() >= 12 && &data[4..8] == b"ftyp" {
                match &data[8..12] {
                    b"heic" | b"heix" => return Some("image/heic"),
                    b"mif1" => return Some("image/heif"),
                    _ => {}
                }
            }
            None
        }
    }
}

/// MIME type for a file extension (case-insensitive)
pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "pdf" => PDF,
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime)
}

/// Canonical extension for photo types, used to name unnamed photos
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/heif" => Some("heif"),
        PDF => Some("pdf"),
        _ => None,
    }
}

/// Explicit type, then extension, then magic bytes, then octet-stream
pub fn resolve_mime(explicit: Option<&str>, name: &str, data: &[u8]) -> String {
    if let Some(explicit) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
        return explicit.to_ascii_lowercase();
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_from_extension)
        .or_else(|| detect_mime(data))
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Trim, replace path separators and control characters; empty becomes `Untitled`
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "Untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes() {
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0]), Some("image/jpeg"));
        assert_eq!(detect_mime(b"%PDF-1.4\n"), Some(PDF));
        assert_eq!(detect_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(detect_mime(b"\0\0\0\x18ftypheic"), Some("image/heic"));
        assert_eq!(detect_mime(b"short"), None);
    }

    #[test]
    fn test_resolution_order() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(resolve_mime(Some("Image/PNG"), "a.txt", b""), "image/png");
        assert_eq!(resolve_mime(None, "notes.TXT", &png), "text/plain");
        assert_eq!(resolve_mime(None, "blob", &png), "image/png");
        assert_eq!(resolve_mime(None, "blob", b"hello"), OCTET_STREAM);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  report.pdf "), "report.pdf");
        assert_eq!(sanitize_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_name("   "), "Untitled");
        assert_eq!(sanitize_name(".."), "Untitled");
    }
}
