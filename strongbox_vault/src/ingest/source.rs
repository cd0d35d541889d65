//! Import sources reduced to one payload shape

use std::path::PathBuf;

use zeroize::Zeroizing;

use super::mime::{extension_for_mime, resolve_mime, sanitize_name, PDF};
use super::scan::ScanComposer;
use crate::error::{VaultError, VaultResult};

/// Where an import comes from
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// File picker: a path on the local filesystem
    File { path: PathBuf },
    /// Photo picker: bytes plus whatever the picker knew
    Photo {
        data: Vec<u8>,
        suggested_name: Option<String>,
        content_type: Option<String>,
    },
    /// Document scanner: page images composed into one PDF
    Scan { pages: Vec<Vec<u8>>, title: String },
}

/// One import: a source and its destination folder
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    pub parent_id: Option<String>,
}

impl ImportRequest {
    pub fn new(source: ImportSource, parent_id: Option<String>) -> Self {
        Self { source, parent_id }
    }
}

/// Plaintext ready for `import_payload`
pub struct PreparedPayload {
    pub bytes: Zeroizing<Vec<u8>>,
    pub name: String,
    pub mime_type: String,
}

impl std::fmt::Debug for PreparedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPayload")
            .field("len", &self.bytes.len())
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

fn too_large(size: u64, max_bytes: u64) -> VaultError {
    VaultError::invalid(format!("payload of {size} bytes exceeds the {max_bytes} byte limit"))
}

impl ImportSource {
    /// Read, compose or normalise the source into a payload
    pub async fn prepare(self, composer: &ScanComposer, max_bytes: u64) -> VaultResult<PreparedPayload> {
        let prepared = match self {
            ImportSource::File { path } => {
                let size = tokio::fs::metadata(&path).await?.len();
                if size > max_bytes {
                    return Err(too_large(size, max_bytes));
                }
                let bytes = Zeroizing::new(tokio::fs::read(&path).await?);
                let raw_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let name = sanitize_name(&raw_name);
                let mime_type = resolve_mime(None, &name, &bytes);
                PreparedPayload {
                    bytes,
                    name,
                    mime_type,
                }
            }
            ImportSource::Photo {
                data,
                suggested_name,
                content_type,
            } => {
                let bytes = Zeroizing::new(data);
                let suggested = suggested_name.as_deref().map(str::trim).unwrap_or("");
                let mime_type = resolve_mime(content_type.as_deref(), suggested, &bytes);
                let name = if suggested.is_empty() {
                    match extension_for_mime(&mime_type) {
                        Some(ext) => format!("Photo.{ext}"),
                        None => "Photo".to_string(),
                    }
                } else {
                    sanitize_name(suggested)
                };
                PreparedPayload {
                    bytes,
                    name,
                    mime_type,
                }
            }
            ImportSource::Scan { pages, title } => {
                let title = sanitize_name(&title);
                let composer = composer.clone();
                let doc_title = title.clone();
                let pdf = tokio::task::spawn_blocking(move || composer.compose(&doc_title, &pages))
                    .await??;

                let name = if title.to_ascii_lowercase().ends_with(".pdf") {
                    title
                } else {
                    format!("{title}.pdf")
                };
                PreparedPayload {
                    bytes: Zeroizing::new(pdf),
                    name,
                    mime_type: PDF.to_string(),
                }
            }
        };

        let size = prepared.bytes.len() as u64;
        if size > max_bytes {
            return Err(too_large(size, max_bytes));
        }
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanSettings;
    use tempfile::tempdir;

    fn composer() -> ScanComposer {
        ScanComposer::new(ScanSettings::default())
    }

    #[tokio::test]
    async fn test_file_source_uses_file_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hi").unwrap();

        let prepared = ImportSource::File { path }.prepare(&composer(), 1024).await.unwrap();
        assert_eq!(prepared.name, "hello.txt");
        assert_eq!(prepared.mime_type, "text/plain");
        assert_eq!(prepared.bytes.as_slice(), b"hi");
    }

    #[tokio::test]
    async fn test_unnamed_photo_named_from_type() {
        let jpeg_magic = vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        let prepared = ImportSource::Photo {
            data: jpeg_magic,
            suggested_name: None,
            content_type: None,
        }
        .prepare(&composer(), 1024)
        .await
        .unwrap();
        assert_eq!(prepared.name, "Photo.jpg");
        assert_eq!(prepared.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_size_limit() {
        let err = ImportSource::Photo {
            data: vec![1; 2048],
            suggested_name: Some("big.bin".into()),
            content_type: None,
        }
        .prepare(&composer(), 1024)
        .await
        .unwrap_err();
        assert!(matches!(err, VaultError::InvalidData(_)));
    }
}
