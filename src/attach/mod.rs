//! Per-row attachment resolution.
//!
//! A reference cell holds one or more document links or bare document ids.
//! Each one is converted to a portable document by a [`DocumentConverter`].
//! Failures are collected, never raised: the row is still sent, just without
//! the attachment that failed.

use std::future::Future;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::MergeError;

pub const INVALID_REFERENCE_REASON: &str = "Invalid or unparseable document link";

const BARE_ID_MIN_LEN: usize = 21;

static DOCUMENT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"document/d/([A-Za-z0-9_-]+)").expect("document link pattern is valid")
});

/// Opaque identifier understood by the conversion service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A converted document, owned for the duration of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Attachments that resolved plus one message per reference that did not.
#[derive(Debug, Clone, Default)]
pub struct AttachmentOutcome {
    pub attachments: Vec<Attachment>,
    pub errors: Vec<String>,
}

impl AttachmentOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Fetch-and-convert collaborator.
pub trait DocumentConverter {
    fn convert(&self, id: &DocumentId) -> impl Future<Output = crate::Result<Attachment>> + Send;
}

/// Normalize a reference to a document id.
///
/// Accepts a link containing `document/d/<id>` or a bare id longer than
/// twenty characters without a path separator.
pub fn parse_reference(reference: &str) -> Result<DocumentId, String> {
    let reference = reference.trim();
    if let Some(caps) = DOCUMENT_LINK.captures(reference) {
        return Ok(DocumentId(caps[1].to_string()));
    }
    if reference.chars().count() >= BARE_ID_MIN_LEN && !reference.contains(['/', '\\']) {
        return Ok(DocumentId(reference.to_string()));
    }
    Err(INVALID_REFERENCE_REASON.to_string())
}

/// Split a reference cell into individual references (newline or comma separated).
pub fn split_references(cell: &str) -> Vec<&str> {
    cell.split(['\n', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve every reference in `cell`. An empty cell yields no attachments and no errors.
pub async fn resolve<C: DocumentConverter>(cell: &str, converter: &C) -> AttachmentOutcome {
    let mut outcome = AttachmentOutcome::default();
    for reference in split_references(cell) {
        let id = match parse_reference(reference) {
            Ok(id) => id,
            Err(reason) => {
                tracing::warn!(reference, "unparseable document reference");
                outcome.errors.push(reason);
                continue;
            }
        };
        match converter.convert(&id).await {
            Ok(attachment) => {
                tracing::debug!(document = %id, bytes = attachment.bytes.len(), "converted document");
                outcome.attachments.push(attachment);
            }
            Err(e) => {
                tracing::warn!(document = %id, error = %e, "document conversion failed");
                outcome.errors.push(e.to_string());
            }
        }
    }
    outcome
}

/// Converter for runs without a conversion service: every reference fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledConverter;

impl DocumentConverter for DisabledConverter {
    async fn convert(&self, id: &DocumentId) -> crate::Result<Attachment> {
        Err(MergeError::Conversion {
            document_id: id.to_string(),
            reason: "no document converter configured".to_string(),
        })
    }
}

/// Exports documents as PDF over HTTP: `<base>/document/d/<id>/export?format=pdf`.
#[derive(Debug, Clone)]
pub struct HttpExportConverter {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpExportConverter {
    pub const DEFAULT_BASE_URL: &'static str = "https://docs.google.com";

    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    pub fn export_url(&self, id: &DocumentId) -> String {
        format!("{}/document/d/{}/export?format=pdf", self.base_url, id)
    }
}

impl Default for HttpExportConverter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL, None)
    }
}

impl DocumentConverter for HttpExportConverter {
    async fn convert(&self, id: &DocumentId) -> crate::Result<Attachment> {
        let conversion_error = |reason: String| MergeError::Conversion {
            document_id: id.to_string(),
            reason,
        };

        let mut request = self.client.get(self.export_url(id));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| conversion_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = match status.as_u16() {
                404 => "document not found".to_string(),
                401 | 403 => "access denied (is the document shared?)".to_string(),
                _ => format!("export returned HTTP {status}"),
            };
            return Err(conversion_error(reason));
        }

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| format!("{id}.pdf"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| conversion_error(e.to_string()))?;

        Ok(Attachment {
            filename,
            content_type: "application/pdf".to_string(),
            bytes: bytes.to_vec(),
        })
    }
}

fn filename_from_disposition(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Serves pre-exported documents from a directory: `<dir>/<id>.pdf`.
#[derive(Debug, Clone)]
pub struct DirectoryConverter {
    dir: PathBuf,
    extension: String,
}

impl DirectoryConverter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "pdf".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn path_for(&self, id: &DocumentId) -> PathBuf {
        self.dir.join(format!("{id}.{}", self.extension))
    }
}

impl DocumentConverter for DirectoryConverter {
    async fn convert(&self, id: &DocumentId) -> crate::Result<Attachment> {
        let path = self.path_for(id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                "document not found".to_string()
            } else {
                e.to_string()
            };
            MergeError::Conversion {
                document_id: id.to_string(),
                reason,
            }
        })?;
        Ok(Attachment {
            filename: format!("{id}.{}", self.extension),
            content_type: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Converts ids starting with "ok" and fails everything else.
    #[derive(Default)]
    struct FakeConverter {
        seen: Mutex<Vec<String>>,
    }

    impl DocumentConverter for FakeConverter {
        async fn convert(&self, id: &DocumentId) -> crate::Result<Attachment> {
            self.seen.lock().unwrap().push(id.to_string());
            if id.as_str().starts_with("ok") {
                Ok(Attachment {
                    filename: format!("{id}.pdf"),
                    content_type: "application/pdf".into(),
                    bytes: b"%PDF-1.4".to_vec(),
                })
            } else {
                Err(MergeError::Conversion {
                    document_id: id.to_string(),
                    reason: "document not found".into(),
                })
            }
        }
    }

    #[test]
    fn test_bare_id_accepted() {
        let id = parse_reference("1AbCdEfGhIjKlMnOpQrStUvWx").unwrap();
        assert_eq!(id.as_str(), "1AbCdEfGhIjKlMnOpQrStUvWx");
    }

    #[test]
    fn test_document_link_extracts_id() {
        let id = parse_reference("https://docs.google.com/document/d/XYZ123/edit?usp=sharing")
            .unwrap();
        assert_eq!(id.as_str(), "XYZ123");
        assert_eq!(parse_reference("document/d/XYZ123/edit").unwrap().as_str(), "XYZ123");
    }

    #[test]
    fn test_unrecognised_references_rejected() {
        for r in [
            "short-id",
            "https://example.com/some/long/path/to/file.pdf",
            "C:\\docs\\a-very-long-file-name.pdf",
            "exactly-twenty-chars",
        ] {
            assert_eq!(
                parse_reference(r),
                Err(INVALID_REFERENCE_REASON.to_string()),
                "{r} should be rejected"
            );
        }
    }

    #[test]
    fn test_split_references() {
        assert!(split_references("").is_empty());
        assert!(split_references("  \n ").is_empty());
        assert_eq!(split_references("a, b\nc"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"Offer Letter.pdf\""),
            Some("Offer Letter.pdf".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_export_url() {
        let c = HttpExportConverter::new("http://localhost:9000/", None);
        let id = parse_reference("document/d/XYZ123/view").unwrap();
        assert_eq!(
            c.export_url(&id),
            "http://localhost:9000/document/d/XYZ123/export?format=pdf"
        );
    }

    #[tokio::test]
    async fn test_resolve_empty_reference() {
        let converter = FakeConverter::default();
        let outcome = resolve("   ", &converter).await;
        assert!(outcome.attachments.is_empty());
        assert!(!outcome.has_errors());
        assert!(converter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_collects_successes_and_failures() {
        let converter = FakeConverter::default();
        let cell = "document/d/ok1/edit\nnope\ndocument/d/missing/edit";
        let outcome = resolve(cell, &converter).await;
        assert_eq!(outcome.attachments.len(), 1);
        assert_eq!(outcome.attachments[0].filename, "ok1.pdf");
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0], INVALID_REFERENCE_REASON);
        assert!(outcome.errors[1].contains("document not found"));
        assert_eq!(*converter.seen.lock().unwrap(), vec!["ok1", "missing"]);
    }

    #[tokio::test]
    async fn test_directory_converter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok-document-identifier-1.pdf"), b"%PDF-1.7").unwrap();
        let converter = DirectoryConverter::new(dir.path());

        let found = converter
            .convert(&parse_reference("ok-document-identifier-1").unwrap())
            .await
            .unwrap();
        assert_eq!(found.filename, "ok-document-identifier-1.pdf");
        assert_eq!(found.content_type, "application/pdf");
        assert_eq!(found.bytes, b"%PDF-1.7");

        let missing = converter
            .convert(&parse_reference("document/d/absent/edit").unwrap())
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("document not found"));
    }
}
