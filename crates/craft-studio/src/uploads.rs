//! Classification and fingerprinting of uploaded files ahead of recording
//! them in the audit log. File contents are never parsed here.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::UploadError;

/// Broad family of an uploaded file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Text,
    Data,
    Image,
    Document,
    Code,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Text => "text",
            FileCategory::Data => "data",
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Code => "code",
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Text => &["txt", "md", "rtf"],
            FileCategory::Data => &["csv", "xlsx", "xls", "json"],
            FileCategory::Image => &["jpg", "jpeg", "png", "gif", "bmp", "webp"],
            FileCategory::Document => &["pdf", "docx", "doc"],
            FileCategory::Code => &["py", "js", "html", "css", "java", "cpp", "c", "go", "rs"],
        }
    }

    /// Category for `filename`, or `None` for unsupported extensions.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        [
            FileCategory::Text,
            FileCategory::Data,
            FileCategory::Image,
            FileCategory::Document,
            FileCategory::Code,
        ]
        .into_iter()
        .find(|category| category.extensions().contains(&ext.as_str()))
    }
}

/// A validated upload, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadDescriptor {
    pub filename: String,
    pub category: FileCategory,
    pub size_bytes: u64,
    pub content_hash: String,
}

impl UploadDescriptor {
    /// Validate size and type, then fingerprint the content with blake3.
    pub fn inspect(filename: &str, content: &[u8], max_size_bytes: u64) -> Result<Self, UploadError> {
        let size_bytes = content.len() as u64;
        if size_bytes > max_size_bytes {
            return Err(UploadError::TooLarge {
                size: size_bytes,
                max: max_size_bytes,
            });
        }
        let category = FileCategory::from_filename(filename).ok_or_else(|| {
            let ext = Path::new(filename)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| filename.to_string());
            UploadError::UnsupportedType(ext)
        })?;
        Ok(Self {
            filename: filename.to_string(),
            category,
            size_bytes,
            content_hash: content_hash(content),
        })
    }
}

/// Hex-encoded blake3 digest of `content`.
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}
