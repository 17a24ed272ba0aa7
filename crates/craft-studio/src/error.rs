//! Error types shared by the session store and the model gateway.
//!
//! Store failures and generation failures are kept in separate enums so a
//! caller can disable history features on a storage failure while the rest
//! of a tool keeps working, and can tell a quota problem from a timeout
//! without parsing message text.

use std::fmt;

/// Failure of a session store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// True when the backing storage itself could not be reached or used,
    /// as opposed to a bad argument or an undecodable value.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Storage(_) | StoreError::Pool(_) | StoreError::Io(_) | StoreError::Join(_)
        )
    }
}

/// Machine-readable category of a failed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationErrorKind {
    Timeout,
    Quota,
    InvalidResponse,
    Cancelled,
    Unknown,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Quota => "quota",
            Self::InvalidResponse => "invalid_response",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to the external model. Never carries model output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Quota, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::InvalidResponse, message)
    }

    pub fn cancelled() -> Self {
        Self::new(GenerationErrorKind::Cancelled, "request cancelled by caller")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Unknown, message)
    }
}

/// Rejection of an uploaded file before it is recorded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("file too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: u64, max: u64 },
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_display_includes_kind() {
        let err = GenerationError::quota("daily limit reached");
        assert_eq!(err.to_string(), "quota: daily limit reached");
        assert_eq!(err.kind, GenerationErrorKind::Quota);
    }

    #[test]
    fn test_store_error_unavailable_classification() {
        let io = StoreError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        assert!(io.is_unavailable());

        let bad = StoreError::InvalidArgument("limit must be positive".into());
        assert!(!bad.is_unavailable());
    }

    #[test]
    fn test_upload_error_messages() {
        let err = UploadError::TooLarge { size: 20, max: 10 };
        assert!(err.to_string().contains("20 bytes"));
        assert_eq!(
            UploadError::UnsupportedType(".exe".into()).to_string(),
            "unsupported file type: .exe"
        );
    }
}
