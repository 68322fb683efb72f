//! Error types for docflow.
//!
//! Library crates use [`DocflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docflow operations.
#[derive(Debug, thiserror::Error)]
pub enum DocflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Detected content type is not in the allow-list.
    #[error("invalid file type: {detected}")]
    InvalidFileType { detected: String },

    /// Upload exceeds the size ceiling.
    #[error("file too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    /// The conversion service could not produce canonical bytes.
    #[error("normalization failed: {0}")]
    NormalizationFailed(String),

    /// The blob store did not confirm the canonical write.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    /// The initial document record could not be created.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// Summary derivation failed. Never changes document status.
    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    /// Database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cache backend error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Blob store error outside the pipeline write (read, sign, delete).
    #[error("blob store error: {0}")]
    Blob(String),

    /// Step log or workflow instance inconsistency.
    #[error("workflow error: {0}")]
    Workflow(String),

    /// Entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Entity exists but belongs to another owner.
    #[error("forbidden")]
    Forbidden,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad argument, malformed value).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocflowError>;

impl DocflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is caused by the uploaded content itself and can be
    /// fixed by the user resubmitting a different file.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::InvalidFileType { .. } | Self::FileTooLarge { .. })
    }

    /// Short machine-readable name used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::InvalidFileType { .. } => "invalid_file_type",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::NormalizationFailed(_) => "normalization_failed",
            Self::StorageWriteFailed(_) => "storage_write_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::SummarizationFailed(_) => "summarization_failed",
            Self::Storage(_) => "storage",
            Self::Cache(_) => "cache",
            Self::Blob(_) => "blob",
            Self::Workflow(_) => "workflow",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden => "forbidden",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocflowError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DocflowError::FileTooLarge {
            size: 60,
            max: 50,
        };
        assert_eq!(err.to_string(), "file too large: 60 bytes (max 50 bytes)");

        let err = DocflowError::not_found("document", "abc");
        assert_eq!(err.to_string(), "document not found: abc");
    }

    #[test]
    fn user_correctable_errors() {
        assert!(
            DocflowError::InvalidFileType {
                detected: "application/zip".into()
            }
            .is_user_correctable()
        );
        assert!(!DocflowError::StorageWriteFailed("timeout".into()).is_user_correctable());
        assert_eq!(
            DocflowError::NormalizationFailed("x".into()).kind(),
            "normalization_failed"
        );
    }
}
