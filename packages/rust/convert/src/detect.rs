//! Content sniffing and upload policy.
//!
//! The declared MIME type and the filename extension are never trusted; only
//! the leading bytes decide what a file is.

use std::fmt;

use docflow_shared::{CANONICAL_MIME, DocflowError, Result};
use serde::{Deserialize, Serialize};

/// Largest accepted upload, 50 MiB.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// An accepted upload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Doc,
    Docx,
    Xls,
    Xlsx,
    Ppt,
    Pptx,
    Png,
    Jpeg,
}

impl FileKind {
    pub const ALL: [FileKind; 9] = [
        Self::Pdf,
        Self::Doc,
        Self::Docx,
        Self::Xls,
        Self::Xlsx,
        Self::Ppt,
        Self::Pptx,
        Self::Png,
        Self::Jpeg,
    ];

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => CANONICAL_MIME,
            Self::Doc => "application/msword",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Xls => "application/vnd.ms-excel",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Ppt => "application/vnd.ms-powerpoint",
            Self::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Ppt => "ppt",
            Self::Pptx => "pptx",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.mime() == mime)
    }

    /// Whether this kind is already the canonical format.
    pub fn is_canonical(&self) -> bool {
        *self == Self::Pdf
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Detect the content type of `bytes`, or `None` if unrecognized.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|t| t.mime_type())
}

/// Check an upload against the size ceiling, then the type allow-list.
pub fn validate(bytes: &[u8]) -> Result<FileKind> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(DocflowError::FileTooLarge {
            size: bytes.len(),
            max: MAX_UPLOAD_BYTES,
        });
    }

    let detected = sniff(bytes);
    match detected.and_then(FileKind::from_mime) {
        Some(kind) => {
            tracing::debug!(kind = %kind, size = bytes.len(), "upload validated");
            Ok(kind)
        }
        None => Err(DocflowError::InvalidFileType {
            detected: detected.unwrap_or("unknown").to_string(),
        }),
    }
}
