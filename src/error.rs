//! Error taxonomy for the report pipeline.
//!
//! Each pipeline stage has its own error type. Attachment and record errors
//! are recoverable and end up as [`ReportWarning`](crate::report::ReportWarning)s;
//! only [`ReportError`] aborts an export.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification shared by errors and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AttachmentTooLarge,
    UnsupportedFormat,
    DecodeFailed,
    InvalidRecord,
    EmptyReport,
    AssemblyError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AttachmentTooLarge => "AttachmentTooLarge",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::DecodeFailed => "DecodeFailed",
            ErrorKind::InvalidRecord => "InvalidRecord",
            ErrorKind::EmptyReport => "EmptyReport",
            ErrorKind::AssemblyError => "AssemblyError",
        };
        f.write_str(name)
    }
}

/// Failure to turn one attachment into an embeddable image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("attachment is {size} bytes, limit is {limit} bytes")]
    AttachmentTooLarge { size: usize, limit: usize },

    #[error("unsupported image type '{0}'")]
    UnsupportedFormat(String),

    #[error("failed to decode image: {0}")]
    DecodeFailed(String),
}

impl NormalizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NormalizeError::AttachmentTooLarge { .. } => ErrorKind::AttachmentTooLarge,
            NormalizeError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            NormalizeError::DecodeFailed(_) => ErrorKind::DecodeFailed,
        }
    }
}

/// A record whose own fields cannot be rendered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("record '{record_id}' is invalid: {reason}")]
    InvalidRecord { record_id: String, reason: String },
}

impl FormatError {
    pub fn invalid(record_id: &str, reason: impl Into<String>) -> Self {
        FormatError::InvalidRecord {
            record_id: record_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidRecord
    }

    pub fn reason(&self) -> &str {
        match self {
            FormatError::InvalidRecord { reason, .. } => reason,
        }
    }
}

/// Fatal export failure. No document is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("report has no renderable records ({skipped} skipped)")]
    EmptyReport { skipped: usize },

    #[error("document assembly failed: {0}")]
    Assembly(String),
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReportError::EmptyReport { .. } => ErrorKind::EmptyReport,
            ReportError::Assembly(_) => ErrorKind::AssemblyError,
        }
    }
}

/// Result type alias for report generation.
pub type ReportResult<T> = Result<T, ReportError>;
