//! Report request and result types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;
use crate::record::{Attachment, LogRecord};

/// Content type of every generated report.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Organization branding stamped on every page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub organization: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub logo: Option<Attachment>,
}

impl Branding {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            department: None,
            logo: None,
        }
    }
}

/// Everything needed to render one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub records: Vec<LogRecord>,
    pub branding: Branding,
    pub generated_at: DateTime<Utc>,
}

/// A non-fatal degradation of an otherwise successful report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportWarning {
    /// None for report-level items such as the organization logo.
    pub record_id: Option<String>,
    /// Zero-based position in the record's attachment list.
    pub attachment_index: Option<usize>,
    pub kind: ErrorKind,
    pub reason: String,
}

impl ReportWarning {
    pub fn record(record_id: &str, kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            record_id: Some(record_id.to_string()),
            attachment_index: None,
            kind,
            reason: reason.into(),
        }
    }

    pub fn attachment(
        record_id: &str,
        attachment_index: usize,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Some(record_id.to_string()),
            attachment_index: Some(attachment_index),
            kind,
            reason: reason.into(),
        }
    }

    pub fn branding(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            record_id: None,
            attachment_index: None,
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ReportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.record_id, self.attachment_index) {
            (Some(id), Some(index)) => write!(f, "{}#{}: {}", id, index + 1, self.kind),
            (Some(id), None) => write!(f, "{}: {}", id, self.kind),
            (None, _) => write!(f, "logo: {}", self.kind),
        }
    }
}

/// A finished report ready to hand to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutput {
    pub pdf: Vec<u8>,
    pub warnings: Vec<ReportWarning>,
    pub page_count: usize,
    pub record_count: usize,
    pub filename: String,
}

impl ReportOutput {
    pub fn content_type(&self) -> &'static str {
        PDF_CONTENT_TYPE
    }

    pub fn suggested_filename(&self) -> &str {
        &self.filename
    }

    /// One-line warning summary, e.g. `B: InvalidRecord; A#2: DecodeFailed`.
    /// Empty when the report rendered cleanly.
    pub fn warnings_header(&self) -> String {
        self.warnings
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Warnings that caused a whole record to be left out.
    pub fn skipped_records(&self) -> impl Iterator<Item = &str> {
        self.warnings
            .iter()
            .filter(|w| w.kind == ErrorKind::InvalidRecord)
            .filter_map(|w| w.record_id.as_deref())
    }
}

/// Builds `<organization>-MaintenanceReport-<date>.pdf` with the organization
/// reduced to ASCII letters, digits and single dashes.
pub fn suggested_filename(organization: &str, date: NaiveDate) -> String {
    let mut slug = String::with_capacity(organization.len());
    for ch in organization.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "Report" } else { slug };
    format!("{}-MaintenanceReport-{}.pdf", slug, date.format("%Y-%m-%d"))
}
