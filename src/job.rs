//! Job models and state management for the report export queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::report::{ReportRequest, ReportWarning};

/// Attempts after the first failure before a job is given up.
pub const MAX_RETRIES: u8 = 3;

/// Report export job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportExportJob {
    pub job_id: String,
    pub request: ReportRequest,
    /// Directory for the finished PDF. Falls back to the worker default.
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub retry_count: u8,
    #[serde(default)]
    pub warnings: Vec<ReportWarning>,
    #[serde(default)]
    pub page_count: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What polling clients see: the job without its record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub retry_count: u8,
    pub record_count: usize,
    pub output_file: Option<String>,
    pub page_count: Option<usize>,
    pub warnings: Vec<ReportWarning>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl JobSummary {
    /// Marks the summarized job as failed without the job itself, for when
    /// the job was lost mid-export.
    ///
    /// # Arguments
    ///
    /// * `error` - Message shown to polling clients
    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }
}

impl ReportExportJob {
    /// Creates a queued job with a fresh id.
    ///
    /// # Arguments
    ///
    /// * `request` - Records and branding to render
    /// * `output_dir` - Directory for the PDF, or `None` for the worker default
    pub fn new(request: ReportRequest, output_dir: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            request,
            output_dir,
            output_file: None,
            status: JobStatus::Queued,
            retry_count: 0,
            warnings: Vec::new(),
            page_count: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn start_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self) {
        self.status = JobStatus::Complete;
        self.updated_at = Utc::now();
        self.error = None;
    }

    /// # Arguments
    ///
    /// * `error` - Failure message kept on the job and its summary
    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }

    /// Re-queues the job if it has retries left, otherwise fails it for good.
    ///
    /// # Returns
    ///
    /// `true` if the job should be enqueued again, `false` once
    /// [`MAX_RETRIES`] is used up.
    pub fn retry(&mut self) -> bool {
        if self.retry_count < MAX_RETRIES {
            self.retry_count += 1;
            self.status = JobStatus::Queued;
            self.updated_at = Utc::now();
            true
        } else {
            self.mark_failed("Max retries exceeded".to_string());
            false
        }
    }

    /// Milliseconds from creation to the final status; `None` while the job
    /// is still queued or processing.
    pub fn processing_duration_ms(&self) -> Option<i64> {
        if self.status == JobStatus::Complete || self.status == JobStatus::Failed {
            Some(self.updated_at.signed_duration_since(self.created_at).num_milliseconds())
        } else {
            None
        }
    }

    /// Status view for polling clients, without the record payload.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            retry_count: self.retry_count,
            record_count: self.request.records.len(),
            output_file: self.output_file.clone(),
            page_count: self.page_count,
            warnings: self.warnings.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            error: self.error.clone(),
        }
    }
}
