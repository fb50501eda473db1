//! Redis-based job queue for report export tasks.

use crate::job::{JobSummary, ReportExportJob};
use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{debug, error, info};

/// Queue name for report export jobs.
const QUEUE_KEY: &str = "maintenance:export:report:queue";

/// Status key prefix for job status tracking.
const STATUS_KEY_PREFIX: &str = "maintenance:export:report:status";

/// Job TTL in seconds (24 hours).
const JOB_TTL_SECONDS: u64 = 86400;

/// Seconds BLPOP waits before reporting an empty queue.
const DEQUEUE_TIMEOUT_SECONDS: f64 = 5.0;

fn status_key(job_id: &str) -> String {
    format!("{}:{}", STATUS_KEY_PREFIX, job_id)
}

/// Redis-based job queue manager.
///
/// Jobs are stored as JSON in a Redis list. Each job also has a status key
/// holding its [`JobSummary`] for client polling; summaries leave out the
/// record payload, which can carry several megabytes of photos.
pub struct JobQueue {
    pub conn: ConnectionManager,
}

impl JobQueue {
    /// Creates a queue over an existing Redis connection.
    ///
    /// # Arguments
    ///
    /// * `conn` - Redis connection manager, cloned freely between workers
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Enqueues a report export job and publishes its initial status.
    ///
    /// # Arguments
    ///
    /// * `job` - The report export job to enqueue
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or an error if Redis operations fail.
    pub async fn enqueue(&mut self, job: &ReportExportJob) -> Result<()> {
        let job_json = serde_json::to_string(job).context("Failed to serialize job")?;

        // RPUSH for FIFO order
        self.conn
            .rpush::<_, _, ()>(QUEUE_KEY, &job_json)
            .await
            .context("Failed to push job to queue")?;

        self.update_status(job).await?;

        info!(
            job_id = %job.job_id,
            records = job.request.records.len(),
            "Enqueued report export job"
        );
        Ok(())
    }

    /// Dequeues the next job, waiting up to five seconds.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(job))` when a job was popped, `Ok(None)` when the
    /// wait times out, or an error if Redis fails or the payload does not
    /// deserialize.
    pub async fn dequeue(&mut self) -> Result<Option<ReportExportJob>> {
        let result: Option<(String, String)> = self
            .conn
            .blpop(QUEUE_KEY, DEQUEUE_TIMEOUT_SECONDS)
            .await
            .context("Failed to pop job from queue")?;

        match result {
            Some((_key, job_json)) => {
                let job: ReportExportJob =
                    serde_json::from_str(&job_json).context("Failed to deserialize job")?;
                debug!(job_id = %job.job_id, "Dequeued job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Writes the job's summary to its status key.
    ///
    /// # Arguments
    ///
    /// * `job` - The job with updated status
    pub async fn update_status(&mut self, job: &ReportExportJob) -> Result<()> {
        self.publish_summary(&job.summary()).await
    }

    /// Writes a summary to its job's status key. The key expires after 24 hours.
    ///
    /// # Arguments
    ///
    /// * `summary` - Status to publish; its `job_id` selects the key
    pub async fn publish_summary(&mut self, summary: &JobSummary) -> Result<()> {
        let summary_json =
            serde_json::to_string(summary).context("Failed to serialize job status")?;

        self.conn
            .set_ex::<_, _, ()>(status_key(&summary.job_id), &summary_json, JOB_TTL_SECONDS)
            .await
            .context("Failed to update job status")?;

        debug!(job_id = %summary.job_id, status = %summary.status, "Updated job status");
        Ok(())
    }

    /// Gets the current status of a job by ID.
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job ID to query
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(summary))` if the job exists, `Ok(None)` if not found
    /// or expired, or an error if Redis operations fail.
    pub async fn get_status(&mut self, job_id: &str) -> Result<Option<JobSummary>> {
        let summary_json: Option<String> = self
            .conn
            .get(status_key(job_id))
            .await
            .context("Failed to get job status")?;

        summary_json
            .map(|json| serde_json::from_str(&json).context("Failed to deserialize job status"))
            .transpose()
    }

    /// Re-enqueues a failed job if it has retries left.
    ///
    /// # Arguments
    ///
    /// * `job` - The failed job to retry
    ///
    /// # Returns
    ///
    /// Returns `Ok(true)` if the retry was enqueued, `Ok(false)` once the
    /// retry limit is reached (the final failed status is published), or an
    /// error if Redis operations fail.
    pub async fn retry_job(&mut self, mut job: ReportExportJob) -> Result<bool> {
        if job.retry() {
            self.enqueue(&job).await?;
            Ok(true)
        } else {
            self.update_status(&job).await?;
            error!(
                job_id = %job.job_id,
                error = ?job.error,
                "Job failed after max retries"
            );
            Ok(false)
        }
    }

    /// Number of jobs waiting in the queue.
    pub async fn queue_length(&mut self) -> Result<usize> {
        let len: usize = self
            .conn
            .llen(QUEUE_KEY)
            .await
            .context("Failed to get queue length")?;
        Ok(len)
    }
}
