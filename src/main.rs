//! Maintenance Report Export Worker
//!
//! Consumes report export jobs from a Redis queue, renders each request into
//! a PDF and writes it to the job's output directory.
//!
//! ## Architecture
//!
//! - **Queue**: Redis list (`maintenance:export:report:queue`)
//! - **Status**: Redis keys (`maintenance:export:report:status:{job_id}`)
//! - **Renderer**: synchronous report pipeline on the blocking pool
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_URL`: Redis connection string (default: redis://127.0.0.1/)
//! - `WORKER_CONCURRENCY`: Number of concurrent jobs (default: 4)
//! - `REPORT_OUTPUT_DIR`: Output directory for jobs without one (default: ./reports)
//! - `REPORT_CONFIG`: Path to a JSON report configuration (optional)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info)
//! - `LOG_FORMAT`: `json` for JSON log lines

use anyhow::{Context, Result};
use redis::Client;
use report_export::config::ReportConfig;
use report_export::export::{is_permanent, run_export};
use report_export::generator::ReportGenerator;
use report_export::job::ReportExportJob;
use report_export::queue::JobQueue;
use report_export::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct WorkerSettings {
    redis_url: String,
    concurrency: usize,
    output_dir: PathBuf,
    report_config: ReportConfig,
}

impl WorkerSettings {
    fn from_env() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let concurrency = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(4);
        let output_dir = std::env::var("REPORT_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("reports"));
        let report_config = match std::env::var("REPORT_CONFIG") {
            Ok(path) => ReportConfig::from_file(&path)?,
            Err(_) => ReportConfig::default(),
        };

        Ok(Self {
            redis_url,
            concurrency,
            output_dir,
            report_config,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting report export worker service");

    let settings = WorkerSettings::from_env()?;
    info!(
        redis_url = %settings.redis_url,
        concurrency = settings.concurrency,
        output_dir = %settings.output_dir.display(),
        "Configuration loaded"
    );

    let client = Client::open(settings.redis_url.as_str()).context("Failed to create Redis client")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    info!("Connected to Redis");

    let semaphore = Arc::new(Semaphore::new(settings.concurrency));
    let generator = Arc::new(ReportGenerator::new(Arc::new(settings.report_config)));
    let output_dir = Arc::new(settings.output_dir);
    let shutdown = CancellationToken::new();

    let mut handles = vec![];
    for worker_id in 0..settings.concurrency {
        let worker = Worker {
            id: worker_id,
            queue: JobQueue::new(conn.clone()),
            semaphore: semaphore.clone(),
            generator: generator.clone(),
            output_dir: output_dir.clone(),
            shutdown: shutdown.clone(),
        };
        handles.push(tokio::spawn(worker.run()));
    }

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal, waiting for workers to finish...");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    // In-flight jobs hold permits until they finish.
    let _ = semaphore
        .acquire_many(settings.concurrency as u32)
        .await;

    info!("Worker service shutdown complete");
    Ok(())
}

struct Worker {
    id: usize,
    queue: JobQueue,
    semaphore: Arc<Semaphore>,
    generator: Arc<ReportGenerator>,
    output_dir: Arc<PathBuf>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Pulls jobs until shutdown. The semaphore bounds jobs in flight
    /// across all workers.
    async fn run(mut self) {
        info!(worker_id = self.id, "Worker started");

        loop {
            let dequeued = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                dequeued = self.queue.dequeue() => dequeued,
            };

            let job = match dequeued {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker_id = self.id, "Failed to dequeue job: {:#}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(tokio::time::Duration::from_secs(5)) => continue,
                    }
                }
            };

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let queue = JobQueue::new(self.queue.conn.clone());
            let generator = self.generator.clone();
            let output_dir = self.output_dir.clone();
            tokio::spawn(async move {
                process_job(job, queue, generator, output_dir).await;
                drop(permit);
            });

            if let Ok(queue_len) = self.queue.queue_length().await {
                if queue_len % 10 == 0 {
                    telemetry::record_worker_heartbeat(queue_len);
                }
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }
}

/// Runs one job to completion: render, write, publish status, retry
/// transient failures up to the job's retry limit.
async fn process_job(
    mut job: ReportExportJob,
    mut queue: JobQueue,
    generator: Arc<ReportGenerator>,
    output_dir: Arc<PathBuf>,
) {
    info!(
        job_id = %job.job_id,
        records = job.request.records.len(),
        attempt = job.retry_count + 1,
        "Processing job"
    );

    job.start_processing();
    if let Err(e) = queue.update_status(&job).await {
        error!("Failed to update job status: {:#}", e);
    }

    // Kept outside the blocking task so a panic still leaves a final status.
    let mut summary = job.summary();
    let joined = tokio::task::spawn_blocking(move || {
        let result = run_export(&mut job, generator.as_ref(), &output_dir);
        (job, result)
    })
    .await;

    let (mut job, result) = match joined {
        Ok(done) => done,
        Err(e) => {
            error!(job_id = %summary.job_id, "Report export task panicked: {}", e);
            summary.mark_failed(format!("report export task panicked: {}", e));
            if let Err(e) = queue.publish_summary(&summary).await {
                error!("Failed to update job status: {:#}", e);
            }
            return;
        }
    };

    match result {
        Ok(path) => {
            job.mark_complete();
            if let Err(e) = queue.update_status(&job).await {
                error!("Failed to update job status: {:#}", e);
            }
            info!(
                job_id = %job.job_id,
                path = %path.display(),
                duration_ms = ?job.processing_duration_ms(),
                "Job completed"
            );
        }
        Err(e) if is_permanent(&e) => {
            let error_msg = format!("{:#}", e);
            error!(job_id = %job.job_id, error = %error_msg, "Job failed, not retrying");
            job.mark_failed(error_msg);
            if let Err(e) = queue.update_status(&job).await {
                error!("Failed to update job status: {:#}", e);
            }
        }
        Err(e) => {
            let error_msg = format!("{:#}", e);
            error!(job_id = %job.job_id, error = %error_msg, "Job failed");
            job.mark_failed(error_msg);

            match queue.retry_job(job.clone()).await {
                Ok(true) => info!(
                    job_id = %job.job_id,
                    retry_count = job.retry_count + 1,
                    "Job re-queued for retry"
                ),
                Ok(false) => warn!(job_id = %job.job_id, "Job failed permanently, max retries exceeded"),
                Err(e) => error!("Failed to retry job: {:#}", e),
            }
        }
    }

    telemetry::record_job_telemetry(&job);
}
