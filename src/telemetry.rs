//! Telemetry and structured logging for the export worker.

use crate::job::{JobStatus, ReportExportJob};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "report-export-worker";

/// Jobs slower than this are logged as a warning.
const SLOW_JOB_THRESHOLD_MS: i64 = 5000;

/// Records telemetry for a completed or failed job.
///
/// Emits a `report_export_job` span carrying the job id, status, retry
/// count, record and page counts, the number of warnings and, for failed
/// jobs, the error message.
///
/// # Arguments
///
/// * `job` - The completed or failed job
pub fn record_job_telemetry(job: &ReportExportJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("report_export_job");

    span.set_attribute(KeyValue::new("job_id", job.job_id.clone()));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("retry_count", job.retry_count as i64));
    span.set_attribute(KeyValue::new("record_count", job.request.records.len() as i64));
    span.set_attribute(KeyValue::new("warning_count", job.warnings.len() as i64));
    if let Some(page_count) = job.page_count {
        span.set_attribute(KeyValue::new("page_count", page_count as i64));
    }

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.job_id,
            duration_ms = duration_ms,
            status = %job.status,
            pages = ?job.page_count,
            warnings = job.warnings.len(),
            "Report export job finished"
        );

        if duration_ms > SLOW_JOB_THRESHOLD_MS {
            warn!(
                job_id = %job.job_id,
                duration_ms = duration_ms,
                "Report export exceeded performance threshold ({}ms)",
                SLOW_JOB_THRESHOLD_MS
            );
        }
    }

    if job.status == JobStatus::Failed {
        if let Some(ref error) = job.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
            warn!(
                job_id = %job.job_id,
                error = %error,
                retry_count = job.retry_count,
                "Report export job failed"
            );
        }
    }

    span.end();
}

/// Records a worker heartbeat with the current queue length.
///
/// # Arguments
///
/// * `queue_length` - Current number of jobs in the queue
pub fn record_worker_heartbeat(queue_length: usize) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("worker_heartbeat");

    span.set_attribute(KeyValue::new("queue_length", queue_length as i64));
    span.end();

    info!(queue_length = queue_length, "Worker heartbeat");
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Call once at worker startup, inside the tokio runtime. Reads:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - service name (default: report-export-worker)
///
/// # Returns
///
/// An error if the OTLP pipeline cannot be installed; the worker keeps
/// running with the no-op tracer in that case.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!(endpoint = %endpoint, "Telemetry initialized");
    Ok(())
}
