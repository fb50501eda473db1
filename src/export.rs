//! Export boundary: renders a job's request and writes the PDF to disk.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{ReportError, ReportResult};
use crate::generator::ReportGenerator;
use crate::job::ReportExportJob;
use crate::report::{ReportOutput, ReportRequest};

/// Something that can turn a request into a finished report.
#[cfg_attr(test, mockall::automock)]
pub trait ReportRenderer: Send + Sync {
    fn render(&self, request: &ReportRequest) -> ReportResult<ReportOutput>;
}

impl ReportRenderer for ReportGenerator {
    fn render(&self, request: &ReportRequest) -> ReportResult<ReportOutput> {
        self.generate(request)
    }
}

/// Renders `job` and writes the PDF into its output directory.
///
/// The file is written to a temporary name and renamed into place, so a
/// reader never sees a partial PDF. The on-disk name is the report's
/// suggested filename with the job id appended, so two jobs writing to the
/// same directory on the same day keep separate files.
///
/// # Arguments
///
/// * `job` - The job to run; updated with the output path, page count and warnings
/// * `renderer` - Renders the job's request
/// * `default_dir` - Directory used when the job names none
///
/// # Returns
///
/// The path of the written PDF.
pub fn run_export<R>(job: &mut ReportExportJob, renderer: &R, default_dir: &Path) -> Result<PathBuf>
where
    R: ReportRenderer + ?Sized,
{
    let output = renderer.render(&job.request)?;

    let dir = job
        .output_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_dir.to_path_buf());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = dir.join(output_filename(output.suggested_filename(), &job.job_id));
    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(&output.pdf).context("Failed to write PDF")?;
    file.persist(&path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write PDF to {}", path.display()))?;

    info!(
        job_id = %job.job_id,
        path = %path.display(),
        pages = output.page_count,
        warnings = %output.warnings_header(),
        "Report written"
    );

    job.output_file = Some(path.display().to_string());
    job.page_count = Some(output.page_count);
    job.warnings = output.warnings;
    Ok(path)
}

fn output_filename(suggested: &str, job_id: &str) -> String {
    let stem = suggested.strip_suffix(".pdf").unwrap_or(suggested);
    format!("{}-{}.pdf", stem, job_id)
}

/// Whether a failed export would fail again on retry. Report errors depend
/// only on the request; anything else (I/O, Redis) may be transient.
pub fn is_permanent(error: &anyhow::Error) -> bool {
    error.downcast_ref::<ReportError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::report::{Branding, ReportWarning};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn job(output_dir: Option<&Path>) -> ReportExportJob {
        ReportExportJob::new(
            ReportRequest {
                records: Vec::new(),
                branding: Branding::new("South Dade Academy"),
                generated_at: Utc::now(),
            },
            output_dir.map(|d| d.display().to_string()),
        )
    }

    fn output() -> ReportOutput {
        ReportOutput {
            pdf: b"%PDF-1.7 test".to_vec(),
            warnings: vec![ReportWarning::record("B", ErrorKind::InvalidRecord, "title is empty")],
            page_count: 2,
            record_count: 1,
            filename: "South-Dade-Academy-MaintenanceReport-2026-03-02.pdf".to_string(),
        }
    }

    #[test]
    fn test_writes_pdf_and_updates_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = MockReportRenderer::new();
        renderer.expect_render().times(1).returning(|_| Ok(output()));

        let mut job = job(Some(dir.path()));
        let path = run_export(&mut job, &renderer, Path::new("/nonexistent")).unwrap();

        let expected = format!("South-Dade-Academy-MaintenanceReport-2026-03-02-{}.pdf", job.job_id);
        assert_eq!(path, dir.path().join(expected));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 test");
        assert_eq!(job.page_count, Some(2));
        assert_eq!(job.warnings.len(), 1);
        assert_eq!(job.output_file, Some(path.display().to_string()));
        // Only the final file remains.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_jobs_in_same_directory_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = MockReportRenderer::new();
        let mut calls = 0;
        renderer.expect_render().times(2).returning(move |_| {
            calls += 1;
            let mut output = output();
            output.pdf = format!("%PDF-1.7 report {}", calls).into_bytes();
            Ok(output)
        });

        let mut first = job(Some(dir.path()));
        let mut second = job(Some(dir.path()));
        let first_path = run_export(&mut first, &renderer, dir.path()).unwrap();
        let second_path = run_export(&mut second, &renderer, dir.path()).unwrap();

        assert_ne!(first_path, second_path);
        assert_eq!(std::fs::read(&first_path).unwrap(), b"%PDF-1.7 report 1");
        assert_eq!(std::fs::read(&second_path).unwrap(), b"%PDF-1.7 report 2");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_uses_default_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reports");
        let mut renderer = MockReportRenderer::new();
        renderer.expect_render().returning(|_| Ok(output()));

        let mut job = job(None);
        let path = run_export(&mut job, &renderer, &nested).unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn test_report_error_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = MockReportRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Err(ReportError::EmptyReport { skipped: 3 }));

        let mut job = job(Some(dir.path()));
        let err = run_export(&mut job, &renderer, dir.path()).unwrap_err();
        assert!(is_permanent(&err));
        assert_eq!(job.output_file, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_io_error_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut renderer = MockReportRenderer::new();
        renderer.expect_render().returning(|_| Ok(output()));

        let mut job = job(Some(&blocker.join("sub")));
        let err = run_export(&mut job, &renderer, dir.path()).unwrap_err();
        assert!(!is_permanent(&err));
    }
}
