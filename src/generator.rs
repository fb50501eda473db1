//! Report generation: runs normalization, formatting, pagination and
//! assembly for one request and collects the warnings of every stage.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::assembler::{DocumentAssembler, DocumentMeta};
use crate::config::ReportConfig;
use crate::error::{ErrorKind, FormatError, ReportError, ReportResult};
use crate::formatter::RecordFormatter;
use crate::normalizer::{ImageNormalizer, NormalizedImage};
use crate::paginator::{paginate, RunningMatter};
use crate::record::{Attachment, LogRecord};
use crate::report::{suggested_filename, ReportOutput, ReportRequest, ReportWarning};

/// Renders [`ReportRequest`]s into PDF documents.
///
/// A generator holds no per-request state and can be shared between
/// threads; every call to [`generate`](Self::generate) is independent.
#[derive(Clone)]
pub struct ReportGenerator {
    config: Arc<ReportConfig>,
    normalizer: ImageNormalizer,
}

impl ReportGenerator {
    pub fn new(config: Arc<ReportConfig>) -> Self {
        let normalizer = ImageNormalizer::new(Arc::clone(&config));
        Self { config, normalizer }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Renders `request` into a single PDF.
    ///
    /// Invalid records and failed attachments are skipped and reported as
    /// warnings. The call fails only when no record can be rendered or the
    /// document itself cannot be assembled, which includes a configuration
    /// that [`ReportConfig::validate`] rejects.
    pub fn generate(&self, request: &ReportRequest) -> ReportResult<ReportOutput> {
        let started = Instant::now();
        self.config
            .validate()
            .map_err(|e| ReportError::Assembly(format!("{:#}", e)))?;
        let formatter = RecordFormatter::new(&self.config);

        // Validate first so attachments of rejected records are never decoded.
        let checked: Vec<Result<&LogRecord, FormatError>> = request
            .records
            .iter()
            .map(|record| formatter.validate(record).map(|_| record))
            .collect();

        let attachments: Vec<&Attachment> = checked
            .iter()
            .filter_map(|record| record.as_ref().ok())
            .flat_map(|record| record.attachments.iter())
            .collect();
        debug!(attachments = attachments.len(), "Normalizing attachments");
        let mut images = self.normalizer.normalize_all(&attachments).into_iter();

        let mut warnings = Vec::new();
        let mut blocks = Vec::new();
        let mut rendered = 0usize;

        for checked in checked {
            let record = match checked {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid record");
                    warnings.push(invalid_record_warning(&e));
                    continue;
                }
            };

            let record_images: Vec<_> = images.by_ref().take(record.attachments.len()).collect();
            match formatter.format(record, record_images) {
                Ok(formatted) => {
                    for warning in &formatted.warnings {
                        warn!(
                            record_id = warning.record_id.as_deref().unwrap_or_default(),
                            attachment = warning.attachment_index,
                            kind = %warning.kind,
                            reason = %warning.reason,
                            "Attachment omitted"
                        );
                    }
                    warnings.extend(formatted.warnings);
                    blocks.extend(formatted.blocks);
                    rendered += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping invalid record");
                    warnings.push(invalid_record_warning(&e));
                }
            }
        }

        if rendered == 0 {
            let skipped = request.records.len();
            warn!(skipped, "No renderable records");
            return Err(ReportError::EmptyReport { skipped });
        }

        let logo = self.normalize_logo(request, &mut warnings);
        let branding = &request.branding;
        let running = RunningMatter {
            organization: branding.organization.trim().to_string(),
            department: branding
                .department
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            report_title: self.config.report_title.clone(),
            generated_at: self.config.format_timestamp(&request.generated_at),
            has_logo: logo.is_some(),
        };

        let pages = paginate(blocks, self.config.page.content_height(), &running);
        let meta = DocumentMeta {
            title: self.config.report_title.clone(),
            author: running.organization.clone(),
            created_at: request.generated_at,
        };
        let document = DocumentAssembler::new(&self.config).assemble(&pages, logo.as_ref(), &meta)?;
        warnings.extend(document.warnings);

        let output = ReportOutput {
            pdf: document.bytes,
            warnings,
            page_count: document.page_count,
            record_count: rendered,
            filename: suggested_filename(&running.organization, request.generated_at.date_naive()),
        };

        info!(
            records = rendered,
            skipped = request.records.len() - rendered,
            pages = output.page_count,
            warnings = output.warnings.len(),
            bytes = output.pdf.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Report generated"
        );
        Ok(output)
    }

    fn normalize_logo(
        &self,
        request: &ReportRequest,
        warnings: &mut Vec<ReportWarning>,
    ) -> Option<NormalizedImage> {
        let logo = request.branding.logo.as_ref()?;
        match self.normalizer.normalize_logo(logo) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, "Organization logo omitted");
                warnings.push(ReportWarning::branding(e.kind(), e.to_string()));
                None
            }
        }
    }
}

fn invalid_record_warning(error: &FormatError) -> ReportWarning {
    match error {
        FormatError::InvalidRecord { record_id, reason } => {
            ReportWarning::record(record_id, ErrorKind::InvalidRecord, reason.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::test_images::jpeg;
    use crate::report::Branding;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn record(id: &str, title: &str, category: &str) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            location: "Gym".to_string(),
            description: "Details of the incident.".to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
            created_by: "staff@example.org".to_string(),
            attachments: Vec::new(),
        }
    }

    fn request(records: Vec<LogRecord>) -> ReportRequest {
        ReportRequest {
            records,
            branding: Branding::new("South Dade Academy"),
            generated_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap(),
        }
    }

    fn generator() -> ReportGenerator {
        ReportGenerator::new(Arc::new(ReportConfig::default()))
    }

    #[test]
    fn test_invalid_record_is_skipped_with_warning() {
        let mut a = record("A", "Leak", "Plumbing");
        a.attachments = vec![Attachment::new("image/jpeg", jpeg(120, 80))];
        let b = record("B", "", "HVAC");

        let output = generator().generate(&request(vec![a, b])).unwrap();
        assert!(output.pdf.starts_with(b"%PDF-"));
        assert_eq!(output.record_count, 1);
        assert_eq!(output.page_count, 1);
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].record_id.as_deref(), Some("B"));
        assert_eq!(output.warnings[0].kind, ErrorKind::InvalidRecord);
        assert_eq!(output.filename, "South-Dade-Academy-MaintenanceReport-2026-03-02.pdf");
    }

    #[test]
    fn test_all_invalid_is_empty_report() {
        let result = generator().generate(&request(vec![
            record("A", "", "Plumbing"),
            record("B", "Broken", "Gardening"),
        ]));
        assert_eq!(result.unwrap_err(), ReportError::EmptyReport { skipped: 2 });
    }

    #[test]
    fn test_no_records_is_empty_report() {
        let result = generator().generate(&request(Vec::new()));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::EmptyReport);
    }

    #[test]
    fn test_attachments_are_matched_to_their_records() {
        let mut a = record("A", "Leak", "Plumbing");
        a.attachments = vec![Attachment::new("text/plain", b"not an image".to_vec())];
        let invalid = {
            let mut r = record("X", "", "Other");
            r.attachments = vec![Attachment::new("text/plain", b"ignored".to_vec())];
            r
        };
        let mut c = record("C", "Outlet sparks", "Electrical");
        c.attachments = vec![
            Attachment::new("image/jpeg", jpeg(64, 64)),
            Attachment::new("image/jpeg", vec![1, 2, 3]),
        ];

        let output = generator().generate(&request(vec![a, invalid, c])).unwrap();
        let summary: Vec<String> = output.warnings.iter().map(|w| w.to_string()).collect();
        assert_eq!(
            summary,
            vec!["A#1: UnsupportedFormat", "X: InvalidRecord", "C#2: DecodeFailed"]
        );
        assert_eq!(output.record_count, 2);
    }

    #[test]
    fn test_bad_timestamp_format_fails_without_panic() {
        let config = ReportConfig {
            timestamp_format: "%Q".to_string(),
            ..ReportConfig::default()
        };
        let generator = ReportGenerator::new(Arc::new(config));

        let err = generator
            .generate(&request(vec![record("A", "Leak", "Plumbing")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssemblyError);
        assert!(err.to_string().contains("timestamp_format"));
    }

    #[test]
    fn test_bad_logo_is_a_warning() {
        let mut req = request(vec![record("A", "Leak", "Plumbing")]);
        req.branding.logo = Some(Attachment::new("image/png", vec![0, 1, 2]));

        let output = generator().generate(&req).unwrap();
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].record_id, None);
        assert_eq!(output.warnings[0].kind, ErrorKind::DecodeFailed);
    }
}
