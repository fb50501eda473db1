//! Report configuration.
//!
//! A [`ReportConfig`] is built once by the caller and passed by reference to
//! every pipeline stage. Missing fields fall back to their defaults when the
//! config is deserialized, so a partial JSON file is valid.

use anyhow::{bail, Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on normalization threads when the core count is not known
/// or very large.
const MAX_DEFAULT_WORKERS: usize = 4;

const DEFAULT_TIMESTAMP_FORMAT: &str = "%B %d, %Y at %I:%M %p";

/// Resampling filter used when downscaling attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResampleFilter> for FilterType {
    fn from(filter: ResampleFilter) -> Self {
        match filter {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Triangle => FilterType::Triangle,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
            ResampleFilter::Gaussian => FilterType::Gaussian,
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Physical page layout in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
    pub margin: f64,
    /// Band reserved at the top of every page for the running header.
    pub header_height: f64,
    /// Band reserved at the bottom of every page for the running footer.
    pub footer_height: f64,
}

impl Default for PageGeometry {
    fn default() -> Self {
        // US Letter, 0.6in margins
        Self {
            width: 612.0,
            height: 792.0,
            margin: 43.2,
            header_height: 56.0,
            footer_height: 36.0,
        }
    }
}

impl PageGeometry {
    pub fn content_width(&self) -> f64 {
        self.width - 2.0 * self.margin
    }

    /// Height available to blocks between the header and footer bands.
    pub fn content_height(&self) -> f64 {
        self.height - 2.0 * self.margin - self.header_height - self.footer_height
    }

    /// Y coordinate (PDF space, origin bottom-left) of the top of the content box.
    pub fn content_top(&self) -> f64 {
        self.height - self.margin - self.header_height
    }

    pub fn content_left(&self) -> f64 {
        self.margin
    }
}

/// Configuration for one export call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub max_attachment_bytes: usize,
    /// Longest side, in pixels, an embedded image may have.
    pub max_image_dimension: u32,
    pub supported_mime_types: Vec<String>,
    pub attachment_timeout_ms: u64,
    pub normalize_workers: usize,
    pub jpeg_quality: u8,
    pub resample_filter: ResampleFilter,
    /// Rendered size of one image pixel, in points.
    pub points_per_pixel: f64,
    pub page: PageGeometry,
    pub max_title_chars: usize,
    pub max_description_chars: usize,
    pub max_attachments_per_record: usize,
    pub report_title: String,
    /// chrono format string for timestamps printed in the report.
    pub timestamp_format: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: 5 * 1024 * 1024,
            max_image_dimension: 1600,
            supported_mime_types: [
                "image/jpeg",
                "image/jpg",
                "image/pjpeg",
                "image/png",
                "image/gif",
                "image/webp",
                "image/bmp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            attachment_timeout_ms: 5000,
            normalize_workers: default_workers(),
            jpeg_quality: 85,
            resample_filter: ResampleFilter::Lanczos3,
            points_per_pixel: 72.0 / 150.0,
            page: PageGeometry::default(),
            max_title_chars: 200,
            max_description_chars: 5000,
            max_attachments_per_record: 5,
            report_title: "Maintenance Service Report".to_string(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

impl ReportConfig {
    /// Loads a JSON config file. Fields absent from the file keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report config {}", path.display()))?;
        let config: ReportConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse report config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid report config {}", path.display()))?;
        Ok(config)
    }

    /// Rejects settings no report could be rendered with.
    ///
    /// # Returns
    ///
    /// An error naming the first bad field: an unparsable
    /// `timestamp_format` or a page geometry without a content area.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_timestamp_format(&self.timestamp_format) {
            bail!("timestamp_format {:?} is not a valid chrono format", self.timestamp_format);
        }
        if self.page.content_width() <= 0.0 || self.page.content_height() <= 0.0 {
            bail!(
                "page geometry leaves no content area ({:.1} x {:.1} pt)",
                self.page.content_width(),
                self.page.content_height()
            );
        }
        Ok(())
    }

    /// Formats `at` with `timestamp_format`, or with the default format when
    /// the configured one does not parse.
    pub fn format_timestamp(&self, at: &DateTime<Utc>) -> String {
        let format = if is_valid_timestamp_format(&self.timestamp_format) {
            self.timestamp_format.as_str()
        } else {
            DEFAULT_TIMESTAMP_FORMAT
        };
        at.format(format).to_string()
    }

    pub fn attachment_timeout(&self) -> Duration {
        Duration::from_millis(self.attachment_timeout_ms)
    }

    /// Case-insensitive check against the configured MIME allow-list.
    pub fn is_supported_mime(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.trim();
        self.supported_mime_types
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(mime_type))
    }
}

fn is_valid_timestamp_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
