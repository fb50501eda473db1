//! Record formatting: validate one log record and lay it out as measured blocks.
//!
//! Every block carries its full height (including the gap that follows it),
//! so the paginator can pack blocks without looking at their content.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ReportConfig;
use crate::error::{FormatError, NormalizeError};
use crate::normalizer::NormalizedImage;
use crate::record::{Category, LogRecord};
use crate::report::ReportWarning;
use crate::text::{wrap_text, Font};

pub(crate) const BLOCK_GAP: f64 = 12.0;
pub(crate) const PADDING: f64 = 10.0;

pub(crate) const TITLE_SIZE: f64 = 14.0;
pub(crate) const TITLE_LEADING: f64 = 18.0;
pub(crate) const TITLE_ROW_GAP: f64 = 6.0;

pub(crate) const BADGE_SIZE: f64 = 8.0;
pub(crate) const BADGE_HEIGHT: f64 = 14.0;
pub(crate) const BADGE_PAD_X: f64 = 6.0;
pub(crate) const BADGE_MARGIN: f64 = 8.0;

pub(crate) const LABEL_SIZE: f64 = 9.0;
pub(crate) const VALUE_SIZE: f64 = 10.0;
pub(crate) const ROW_LEADING: f64 = 14.0;
pub(crate) const LABEL_COLUMN: f64 = 100.0;

pub(crate) const SECTION_BAR_HEIGHT: f64 = 20.0;
pub(crate) const SECTION_SIZE: f64 = 10.0;
pub(crate) const BODY_SIZE: f64 = 11.0;
pub(crate) const BODY_LEADING: f64 = 16.0;

pub(crate) const CAPTION_SIZE: f64 = 9.0;
pub(crate) const CAPTION_LEADING: f64 = 14.0;
pub(crate) const CAPTION_GAP: f64 = 4.0;

/// One measured unit of page content.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBlock {
    pub record_id: String,
    /// Vertical space the block occupies, trailing gap included.
    pub height: f64,
    pub content: BlockContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockContent {
    Header(HeaderBlock),
    Description(DescriptionBlock),
    Image(ImageBlock),
}

/// Title and info rows of a record.
///
/// A header taller than the content area is split: later blocks carry no
/// badge and continue the title lines and rows where the previous one
/// stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock {
    pub badge: Option<&'static str>,
    pub badge_width: f64,
    pub title_lines: Vec<String>,
    pub rows: Vec<InfoRow>,
}

impl HeaderBlock {
    fn is_empty(&self) -> bool {
        self.title_lines.is_empty() && self.rows.is_empty()
    }

    fn row_lines(&self) -> usize {
        self.rows.iter().map(|r| r.value_lines.len()).sum()
    }

    fn height(&self) -> f64 {
        header_height(self.title_lines.len(), self.row_lines())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfoRow {
    pub label: &'static str,
    pub value_lines: Vec<String>,
}

/// A run of description lines under a section bar. Descriptions taller
/// than the content area are split into several blocks; all but the first
/// are marked `continued`.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionBlock {
    pub lines: Vec<String>,
    pub continued: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlock {
    /// Zero-based position of the source attachment.
    pub attachment_index: usize,
    pub image: NormalizedImage,
    /// Display size in points.
    pub width: f64,
    pub height: f64,
    pub caption: String,
}

/// Blocks for one record plus the warnings for attachments that were left out.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedRecord {
    pub blocks: Vec<PageBlock>,
    pub warnings: Vec<ReportWarning>,
}

/// Record fields after validation.
#[derive(Debug, Clone)]
pub struct ValidRecord<'r> {
    pub id: &'r str,
    pub title: &'r str,
    pub category: Category,
    pub location: &'r str,
    pub description: &'r str,
    pub created_at: DateTime<Utc>,
    pub created_by: &'r str,
}

pub struct RecordFormatter<'a> {
    config: &'a ReportConfig,
}

impl<'a> RecordFormatter<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    /// Checks the text fields of `record`.
    pub fn validate<'r>(&self, record: &'r LogRecord) -> Result<ValidRecord<'r>, FormatError> {
        let id = record.id.trim();
        if id.is_empty() {
            return Err(FormatError::invalid(&record.id, "record id is empty"));
        }

        let title = record.title.trim();
        if title.is_empty() {
            return Err(FormatError::invalid(id, "title is empty"));
        }
        if title.chars().count() > self.config.max_title_chars {
            return Err(FormatError::invalid(
                id,
                format!("title exceeds {} characters", self.config.max_title_chars),
            ));
        }

        let description = record.description.trim();
        if description.is_empty() {
            return Err(FormatError::invalid(id, "description is empty"));
        }
        if description.chars().count() > self.config.max_description_chars {
            return Err(FormatError::invalid(
                id,
                format!("description exceeds {} characters", self.config.max_description_chars),
            ));
        }

        let category = record
            .category
            .parse::<Category>()
            .map_err(|reason| FormatError::invalid(id, reason))?;

        let created_at = record
            .created_at
            .ok_or_else(|| FormatError::invalid(id, "creation timestamp is missing"))?;

        if record.attachments.len() > self.config.max_attachments_per_record {
            return Err(FormatError::invalid(
                id,
                format!(
                    "{} attachments, at most {} allowed",
                    record.attachments.len(),
                    self.config.max_attachments_per_record
                ),
            ));
        }

        Ok(ValidRecord {
            id,
            title,
            category,
            location: record.location.trim(),
            description,
            created_at,
            created_by: record.created_by.trim(),
        })
    }

    /// Lays out `record` as header blocks, description blocks and one
    /// block per normalized image.
    ///
    /// Text is split so that no header or description block is taller than
    /// the page content area.
    ///
    /// `images` holds one entry per attachment, in attachment order. Failed
    /// entries are omitted from the layout and reported as warnings.
    pub fn format(
        &self,
        record: &LogRecord,
        images: Vec<Result<NormalizedImage, NormalizeError>>,
    ) -> Result<FormattedRecord, FormatError> {
        let valid = self.validate(record)?;

        let mut blocks = self.header_blocks(&valid);
        blocks.extend(self.description_blocks(&valid));
        let mut warnings = Vec::new();

        let total = record.attachments.len().max(images.len());
        for (index, image) in images.into_iter().enumerate() {
            match image {
                Ok(image) => blocks.push(self.image_block(valid.id, image, index, total)),
                Err(e) => warnings.push(ReportWarning::attachment(
                    valid.id,
                    index,
                    e.kind(),
                    e.to_string(),
                )),
            }
        }

        debug!(
            record_id = valid.id,
            blocks = blocks.len(),
            omitted_images = warnings.len(),
            "Record formatted"
        );
        Ok(FormattedRecord { blocks, warnings })
    }

    fn content_width(&self) -> f64 {
        self.config.page.content_width()
    }

    fn content_height(&self) -> f64 {
        self.config.page.content_height()
    }

    fn header_blocks(&self, record: &ValidRecord<'_>) -> Vec<PageBlock> {
        let badge = record.category.badge_label();
        let badge_width = Font::Bold.text_width(badge, BADGE_SIZE) + 2.0 * BADGE_PAD_X;

        let inner_width = self.content_width() - 2.0 * PADDING;
        let title_width = inner_width - badge_width - BADGE_MARGIN;
        let title_lines = wrap_text(record.title, Font::Bold, TITLE_SIZE, title_width);

        let value_width = inner_width - LABEL_COLUMN;
        let row = |label: &'static str, value: &str| InfoRow {
            label,
            value_lines: wrap_text(value, Font::Regular, VALUE_SIZE, value_width),
        };
        let rows = vec![
            row("Report ID", record.id),
            row("Location", or_placeholder(record.location, "Not specified")),
            row("Reported by", or_placeholder(record.created_by, "Unknown")),
            row("Date reported", &self.config.format_timestamp(&record.created_at)),
        ];

        let limit = self.content_height();
        let mut parts = Vec::new();
        let mut current = HeaderBlock {
            badge: Some(badge),
            badge_width,
            title_lines: Vec::new(),
            rows: Vec::new(),
        };

        for line in title_lines {
            if !current.is_empty()
                && header_height(current.title_lines.len() + 1, current.row_lines()) > limit
            {
                parts.push(std::mem::replace(&mut current, continuation(badge_width)));
            }
            current.title_lines.push(line);
        }

        for info in rows {
            // Whether `current` already holds a piece of this row.
            let mut open = false;
            for value in info.value_lines {
                if !current.is_empty()
                    && header_height(current.title_lines.len(), current.row_lines() + 1) > limit
                {
                    parts.push(std::mem::replace(&mut current, continuation(badge_width)));
                    open = false;
                }
                if !open {
                    current.rows.push(InfoRow {
                        label: info.label,
                        value_lines: Vec::new(),
                    });
                    open = true;
                }
                if let Some(last) = current.rows.last_mut() {
                    last.value_lines.push(value);
                }
            }
        }
        parts.push(current);

        parts
            .into_iter()
            .map(|header| PageBlock {
                record_id: record.id.to_string(),
                height: header.height(),
                content: BlockContent::Header(header),
            })
            .collect()
    }

    fn description_blocks(&self, record: &ValidRecord<'_>) -> Vec<PageBlock> {
        let lines = wrap_text(
            record.description,
            Font::Regular,
            BODY_SIZE,
            self.content_width() - 2.0 * PADDING,
        );
        let chrome = SECTION_BAR_HEIGHT + PADDING + PADDING + BLOCK_GAP;
        let per_block = (((self.content_height() - chrome) / BODY_LEADING).floor().max(1.0)) as usize;

        lines
            .chunks(per_block)
            .enumerate()
            .map(|(index, chunk)| PageBlock {
                record_id: record.id.to_string(),
                height: chrome + chunk.len() as f64 * BODY_LEADING,
                content: BlockContent::Description(DescriptionBlock {
                    lines: chunk.to_vec(),
                    continued: index > 0,
                }),
            })
            .collect()
    }

    fn image_block(&self, record_id: &str, image: NormalizedImage, index: usize, total: usize) -> PageBlock {
        let (mut width, mut height) = image.rendered_size(self.config.points_per_pixel);
        let max_width = self.content_width() - 2.0 * PADDING;
        if width > max_width {
            height *= max_width / width;
            width = max_width;
        }

        let block_height = PADDING + height + CAPTION_GAP + CAPTION_LEADING + PADDING + BLOCK_GAP;
        PageBlock {
            record_id: record_id.to_string(),
            height: block_height,
            content: BlockContent::Image(ImageBlock {
                attachment_index: index,
                image,
                width,
                height,
                caption: format!("Photo {} of {}", index + 1, total),
            }),
        }
    }
}

fn header_height(title_lines: usize, row_lines: usize) -> f64 {
    let title_gap = if title_lines > 0 { TITLE_ROW_GAP } else { 0.0 };
    PADDING
        + title_lines as f64 * TITLE_LEADING
        + title_gap
        + row_lines as f64 * ROW_LEADING
        + PADDING
        + BLOCK_GAP
}

fn continuation(badge_width: f64) -> HeaderBlock {
    HeaderBlock {
        badge: None,
        badge_width,
        title_lines: Vec::new(),
        rows: Vec::new(),
    }
}

fn or_placeholder<'s>(value: &'s str, placeholder: &'s str) -> &'s str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}
