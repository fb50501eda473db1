//! PDF document assembly with pdf-writer.
//!
//! The assembler owns the writer for the whole document: it allocates object
//! ids, draws every page from its blocks and stamp, embeds images as DCT
//! XObjects and finalizes the byte stream. An image that cannot be embedded
//! is replaced by a placeholder and reported; it never fails the document.

use chrono::{DateTime, Datelike, Timelike, Utc};
use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use pdf_writer::{Date, Filter, Finish, Name, Pdf, Rect, Ref, TextStr};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::canvas::{
    PdfCanvas, DARK_GRAY, LIGHT_GRAY, MEDIUM_GRAY, MUTED_GRAY, PRIMARY_BLUE, SECONDARY_BLUE, WHITE,
};
use crate::config::{PageGeometry, ReportConfig};
use crate::error::{ErrorKind, ReportError, ReportResult};
use crate::formatter::{
    BlockContent, DescriptionBlock, HeaderBlock, ImageBlock, BADGE_HEIGHT, BADGE_SIZE, BLOCK_GAP,
    BODY_LEADING, BODY_SIZE, CAPTION_GAP, CAPTION_LEADING, CAPTION_SIZE, LABEL_COLUMN, LABEL_SIZE,
    PADDING, ROW_LEADING, SECTION_BAR_HEIGHT, SECTION_SIZE, TITLE_LEADING, TITLE_ROW_GAP,
    TITLE_SIZE, VALUE_SIZE,
};
use crate::normalizer::NormalizedImage;
use crate::paginator::{Page, PageStamp};
use crate::report::ReportWarning;
use crate::text::Font;

const PRODUCER: &str = concat!("report-export ", env!("CARGO_PKG_VERSION"));
const LOGO_NAME: &[u8] = b"Logo";
const LOGO_MAX_WIDTH: f64 = 120.0;

/// Document-level metadata written to the info dictionary.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Final PDF bytes plus warnings raised while writing.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub warnings: Vec<ReportWarning>,
}

/// Sequential indirect object ids.
struct RefAllocator {
    next: i32,
}

impl RefAllocator {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn next(&mut self) -> Ref {
        let id = Ref::new(self.next);
        self.next += 1;
        id
    }
}

/// Image properties read back from an embedded JPEG stream.
struct JpegInfo {
    width: u32,
    height: u32,
    gray: bool,
}

pub struct DocumentAssembler<'a> {
    config: &'a ReportConfig,
}

impl<'a> DocumentAssembler<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    /// Writes `pages` in order and returns the finished document.
    ///
    /// # Errors
    ///
    /// `EmptyReport` when there are no pages, `Assembly` when the configured
    /// page geometry leaves no room for content.
    pub fn assemble(
        &self,
        pages: &[Page],
        logo: Option<&NormalizedImage>,
        meta: &DocumentMeta,
    ) -> ReportResult<AssembledDocument> {
        let geometry = self.config.page;
        if geometry.content_width() <= 0.0 || geometry.content_height() <= 0.0 {
            return Err(ReportError::Assembly(format!(
                "page {}x{} with margin {} leaves no content area",
                geometry.width, geometry.height, geometry.margin
            )));
        }
        if pages.is_empty() {
            return Err(ReportError::EmptyReport { skipped: 0 });
        }

        let mut pdf = Pdf::new();
        let mut refs = RefAllocator::new();
        let mut warnings = Vec::new();

        let catalog_id = refs.next();
        let tree_id = refs.next();
        let info_id = refs.next();
        let regular_id = refs.next();
        let bold_id = refs.next();

        pdf.catalog(catalog_id).pages(tree_id);
        write_info(&mut pdf, info_id, meta);
        for (id, font) in [(regular_id, Font::Regular), (bold_id, Font::Bold)] {
            pdf.type1_font(id)
                .base_font(font.base_font())
                .encoding_predefined(Name(b"WinAnsiEncoding"));
        }

        let logo = match logo {
            Some(image) => match probe_jpeg(image) {
                Ok(info) => {
                    let id = refs.next();
                    embed_jpeg(&mut pdf, id, image, &info);
                    Some((id, image.width as f64 / image.height as f64))
                }
                Err(reason) => {
                    warn!(reason = %reason, "Logo could not be embedded");
                    warnings.push(ReportWarning::branding(ErrorKind::AssemblyError, reason));
                    None
                }
            },
            None => None,
        };

        let mut page_ids = Vec::with_capacity(pages.len());
        let mut image_counter = 0usize;

        for page in pages {
            let page_id = refs.next();
            let content_id = refs.next();
            let mut canvas = PdfCanvas::new();
            let mut page_images: Vec<(String, Ref)> = Vec::new();

            self.draw_running_header(&mut canvas, &page.stamp, logo.map(|(_, aspect)| aspect));
            self.draw_running_footer(&mut canvas, &page.stamp);

            let mut top = geometry.content_top();
            for block in &page.blocks {
                match &block.content {
                    BlockContent::Header(header) => self.draw_header(&mut canvas, top, block.height, header),
                    BlockContent::Description(description) => {
                        self.draw_description(&mut canvas, top, block.height, description)
                    }
                    BlockContent::Image(image_block) => match probe_jpeg(&image_block.image) {
                        Ok(info) => {
                            image_counter += 1;
                            let name = format!("Im{}", image_counter);
                            let id = refs.next();
                            embed_jpeg(&mut pdf, id, &image_block.image, &info);
                            self.draw_image(&mut canvas, top, image_block, Some(Name(name.as_bytes())));
                            page_images.push((name, id));
                        }
                        Err(reason) => {
                            warn!(
                                record_id = %block.record_id,
                                attachment = image_block.attachment_index,
                                reason = %reason,
                                "Image replaced with placeholder"
                            );
                            warnings.push(ReportWarning::attachment(
                                &block.record_id,
                                image_block.attachment_index,
                                ErrorKind::AssemblyError,
                                format!("image unavailable: {}", reason),
                            ));
                            self.draw_image(&mut canvas, top, image_block, None);
                        }
                    },
                }
                top -= block.height;
            }

            pdf.stream(content_id, &canvas.finish());

            let mut page_writer = pdf.page(page_id);
            page_writer
                .media_box(Rect::new(0.0, 0.0, geometry.width as f32, geometry.height as f32))
                .parent(tree_id)
                .contents(content_id);
            let mut resources = page_writer.resources();
            resources
                .fonts()
                .pair(Font::Regular.resource_name(), regular_id)
                .pair(Font::Bold.resource_name(), bold_id);
            if logo.is_some() || !page_images.is_empty() {
                let mut x_objects = resources.x_objects();
                if let Some((logo_id, _)) = logo {
                    x_objects.pair(Name(LOGO_NAME), logo_id);
                }
                for (name, id) in &page_images {
                    x_objects.pair(Name(name.as_bytes()), *id);
                }
            }
            resources.finish();
            page_writer.finish();

            page_ids.push(page_id);
        }

        pdf.pages(tree_id)
            .kids(page_ids.iter().copied())
            .count(page_ids.len() as i32);

        let bytes = pdf.finish();
        debug!(
            pages = page_ids.len(),
            images = image_counter,
            bytes = bytes.len(),
            "Document assembled"
        );

        Ok(AssembledDocument {
            bytes,
            page_count: page_ids.len(),
            warnings,
        })
    }

    fn geometry(&self) -> PageGeometry {
        self.config.page
    }

    fn draw_running_header(&self, canvas: &mut PdfCanvas, stamp: &PageStamp, logo_aspect: Option<f64>) {
        let page = self.geometry();
        let left = page.content_left();
        let right = page.width - page.margin;
        let band_top = page.height - page.margin;
        let running = &stamp.running;

        let mut text_left = left;
        if let Some(aspect) = logo_aspect.filter(|_| running.has_logo) {
            let height = (page.header_height - 16.0).max(8.0);
            let mut width = height * aspect;
            let mut height = height;
            if width > LOGO_MAX_WIDTH {
                height *= LOGO_MAX_WIDTH / width;
                width = LOGO_MAX_WIDTH;
            }
            canvas.image(Name(LOGO_NAME), left, band_top - height, width, height);
            text_left += width + 8.0;
        }

        canvas.text(text_left, band_top - 16.0, Font::Bold, 14.0, PRIMARY_BLUE, &running.organization);
        if let Some(department) = &running.department {
            canvas.text(text_left, band_top - 29.0, Font::Regular, 9.0, MUTED_GRAY, department);
        }
        canvas.text_right(
            right,
            band_top - 16.0,
            Font::Bold,
            12.0,
            PRIMARY_BLUE,
            &running.report_title.to_uppercase(),
        );
        canvas.text_right(
            right,
            band_top - 29.0,
            Font::Regular,
            8.0,
            MUTED_GRAY,
            &format!("Generated {}", running.generated_at),
        );

        let rule_y = page.content_top() + 6.0;
        canvas.line(left, rule_y, right, rule_y, PRIMARY_BLUE, 1.5);
    }

    fn draw_running_footer(&self, canvas: &mut PdfCanvas, stamp: &PageStamp) {
        let page = self.geometry();
        let left = page.content_left();
        let right = page.width - page.margin;
        let rule_y = page.margin + page.footer_height - 8.0;
        let baseline = page.margin + 10.0;

        canvas.line(left, rule_y, right, rule_y, MEDIUM_GRAY, 0.75);
        canvas.text(
            left,
            baseline,
            Font::Regular,
            7.0,
            MUTED_GRAY,
            &format!("Generated on {}", stamp.running.generated_at),
        );
        canvas.text_centered(
            page.width / 2.0,
            baseline,
            Font::Bold,
            7.0,
            MUTED_GRAY,
            &format!("{} | CONFIDENTIAL", stamp.running.organization),
        );
        canvas.text_right(
            right,
            baseline,
            Font::Regular,
            8.0,
            DARK_GRAY,
            &format!("Page {} of {}", stamp.page_number, stamp.page_count),
        );
    }

    fn draw_header(&self, canvas: &mut PdfCanvas, top: f64, height: f64, header: &HeaderBlock) {
        let page = self.geometry();
        let left = page.content_left();
        let width = page.content_width();
        let box_height = height - BLOCK_GAP;

        canvas.fill_rect(left, top - box_height, width, box_height, LIGHT_GRAY);
        canvas.stroke_rect(left, top - box_height, width, box_height, MEDIUM_GRAY, 1.0);

        if let Some(badge) = header.badge {
            let badge_x = left + width - PADDING - header.badge_width;
            let badge_y = top - PADDING - BADGE_HEIGHT;
            canvas.fill_rect(badge_x, badge_y, header.badge_width, BADGE_HEIGHT, SECONDARY_BLUE);
            canvas.text_centered(
                badge_x + header.badge_width / 2.0,
                badge_y + (BADGE_HEIGHT - BADGE_SIZE * 0.7) / 2.0,
                Font::Bold,
                BADGE_SIZE,
                WHITE,
                badge,
            );
        }

        let mut line_top = top - PADDING;
        for line in &header.title_lines {
            canvas.text(left + PADDING, baseline(line_top, TITLE_LEADING), Font::Bold, TITLE_SIZE, PRIMARY_BLUE, line);
            line_top -= TITLE_LEADING;
        }
        if !header.title_lines.is_empty() {
            line_top -= TITLE_ROW_GAP;
        }

        for row in &header.rows {
            canvas.text(
                left + PADDING,
                baseline(line_top, ROW_LEADING),
                Font::Bold,
                LABEL_SIZE,
                SECONDARY_BLUE,
                row.label,
            );
            for value in &row.value_lines {
                canvas.text(
                    left + PADDING + LABEL_COLUMN,
                    baseline(line_top, ROW_LEADING),
                    Font::Regular,
                    VALUE_SIZE,
                    DARK_GRAY,
                    value,
                );
                line_top -= ROW_LEADING;
            }
        }
    }

    fn draw_description(&self, canvas: &mut PdfCanvas, top: f64, height: f64, description: &DescriptionBlock) {
        let page = self.geometry();
        let left = page.content_left();
        let width = page.content_width();
        let box_height = height - BLOCK_GAP;

        let label = if description.continued {
            "DETAILED DESCRIPTION (CONTINUED)"
        } else {
            "DETAILED DESCRIPTION"
        };
        canvas.fill_rect(left, top - SECTION_BAR_HEIGHT, width, SECTION_BAR_HEIGHT, PRIMARY_BLUE);
        canvas.text(
            left + PADDING,
            top - SECTION_BAR_HEIGHT + (SECTION_BAR_HEIGHT - SECTION_SIZE * 0.7) / 2.0,
            Font::Bold,
            SECTION_SIZE,
            WHITE,
            label,
        );
        canvas.stroke_rect(left, top - box_height, width, box_height, MEDIUM_GRAY, 1.0);

        let mut line_top = top - SECTION_BAR_HEIGHT - PADDING;
        for line in &description.lines {
            canvas.text(left + PADDING, baseline(line_top, BODY_LEADING), Font::Regular, BODY_SIZE, DARK_GRAY, line);
            line_top -= BODY_LEADING;
        }
    }

    /// Draws an image block. `name` is None when the image could not be
    /// embedded; a placeholder of the same size is drawn instead.
    fn draw_image(&self, canvas: &mut PdfCanvas, top: f64, block: &ImageBlock, name: Option<Name<'_>>) {
        let page = self.geometry();
        let left = page.content_left();
        let width = page.content_width();

        // A block taller than the page sits alone on it; shrink to fit.
        let chrome = PADDING + CAPTION_GAP + CAPTION_LEADING + PADDING + BLOCK_GAP;
        let max_height = (page.content_height() - chrome).max(1.0);
        let (mut image_width, mut image_height) = (block.width, block.height);
        if image_height > max_height {
            image_width *= max_height / image_height;
            image_height = max_height;
        }

        let box_height = PADDING + image_height + CAPTION_GAP + CAPTION_LEADING + PADDING;
        canvas.stroke_rect(left, top - box_height, width, box_height, MEDIUM_GRAY, 1.0);

        let x = left + (width - image_width) / 2.0;
        let y = top - PADDING - image_height;
        match name {
            Some(name) => canvas.image(name, x, y, image_width, image_height),
            None => {
                canvas.fill_rect(x, y, image_width, image_height, MEDIUM_GRAY);
                canvas.text_centered(
                    x + image_width / 2.0,
                    y + image_height / 2.0,
                    Font::Bold,
                    10.0,
                    MUTED_GRAY,
                    "Image unavailable",
                );
            }
        }

        canvas.text_centered(
            left + width / 2.0,
            baseline(y - CAPTION_GAP, CAPTION_LEADING),
            Font::Regular,
            CAPTION_SIZE,
            MUTED_GRAY,
            &block.caption,
        );
    }
}

/// Baseline of a text line whose slot starts at `line_top`.
fn baseline(line_top: f64, leading: f64) -> f64 {
    line_top - leading * 0.75
}

fn write_info(pdf: &mut Pdf, id: Ref, meta: &DocumentMeta) {
    let created = meta.created_at;
    let date = Date::new(created.year().clamp(0, 9999) as u16)
        .month(created.month() as u8)
        .day(created.day() as u8)
        .hour(created.hour() as u8)
        .minute(created.minute() as u8)
        .second(created.second() as u8)
        .utc_offset_hour(0);
    pdf.document_info(id)
        .title(TextStr(&meta.title))
        .author(TextStr(&meta.author))
        .producer(TextStr(PRODUCER))
        .creation_date(date);
}

/// Checks that `image` holds a complete JPEG matching its declared size.
fn probe_jpeg(image: &NormalizedImage) -> Result<JpegInfo, String> {
    let data = &image.data;
    if !data.starts_with(&[0xFF, 0xD8]) || !data.ends_with(&[0xFF, 0xD9]) {
        return Err("not a complete JPEG stream".to_string());
    }

    let decoder = ImageReader::with_format(Cursor::new(data.as_slice()), ImageFormat::Jpeg)
        .into_decoder()
        .map_err(|e| format!("unreadable JPEG header: {}", e))?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 || (width, height) != (image.width, image.height) {
        return Err(format!(
            "JPEG is {}x{}, expected {}x{}",
            width, height, image.width, image.height
        ));
    }

    let gray = match decoder.color_type() {
        ColorType::L8 => true,
        ColorType::Rgb8 => false,
        other => return Err(format!("unsupported JPEG color type {:?}", other)),
    };
    Ok(JpegInfo { width, height, gray })
}

fn embed_jpeg(pdf: &mut Pdf, id: Ref, image: &NormalizedImage, info: &JpegInfo) {
    let mut xobject = pdf.image_xobject(id, &image.data);
    xobject.filter(Filter::DctDecode);
    xobject.width(info.width as i32);
    xobject.height(info.height as i32);
    if info.gray {
        xobject.color_space().device_gray();
    } else {
        xobject.color_space().device_rgb();
    }
    xobject.bits_per_component(8);
    xobject.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{PageBlock, RecordFormatter};
    use crate::record::LogRecord;
    use crate::normalizer::test_images::jpeg;
    use crate::paginator::{paginate, RunningMatter};
    use chrono::TimeZone;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            title: "Maintenance Service Report".to_string(),
            author: "South Dade Academy".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap(),
        }
    }

    fn running() -> RunningMatter {
        RunningMatter {
            organization: "South Dade Academy".to_string(),
            department: Some("Facilities Management".to_string()),
            report_title: "Maintenance Service Report".to_string(),
            generated_at: "March 02, 2026 at 02:30 PM".to_string(),
            has_logo: false,
        }
    }

    fn image_block(record_id: &str, image: NormalizedImage) -> PageBlock {
        PageBlock {
            record_id: record_id.to_string(),
            height: 200.0,
            content: BlockContent::Image(ImageBlock {
                attachment_index: 0,
                width: 120.0,
                height: 90.0,
                caption: "Photo 1 of 1".to_string(),
                image,
            }),
        }
    }

    fn text_block(record_id: &str) -> PageBlock {
        PageBlock {
            record_id: record_id.to_string(),
            height: 80.0,
            content: BlockContent::Description(DescriptionBlock {
                lines: vec!["Water under the sink".to_string()],
                continued: false,
            }),
        }
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn test_assembles_valid_pdf() {
        let config = ReportConfig::default();
        let valid = NormalizedImage {
            data: jpeg(64, 48),
            width: 64,
            height: 48,
        };
        let pages = paginate(
            vec![text_block("A"), image_block("A", valid)],
            config.page.content_height(),
            &running(),
        );

        let doc = DocumentAssembler::new(&config).assemble(&pages, None, &meta()).unwrap();
        assert!(doc.bytes.starts_with(b"%PDF-"));
        assert!(doc.bytes.ends_with(b"%%EOF") || doc.bytes.ends_with(b"%%EOF\n"));
        assert_eq!(doc.page_count, 1);
        assert!(doc.warnings.is_empty());
        assert_eq!(count(&doc.bytes, b"/DCTDecode"), 1);
        assert_eq!(count(&doc.bytes, b"/Im1 Do"), 1);
        assert_eq!(count(&doc.bytes, b"/Helvetica-Bold"), 1);
    }

    #[test]
    fn test_long_description_stays_inside_content_area() {
        let config = ReportConfig::default();
        let record = LogRecord {
            id: "A".to_string(),
            title: "Boiler restart".to_string(),
            category: "HVAC".to_string(),
            description: (1..=80).map(|n| format!("Step {} done\n", n)).collect(),
            created_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
            ..LogRecord::default()
        };
        let blocks = RecordFormatter::new(&config).format(&record, Vec::new()).unwrap().blocks;
        let pages = paginate(blocks, config.page.content_height(), &running());
        assert!(pages.len() >= 3);
        assert!(pages
            .iter()
            .all(|p| p.used_height() <= config.page.content_height()));

        let doc = DocumentAssembler::new(&config).assemble(&pages, None, &meta()).unwrap();
        assert_eq!(doc.page_count, pages.len());
        assert_eq!(count(&doc.bytes, b"(Step 1 done)"), 1);
        assert_eq!(count(&doc.bytes, b"(Step 80 done)"), 1);
        assert_eq!(count(&doc.bytes, b"CONTINUED"), 2);
    }

    #[test]
    fn test_corrupt_image_becomes_placeholder() {
        let config = ReportConfig::default();
        let corrupt = NormalizedImage {
            data: vec![0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9],
            width: 64,
            height: 48,
        };
        let pages = paginate(
            vec![text_block("A"), image_block("A", corrupt)],
            config.page.content_height(),
            &running(),
        );

        let doc = DocumentAssembler::new(&config).assemble(&pages, None, &meta()).unwrap();
        assert!(doc.bytes.starts_with(b"%PDF-"));
        assert_eq!(count(&doc.bytes, b"/DCTDecode"), 0);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, ErrorKind::AssemblyError);
        assert_eq!(doc.warnings[0].record_id.as_deref(), Some("A"));
        assert_eq!(doc.warnings[0].attachment_index, Some(0));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mismatched = NormalizedImage {
            data: jpeg(64, 48),
            width: 100,
            height: 48,
        };
        assert!(probe_jpeg(&mismatched).is_err());
    }

    #[test]
    fn test_logo_is_embedded_once() {
        let config = ReportConfig::default();
        let logo = NormalizedImage {
            data: jpeg(80, 40),
            width: 80,
            height: 40,
        };
        let mut running = running();
        running.has_logo = true;
        let blocks = (0..20).map(|_| text_block("A")).collect();
        let pages = paginate(blocks, config.page.content_height(), &running);
        assert!(pages.len() > 1);

        let doc = DocumentAssembler::new(&config)
            .assemble(&pages, Some(&logo), &meta())
            .unwrap();
        assert_eq!(doc.page_count, pages.len());
        assert_eq!(count(&doc.bytes, b"/DCTDecode"), 1);
        assert_eq!(count(&doc.bytes, b"/Logo Do"), pages.len());
    }

    #[test]
    fn test_no_pages_is_empty_report() {
        let config = ReportConfig::default();
        let result = DocumentAssembler::new(&config).assemble(&[], None, &meta());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::EmptyReport);
    }

    #[test]
    fn test_degenerate_geometry_is_assembly_error() {
        let mut config = ReportConfig::default();
        config.page.margin = 400.0;
        let pages = paginate(vec![text_block("A")], 100.0, &running());
        let result = DocumentAssembler::new(&config).assemble(&pages, None, &meta());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::AssemblyError);
    }
}
