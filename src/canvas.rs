//! Thin drawing wrapper over a pdf-writer content stream.
//!
//! Coordinates are PDF user space: points, origin at the bottom-left.

use pdf_writer::{Content, Name, Str};

use crate::text::{encode_winansi, Font};

/// RGB color with components in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

pub const PRIMARY_BLUE: Color = Color::new(0.0, 0.2, 0.4); // #003366
pub const SECONDARY_BLUE: Color = Color::new(0.0, 0.4, 0.8); // #0066cc
pub const LIGHT_GRAY: Color = Color::new(0.961, 0.961, 0.961); // #f5f5f5
pub const MEDIUM_GRAY: Color = Color::new(0.878, 0.878, 0.878); // #e0e0e0
pub const DARK_GRAY: Color = Color::new(0.2, 0.2, 0.2); // #333333
pub const MUTED_GRAY: Color = Color::new(0.4, 0.4, 0.4); // #666666
pub const WHITE: Color = Color::new(1.0, 1.0, 1.0);

pub struct PdfCanvas {
    content: Content,
}

impl PdfCanvas {
    pub fn new() -> Self {
        Self {
            content: Content::new(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.content.finish()
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Color) {
        self.content.save_state();
        self.content.set_fill_rgb(color.r, color.g, color.b);
        self.content
            .rect(x as f32, y as f32, width as f32, height as f32);
        self.content.fill_nonzero();
        self.content.restore_state();
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Color, line_width: f64) {
        self.content.save_state();
        self.content.set_stroke_rgb(color.r, color.g, color.b);
        self.content.set_line_width(line_width as f32);
        self.content
            .rect(x as f32, y as f32, width as f32, height as f32);
        self.content.stroke();
        self.content.restore_state();
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: Color, line_width: f64) {
        self.content.save_state();
        self.content.set_stroke_rgb(color.r, color.g, color.b);
        self.content.set_line_width(line_width as f32);
        self.content.move_to(x1 as f32, y1 as f32);
        self.content.line_to(x2 as f32, y2 as f32);
        self.content.stroke();
        self.content.restore_state();
    }

    /// Draws one line of text with its baseline at `y`.
    pub fn text(&mut self, x: f64, y: f64, font: Font, size: f64, color: Color, text: &str) {
        if text.is_empty() {
            return;
        }
        let encoded = encode_winansi(text);
        self.content.set_fill_rgb(color.r, color.g, color.b);
        self.content.begin_text();
        self.content.set_font(font.resource_name(), size as f32);
        self.content.next_line(x as f32, y as f32);
        self.content.show(Str(&encoded));
        self.content.end_text();
    }

    /// Draws text right-aligned so that it ends at `right`.
    pub fn text_right(&mut self, right: f64, y: f64, font: Font, size: f64, color: Color, text: &str) {
        let width = font.text_width(text, size);
        self.text(right - width, y, font, size, color, text);
    }

    pub fn text_centered(&mut self, center: f64, y: f64, font: Font, size: f64, color: Color, text: &str) {
        let width = font.text_width(text, size);
        self.text(center - width / 2.0, y, font, size, color, text);
    }

    /// Paints an image XObject with its bottom-left corner at (x, y).
    pub fn image(&mut self, name: Name<'_>, x: f64, y: f64, width: f64, height: f64) {
        self.content.save_state();
        self.content
            .transform([width as f32, 0.0, 0.0, height as f32, x as f32, y as f32]);
        self.content.x_object(name);
        self.content.restore_state();
    }
}

impl Default for PdfCanvas {
    fn default() -> Self {
        Self::new()
    }
}
