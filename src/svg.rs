//! SVG rasterization for organization logos via resvg.

use image::{DynamicImage, RgbImage};
use resvg::tiny_skia::{Pixmap, Transform};
use tracing::debug;

use crate::error::NormalizeError;

/// MIME type accepted for vector logos.
pub const SVG_MIME: &str = "image/svg+xml";

/// Rasterizes SVG documents onto a white background.
///
/// Logos are usually tiny in SVG user units, so the tree is scaled up until
/// its longest side reaches `target_dimension` pixels.
pub struct SvgRasterizer {
    target_dimension: u32,
}

impl SvgRasterizer {
    pub fn new(target_dimension: u32) -> Self {
        Self {
            target_dimension: target_dimension.max(1),
        }
    }

    /// Parses and renders `data` to an RGB image.
    ///
    /// # Errors
    ///
    /// `DecodeFailed` for malformed XML, zero-sized documents, or when the
    /// pixmap cannot be allocated.
    pub fn rasterize(&self, data: &[u8]) -> Result<DynamicImage, NormalizeError> {
        let tree = usvg::Tree::from_data(data, &usvg::Options::default())
            .map_err(|e| NormalizeError::DecodeFailed(format!("invalid SVG: {}", e)))?;

        let size = tree.size();
        if size.width() <= 0.0 || size.height() <= 0.0 {
            return Err(NormalizeError::DecodeFailed(format!(
                "invalid SVG dimensions: {}x{}",
                size.width(),
                size.height()
            )));
        }

        let scale = self.target_dimension as f32 / size.width().max(size.height());
        let width = ((size.width() * scale).round() as u32).max(1);
        let height = ((size.height() * scale).round() as u32).max(1);

        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            NormalizeError::DecodeFailed(format!("cannot allocate {}x{} pixmap", width, height))
        })?;
        resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

        debug!(
            svg_width = size.width(),
            svg_height = size.height(),
            width,
            height,
            "SVG rasterized"
        );

        // tiny-skia stores premultiplied RGBA; compositing over white is c + (255 - a).
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for px in pixmap.data().chunks_exact(4) {
            let inverse_alpha = 255 - px[3];
            rgb.push(px[0].saturating_add(inverse_alpha));
            rgb.push(px[1].saturating_add(inverse_alpha));
            rgb.push(px[2].saturating_add(inverse_alpha));
        }
        let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
            NormalizeError::DecodeFailed("pixmap size does not match buffer".to_string())
        })?;

        Ok(DynamicImage::ImageRgb8(image))
    }
}
