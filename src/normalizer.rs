//! Attachment normalization: decode, orient, downscale, re-encode as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::ReportConfig;
use crate::error::NormalizeError;
use crate::record::Attachment;
use crate::svg::{SvgRasterizer, SVG_MIME};

/// An attachment re-encoded for embedding. `data` is a baseline JPEG of
/// `width` x `height` pixels.
#[derive(Clone, PartialEq)]
pub struct NormalizedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    /// Size in points at the given pixel scale.
    pub fn rendered_size(&self, points_per_pixel: f64) -> (f64, f64) {
        (
            self.width as f64 * points_per_pixel,
            self.height as f64 * points_per_pixel,
        )
    }
}

impl std::fmt::Debug for NormalizedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Normalizes attachments according to a [`ReportConfig`].
///
/// Cloning is cheap; worker threads each hold a clone.
#[derive(Clone)]
pub struct ImageNormalizer {
    config: Arc<ReportConfig>,
}

impl ImageNormalizer {
    pub fn new(config: Arc<ReportConfig>) -> Self {
        Self { config }
    }

    /// Normalizes a single photo attachment.
    ///
    /// The declared MIME type must be on the allow-list, but the decoder is
    /// picked from the content, so a PNG labeled `image/jpeg` still decodes.
    /// Content whose detected type is not allowed is `UnsupportedFormat`.
    pub fn normalize(&self, attachment: &Attachment) -> Result<NormalizedImage, NormalizeError> {
        self.precheck(attachment)?;
        let declared = format_from_mime(&attachment.mime_type)
            .ok_or_else(|| NormalizeError::UnsupportedFormat(attachment.mime_type.clone()))?;
        let image = self.decode_oriented(&attachment.data, declared)?;
        self.finish(image)
    }

    /// Normalizes the organization logo. Accepts SVG in addition to the
    /// configured raster types.
    pub fn normalize_logo(&self, logo: &Attachment) -> Result<NormalizedImage, NormalizeError> {
        if logo.mime_type.trim().eq_ignore_ascii_case(SVG_MIME) {
            self.check_size(logo)?;
            let image = SvgRasterizer::new(self.config.max_image_dimension.min(512))
                .rasterize(&logo.data)?;
            return self.finish(image);
        }
        self.normalize(logo)
    }

    /// Normalizes many attachments on at most `normalize_workers` threads.
    ///
    /// Each attachment gets `attachment_timeout` from the moment its worker
    /// starts; one that runs over (or whose worker panics) yields
    /// `DecodeFailed`. A worker that ran over keeps its thread slot until it
    /// exits, so one call never has more than `normalize_workers` threads
    /// alive. If no slot frees up within `attachment_timeout`, the next
    /// attachment fails with `DecodeFailed` without starting a thread.
    /// Workers still running when the call returns finish in the background
    /// and their results are dropped.
    ///
    /// Results are in input order.
    pub fn normalize_all(
        &self,
        attachments: &[&Attachment],
    ) -> Vec<Result<NormalizedImage, NormalizeError>> {
        let workers = self.config.normalize_workers.max(1);
        let timeout = self.config.attachment_timeout();
        let (exit_tx, exit_rx) = mpsc::channel();
        let mut live = 0usize;
        let mut pending = Vec::with_capacity(attachments.len());

        for attachment in attachments {
            // Rejections that need no decoding are answered without a thread.
            if let Err(e) = self.precheck(attachment) {
                pending.push(Pending::Done(Err(e)));
                continue;
            }

            while live >= workers {
                match exit_rx.recv_timeout(timeout) {
                    Ok(()) => live -= 1,
                    Err(_) => break,
                }
            }
            if live >= workers {
                warn!(workers, "No normalization worker free");
                pending.push(Pending::Done(Err(NormalizeError::DecodeFailed(format!(
                    "no normalization worker free after {} ms",
                    timeout.as_millis()
                )))));
                continue;
            }

            match self.spawn_worker(attachment, ExitSignal(exit_tx.clone())) {
                Ok(rx) => {
                    live += 1;
                    pending.push(Pending::Running {
                        rx,
                        deadline: Instant::now() + timeout,
                    });
                }
                Err(e) => pending.push(Pending::Done(Err(e))),
            }
        }

        pending
            .into_iter()
            .map(|pending| match pending {
                Pending::Done(result) => result,
                Pending::Running { rx, deadline } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(remaining) {
                        Ok(result) => result,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(timeout_ms = timeout.as_millis() as u64, "Attachment normalization timed out");
                            Err(NormalizeError::DecodeFailed(format!(
                                "timed out after {} ms",
                                timeout.as_millis()
                            )))
                        }
                        Err(RecvTimeoutError::Disconnected) => Err(NormalizeError::DecodeFailed(
                            "normalization worker stopped unexpectedly".to_string(),
                        )),
                    }
                }
            })
            .collect()
    }

    fn spawn_worker(
        &self,
        attachment: &Attachment,
        exit: ExitSignal,
    ) -> Result<mpsc::Receiver<Result<NormalizedImage, NormalizeError>>, NormalizeError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let normalizer = self.clone();
        let attachment = attachment.clone();
        thread::Builder::new()
            .name("image-normalize".to_string())
            .spawn(move || {
                let _exit = exit;
                let _ = tx.send(normalizer.normalize(&attachment));
            })
            .map_err(|e| NormalizeError::DecodeFailed(format!("cannot start worker: {}", e)))?;
        Ok(rx)
    }

    fn precheck(&self, attachment: &Attachment) -> Result<(), NormalizeError> {
        self.check_size(attachment)?;
        if !self.config.is_supported_mime(&attachment.mime_type) {
            return Err(NormalizeError::UnsupportedFormat(attachment.mime_type.clone()));
        }
        Ok(())
    }

    fn check_size(&self, attachment: &Attachment) -> Result<(), NormalizeError> {
        let limit = self.config.max_attachment_bytes;
        if attachment.size() > limit {
            return Err(NormalizeError::AttachmentTooLarge {
                size: attachment.size(),
                limit,
            });
        }
        Ok(())
    }

    /// Downscale (never upscale), flatten alpha and encode as JPEG.
    fn finish(&self, image: DynamicImage) -> Result<NormalizedImage, NormalizeError> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(NormalizeError::DecodeFailed("image has no pixels".to_string()));
        }

        let max = self.config.max_image_dimension.max(1);
        let image = if orig_w > max || orig_h > max {
            image.resize(max, max, self.config.resample_filter.into())
        } else {
            image
        };

        let rgb = flatten_on_white(&image);
        let (width, height) = rgb.dimensions();

        let mut data = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut data, self.config.jpeg_quality.clamp(1, 100));
        DynamicImage::ImageRgb8(rgb)
            .write_with_encoder(encoder)
            .map_err(|e| NormalizeError::DecodeFailed(format!("JPEG encoding failed: {}", e)))?;

        debug!(orig_w, orig_h, width, height, bytes = data.len(), "Image normalized");
        Ok(NormalizedImage { data, width, height })
    }

    /// Decodes with the format detected from the content, falling back to
    /// `declared`, and applies the EXIF orientation, if any.
    fn decode_oriented(&self, data: &[u8], declared: ImageFormat) -> Result<DynamicImage, NormalizeError> {
        let mut reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| NormalizeError::DecodeFailed(e.to_string()))?;
        match reader.format() {
            Some(detected) if detected != declared => {
                let mime = detected.to_mime_type();
                if !self.config.is_supported_mime(mime) {
                    return Err(NormalizeError::UnsupportedFormat(mime.to_string()));
                }
                debug!(?declared, ?detected, "Attachment content differs from its declared type");
            }
            Some(_) => {}
            None => reader.set_format(declared),
        }

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| NormalizeError::DecodeFailed(e.to_string()))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut image =
            DynamicImage::from_decoder(decoder).map_err(|e| NormalizeError::DecodeFailed(e.to_string()))?;
        image.apply_orientation(orientation);
        Ok(image)
    }
}

enum Pending {
    Done(Result<NormalizedImage, NormalizeError>),
    Running {
        rx: mpsc::Receiver<Result<NormalizedImage, NormalizeError>>,
        deadline: Instant,
    },
}

/// Tells `normalize_all` that a worker thread has exited, on return or panic.
struct ExitSignal(mpsc::Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

fn format_from_mime(mime_type: &str) -> Option<ImageFormat> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/bmp" => Some(ImageFormat::Bmp),
        "image/tiff" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    rgb
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::codecs::jpeg::JpegEncoder;
    use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
    use std::io::Cursor;

    /// JPEG with a smooth gradient.
    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut data, 90))
            .unwrap();
        data
    }

    /// PNG that is fully transparent.
    pub fn transparent_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 0]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::test_images::{jpeg, transparent_png};
    use super::*;
    use crate::config::ResampleFilter;
    use image::GenericImageView;
    use std::time::Duration;

    fn normalizer_with(config: ReportConfig) -> ImageNormalizer {
        ImageNormalizer::new(Arc::new(config))
    }

    fn fast_config() -> ReportConfig {
        ReportConfig {
            resample_filter: ResampleFilter::Triangle,
            ..ReportConfig::default()
        }
    }

    #[test]
    fn test_large_jpeg_is_downscaled_preserving_aspect() {
        let normalizer = normalizer_with(ReportConfig {
            max_attachment_bytes: 64 * 1024 * 1024,
            ..fast_config()
        });
        let attachment = Attachment::new("image/jpeg", jpeg(4000, 3000));

        let image = normalizer.normalize(&attachment).unwrap();
        assert_eq!(image.width.max(image.height), 1600);
        let ratio = image.width as f64 / image.height as f64;
        assert!((ratio - 4.0 / 3.0).abs() < 0.01, "aspect ratio drifted: {}", ratio);

        let decoded = image::load_from_memory_with_format(&image.data, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (image.width, image.height));
    }

    #[test]
    fn test_small_image_is_never_upscaled() {
        let normalizer = normalizer_with(fast_config());
        let image = normalizer
            .normalize(&Attachment::new("image/jpeg", jpeg(320, 200)))
            .unwrap();
        assert_eq!((image.width, image.height), (320, 200));
    }

    #[test]
    fn test_oversized_attachment_rejected_before_decode() {
        let normalizer = normalizer_with(ReportConfig {
            max_attachment_bytes: 10,
            ..fast_config()
        });
        let result = normalizer.normalize(&Attachment::new("image/jpeg", vec![0u8; 11]));
        assert_eq!(
            result,
            Err(NormalizeError::AttachmentTooLarge { size: 11, limit: 10 })
        );
    }

    #[test]
    fn test_unsupported_mime() {
        let normalizer = normalizer_with(fast_config());
        let result = normalizer.normalize(&Attachment::new("application/pdf", jpeg(10, 10)));
        assert_eq!(
            result,
            Err(NormalizeError::UnsupportedFormat("application/pdf".to_string()))
        );
    }

    #[test]
    fn test_corrupt_data_is_decode_failure() {
        let normalizer = normalizer_with(fast_config());
        let result = normalizer.normalize(&Attachment::new("image/jpeg", vec![0xFF, 0xD8, 1, 2, 3]));
        assert!(matches!(result, Err(NormalizeError::DecodeFailed(_))));
    }

    #[test]
    fn test_transparent_png_flattens_to_white() {
        let normalizer = normalizer_with(fast_config());
        let image = normalizer
            .normalize(&Attachment::new("image/png", transparent_png(16, 16)))
            .unwrap();
        let decoded = image::load_from_memory_with_format(&image.data, ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        let px = decoded.get_pixel(8, 8).0;
        assert!(px.iter().all(|&c| c > 245), "expected white, got {:?}", px);
    }

    #[test]
    fn test_normalize_all_preserves_order() {
        let normalizer = normalizer_with(ReportConfig {
            normalize_workers: 2,
            max_attachment_bytes: 1024 * 1024,
            ..fast_config()
        });
        let a = Attachment::new("image/jpeg", jpeg(40, 20));
        let b = Attachment::new("text/plain", b"hello".to_vec());
        let c = Attachment::new("image/jpeg", jpeg(20, 40));
        let d = Attachment::new("image/jpeg", vec![0u8; 2 * 1024 * 1024]);

        let results = normalizer.normalize_all(&[&a, &b, &c, &d]);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().map(|i| (i.width, i.height)), Ok((40, 20)));
        assert!(matches!(results[1], Err(NormalizeError::UnsupportedFormat(_))));
        assert_eq!(results[2].as_ref().map(|i| (i.width, i.height)), Ok((20, 40)));
        assert!(matches!(results[3], Err(NormalizeError::AttachmentTooLarge { .. })));
    }

    #[test]
    fn test_timeout_is_decode_failure() {
        let normalizer = normalizer_with(ReportConfig {
            attachment_timeout_ms: 0,
            max_attachment_bytes: 64 * 1024 * 1024,
            ..fast_config()
        });
        let big = Attachment::new("image/jpeg", jpeg(3000, 3000));

        let started = Instant::now();
        let results = normalizer.normalize_all(&[&big]);
        assert!(started.elapsed() < Duration::from_secs(5));
        match &results[0] {
            Err(NormalizeError::DecodeFailed(reason)) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_busy_workers_are_not_oversubscribed() {
        let normalizer = normalizer_with(ReportConfig {
            normalize_workers: 1,
            attachment_timeout_ms: 0,
            max_attachment_bytes: 64 * 1024 * 1024,
            ..fast_config()
        });
        let big = Attachment::new("image/jpeg", jpeg(3000, 3000));

        let results = normalizer.normalize_all(&[&big, &big]);
        assert!(matches!(results[0], Err(NormalizeError::DecodeFailed(_))));
        match &results[1] {
            Err(NormalizeError::DecodeFailed(reason)) => {
                assert!(reason.contains("no normalization worker free"), "{}", reason)
            }
            other => panic!("expected no free worker, got {:?}", other),
        }
    }

    #[test]
    fn test_single_worker_is_reused() {
        let normalizer = normalizer_with(ReportConfig {
            normalize_workers: 1,
            ..fast_config()
        });
        let images: Vec<Attachment> = (1..=4)
            .map(|n| Attachment::new("image/jpeg", jpeg(10 * n, 10)))
            .collect();
        let refs: Vec<&Attachment> = images.iter().collect();

        let sizes: Vec<_> = normalizer
            .normalize_all(&refs)
            .into_iter()
            .map(|r| r.map(|i| i.width))
            .collect();
        assert_eq!(sizes, vec![Ok(10), Ok(20), Ok(30), Ok(40)]);
    }

    #[test]
    fn test_content_decides_decoder() {
        let normalizer = normalizer_with(fast_config());
        let mislabeled = Attachment::new("image/jpeg", transparent_png(16, 8));

        let image = normalizer.normalize(&mislabeled).unwrap();
        assert_eq!((image.width, image.height), (16, 8));

        // The declared type is still checked against the allow-list.
        let undeclared = Attachment::new("application/octet-stream", transparent_png(16, 8));
        assert!(matches!(
            normalizer.normalize(&undeclared),
            Err(NormalizeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_svg_logo() {
        let normalizer = normalizer_with(fast_config());
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
            <rect width="40" height="20" fill="navy"/></svg>"#;
        let logo = normalizer
            .normalize_logo(&Attachment::new("image/svg+xml", svg.to_vec()))
            .unwrap();
        assert_eq!((logo.width, logo.height), (512, 256));

        // SVG is not an accepted photo type.
        let as_photo = normalizer.normalize(&Attachment::new("image/svg+xml", svg.to_vec()));
        assert!(matches!(as_photo, Err(NormalizeError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_rendered_size() {
        let image = NormalizedImage {
            data: Vec::new(),
            width: 300,
            height: 150,
        };
        assert_eq!(image.rendered_size(0.5), (150.0, 75.0));
    }
}
