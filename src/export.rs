//! Export stage: contain-fit resize, matte compositing and encoding
//!
//! A cutout is exported at a requested size and format. Source-size PNG
//! exports return the model's encoded bytes untouched. Every other export
//! scales the cutout to fit inside the requested box (aspect ratio kept, never
//! cropped), resamples with Lanczos3 on premultiplied alpha and then either
//! keeps the alpha channel (PNG) or flattens onto opaque white (JPEG).

use crate::{
    config::ExportSettings,
    error::{NobgError, Result},
    types::{CutoutResult, ExportFormat, ExportResult, SizeSpec},
};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgb, Rgba, Rgba32FImage, RgbImage, RgbaImage};
use std::sync::Arc;
use tracing::{instrument, span, Level};

/// Dimensions that fit `width`x`height` inside the target box
///
/// With both targets the limiting side is matched exactly and the other side
/// is rounded. With one target the other side scales proportionally. Without
/// targets the source dimensions are returned. Results are at least 1 pixel.
///
/// ```rust
/// use nobg::export::fit_contain;
///
/// assert_eq!(fit_contain(1000, 500, Some(800), Some(800)), (800, 400));
/// assert_eq!(fit_contain(500, 1000, Some(800), Some(600)), (300, 600));
/// ```
#[must_use]
pub fn fit_contain(
    width: u32,
    height: u32,
    target_width: Option<u32>,
    target_height: Option<u32>,
) -> (u32, u32) {
    let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let source_ratio = w / h;
    let scaled = |v: f64| (v.round() as u32).max(1);

    match (target_width, target_height) {
        (Some(tw), Some(th)) => {
            let target_ratio = f64::from(tw) / f64::from(th.max(1));
            if source_ratio > target_ratio {
                (tw.max(1), scaled(f64::from(tw) / source_ratio))
            } else {
                (scaled(f64::from(th) * source_ratio), th.max(1))
            }
        },
        (Some(tw), None) => (tw.max(1), scaled(f64::from(tw) / source_ratio)),
        (None, Some(th)) => (scaled(f64::from(th) * source_ratio), th.max(1)),
        (None, None) => (width.max(1), height.max(1)),
    }
}

/// Base name of `original` with a trailing `.ext` removed
///
/// Only a final segment of one or more characters without `/` or `.` counts
/// as an extension.
#[must_use]
pub fn base_name(original: &str) -> &str {
    match original.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() && !ext.contains('/') => base,
        _ => original,
    }
}

/// Suggested file name for an export: `{base}_{suffix}.{ext}`
///
/// ```rust
/// use nobg::{export::generate_filename, ExportFormat};
///
/// assert_eq!(
///     generate_filename("photo.jpg", "nobg_800x600", ExportFormat::Png),
///     "photo_nobg_800x600.png"
/// );
/// assert_eq!(generate_filename("a.b.jpg", "nobg", ExportFormat::Jpeg), "a.b_nobg.jpg");
/// ```
#[must_use]
pub fn generate_filename(original: &str, suffix: &str, format: ExportFormat) -> String {
    format!("{}_{}.{}", base_name(original), suffix, format.extension())
}

/// Resize and encode a cutout
#[derive(Debug, Clone)]
pub struct ExportStage {
    jpeg_quality: u8,
    suffix: String,
}

impl Default for ExportStage {
    fn default() -> Self {
        Self::new(&ExportSettings::default())
    }
}

impl ExportStage {
    #[must_use]
    pub fn new(settings: &ExportSettings) -> Self {
        Self {
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
            suffix: settings.filename_suffix.clone(),
        }
    }

    #[must_use]
    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// File name suffix for a size, e.g. `nobg_1920x1080`
    #[must_use]
    pub fn suffix_for(&self, size: &SizeSpec) -> String {
        format!("{}_{}", self.suffix, size.label())
    }

    /// Export a cutout on the blocking thread pool
    ///
    /// # Errors
    /// - `ExportFailed` when encoding fails or the worker task dies
    #[instrument(
        skip_all,
        fields(
            source = %format!("{}x{}", cutout.width, cutout.height),
            size = %size,
            format = %format
        )
    )]
    pub async fn export(
        &self,
        cutout: Arc<CutoutResult>,
        original_name: &str,
        size: &SizeSpec,
        format: ExportFormat,
    ) -> Result<ExportResult> {
        let filename = generate_filename(original_name, &self.suffix_for(size), format);

        if size.is_source_size() && format == ExportFormat::Png {
            log::debug!("Source-size PNG export, reusing encoded cutout");
            return Ok(ExportResult {
                bytes: cutout.encoded.clone(),
                filename,
                format,
                width: cutout.width,
                height: cutout.height,
            });
        }

        let (target_width, target_height) = size.target();
        let quality = self.jpeg_quality;
        let rendered = tokio::task::spawn_blocking(move || {
            render(&cutout, target_width, target_height, format, quality)
        })
        .await
        .map_err(|e| NobgError::export_failed("join", e))??;

        log::info!(
            "Exported {} ({}x{}, {} bytes)",
            filename,
            rendered.width,
            rendered.height,
            rendered.bytes.len()
        );
        Ok(ExportResult {
            bytes: rendered.bytes,
            filename,
            format,
            width: rendered.width,
            height: rendered.height,
        })
    }
}

/// Encoded pixels from the general export path
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Resize and encode synchronously
///
/// # Errors
/// - `ExportFailed` with stage `encode` when the encoder rejects the raster
pub fn render(
    cutout: &CutoutResult,
    target_width: Option<u32>,
    target_height: Option<u32>,
    format: ExportFormat,
    jpeg_quality: u8,
) -> Result<Rendered> {
    let (width, height) = fit_contain(cutout.width, cutout.height, target_width, target_height);

    let premultiplied = {
        let _span = span!(Level::DEBUG, "resize", width, height).entered();
        resize_premultiplied(&cutout.image, width, height)
    };

    let _span = span!(Level::DEBUG, "encode", format = %format).entered();
    let mut bytes = Vec::new();
    match format {
        ExportFormat::Png => {
            let straight = unpremultiply(&premultiplied);
            PngEncoder::new(&mut bytes)
                .write_image(straight.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| NobgError::export_failed("encode", e))?;
        },
        ExportFormat::Jpeg => {
            let flat = flatten_on_white(&premultiplied);
            JpegEncoder::new_with_quality(&mut bytes, jpeg_quality)
                .write_image(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| NobgError::export_failed("encode", e))?;
        },
    }

    Ok(Rendered {
        bytes,
        width,
        height,
    })
}

/// Premultiply, then scale to exactly `width`x`height`
fn resize_premultiplied(source: &RgbaImage, width: u32, height: u32) -> Rgba32FImage {
    let premultiplied = Rgba32FImage::from_fn(source.width(), source.height(), |x, y| {
        let [r, g, b, a] = source.get_pixel(x, y).0.map(|c| f32::from(c) / 255.0);
        Rgba([r * a, g * a, b * a, a])
    });

    if source.dimensions() == (width, height) {
        premultiplied
    } else {
        imageops::resize(&premultiplied, width, height, FilterType::Lanczos3)
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Back to straight alpha for PNG
fn unpremultiply(premultiplied: &Rgba32FImage) -> RgbaImage {
    RgbaImage::from_fn(premultiplied.width(), premultiplied.height(), |x, y| {
        let [r, g, b, a] = premultiplied.get_pixel(x, y).0;
        let a = a.clamp(0.0, 1.0);
        if a <= f32::EPSILON {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([to_u8(r / a), to_u8(g / a), to_u8(b / a), to_u8(a)])
        }
    })
}

/// Composite over opaque white; the result has no alpha channel
fn flatten_on_white(premultiplied: &Rgba32FImage) -> RgbImage {
    RgbImage::from_fn(premultiplied.width(), premultiplied.height(), |x, y| {
        let [r, g, b, a] = premultiplied.get_pixel(x, y).0;
        let matte = 1.0 - a.clamp(0.0, 1.0);
        Rgb([to_u8(r + matte), to_u8(g + matte), to_u8(b + matte)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn cutout(width: u32, height: u32, pixel: Rgba<u8>) -> CutoutResult {
        let image = RgbaImage::from_pixel(width, height, pixel);
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();
        CutoutResult::from_encoded(encoded).unwrap()
    }

    #[test]
    fn test_fit_contain_both_targets() {
        assert_eq!(fit_contain(1000, 500, Some(800), Some(800)), (800, 400));
        assert_eq!(fit_contain(1000, 500, Some(400), Some(300)), (400, 200));
        assert_eq!(fit_contain(500, 1000, Some(400), Some(300)), (150, 300));
        assert_eq!(fit_contain(1920, 1080, Some(1280), Some(720)), (1280, 720));
        // Upscaling is allowed
        assert_eq!(fit_contain(100, 50, Some(1920), Some(1080)), (1920, 960));
    }

    #[test]
    fn test_fit_contain_single_target() {
        assert_eq!(fit_contain(1000, 500, Some(800), None), (800, 400));
        assert_eq!(fit_contain(1000, 500, None, Some(100)), (200, 100));
        assert_eq!(fit_contain(1000, 500, None, None), (1000, 500));
    }

    #[test]
    fn test_fit_contain_never_below_one_pixel() {
        assert_eq!(fit_contain(10_000, 1, Some(10), Some(10)), (10, 1));
        assert_eq!(fit_contain(1, 10_000, Some(1), Some(1)), (1, 1));
        assert_eq!(fit_contain(5000, 2, Some(1), None), (1, 1));
    }

    #[test]
    fn test_fit_contain_keeps_aspect() {
        for (w, h) in [(1000, 500), (333, 777), (1, 9), (4000, 3000)] {
            for (tw, th) in [(1920, 1080), (640, 480), (50, 50), (10_000, 1)] {
                let (fw, fh) = fit_contain(w, h, Some(tw), Some(th));
                assert!(fw <= tw && fh <= th, "{w}x{h} into {tw}x{th} gave {fw}x{fh}");
                assert!(fw == tw || fh == th);
                let expected_h = f64::from(fw) * f64::from(h) / f64::from(w);
                let expected_w = f64::from(fh) * f64::from(w) / f64::from(h);
                assert!(
                    (f64::from(fh) - expected_h).abs() <= 1.0
                        || (f64::from(fw) - expected_w).abs() <= 1.0
                        || fw == 1
                        || fh == 1
                );
            }
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("photo.jpg"), "photo");
        assert_eq!(base_name("a.b.jpg"), "a.b");
        assert_eq!(base_name("README"), "README");
        assert_eq!(base_name("trailing."), "trailing.");
        assert_eq!(base_name(".hidden"), "");
        assert_eq!(base_name("dir.v2/file"), "dir.v2/file");
    }

    #[test]
    fn test_generate_filename() {
        assert_eq!(
            generate_filename("photo.jpg", "nobg_800x600", ExportFormat::Png),
            "photo_nobg_800x600.png"
        );
        assert_eq!(
            generate_filename("a.b.jpg", "nobg", ExportFormat::Jpeg),
            "a.b_nobg.jpg"
        );
        assert_eq!(
            generate_filename("scan", "nobg_original", ExportFormat::Jpeg),
            "scan_nobg_original.jpg"
        );
    }

    #[test]
    fn test_suffix_for() {
        let stage = ExportStage::default();
        assert_eq!(stage.suffix_for(&SizeSpec::original()), "nobg_original");
        assert_eq!(
            stage.suffix_for(&SizeSpec::custom_width(800).unwrap()),
            "nobg_800w"
        );
        assert_eq!(stage.jpeg_quality(), 92);
    }

    #[test]
    fn test_render_jpeg_is_white_where_transparent() {
        let source = cutout(10, 10, Rgba([200, 10, 10, 0]));
        let rendered = render(&source, Some(5), Some(5), ExportFormat::Jpeg, 92).unwrap();
        let decoded = image::load_from_memory(&rendered.bytes).unwrap();

        assert!(!decoded.color().has_alpha());
        let rgb = decoded.to_rgb8();
        for pixel in rgb.pixels() {
            assert!(pixel.0.iter().all(|&c| c >= 250), "expected white, got {pixel:?}");
        }
    }

    #[test]
    fn test_render_png_keeps_color_under_alpha() {
        let source = cutout(8, 8, Rgba([40, 120, 200, 128]));
        let rendered = render(&source, Some(4), Some(4), ExportFormat::Png, 92).unwrap();
        assert_eq!((rendered.width, rendered.height), (4, 4));

        let decoded = image::load_from_memory(&rendered.bytes).unwrap().to_rgba8();
        let pixel = decoded.get_pixel(2, 2);
        assert!(pixel[3].abs_diff(128) <= 1);
        assert!(pixel[0].abs_diff(40) <= 2);
        assert!(pixel[2].abs_diff(200) <= 2);
    }

    #[test]
    fn test_render_png_fully_transparent_stays_clear() {
        let source = cutout(6, 6, Rgba([255, 0, 0, 0]));
        let rendered = render(&source, Some(3), None, ExportFormat::Png, 92).unwrap();
        let decoded = image::load_from_memory(&rendered.bytes).unwrap().to_rgba8();
        assert!(decoded.pixels().all(|p| p[3] == 0));
    }

    #[tokio::test]
    async fn test_export_fast_path_is_byte_identical() {
        let source = Arc::new(cutout(12, 7, Rgba([1, 2, 3, 4])));
        let stage = ExportStage::default();
        let result = stage
            .export(source.clone(), "cat.webp", &SizeSpec::original(), ExportFormat::Png)
            .await
            .unwrap();

        assert_eq!(result.bytes, source.encoded);
        assert_eq!(result.filename, "cat_nobg_original.png");
        assert_eq!((result.width, result.height), (12, 7));
    }

    #[tokio::test]
    async fn test_export_resizes_general_path() {
        let source = Arc::new(cutout(100, 50, Rgba([0, 0, 0, 255])));
        let stage = ExportStage::new(&ExportSettings {
            jpeg_quality: 80,
            filename_suffix: "cut".to_string(),
        });
        let result = stage
            .export(
                source,
                "dog.png",
                &SizeSpec::custom(80, 80).unwrap(),
                ExportFormat::Jpeg,
            )
            .await
            .unwrap();

        assert_eq!((result.width, result.height), (80, 40));
        assert_eq!(result.filename, "dog_cut_80x80.jpg");
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (80, 40));
    }
}
