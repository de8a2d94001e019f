//! Export stage behavior on generated cutouts

mod common;

use common::{encode_png, half_transparent};
use image::GenericImageView;
use nobg::{CutoutResult, ExportFormat, ExportSettings, ExportStage, SizeSpec};
use std::sync::Arc;

fn cutout(width: u32, height: u32) -> Arc<CutoutResult> {
    Arc::new(CutoutResult::from_encoded(encode_png(&half_transparent(width, height))).unwrap())
}

#[tokio::test]
async fn test_contain_fit_into_square_box() {
    let stage = ExportStage::default();
    let result = stage
        .export(
            cutout(1000, 500),
            "wide.jpg",
            &SizeSpec::custom(800, 800).unwrap(),
            ExportFormat::Png,
        )
        .await
        .unwrap();

    assert_eq!((result.width, result.height), (800, 400));
    assert_eq!(result.filename, "wide_nobg_800x800.png");
    let decoded = image::load_from_memory(&result.bytes).unwrap();
    assert_eq!(decoded.dimensions(), (800, 400));
}

#[tokio::test]
async fn test_aspect_ratio_preserved_for_presets() {
    let stage = ExportStage::default();
    for (w, h) in [(1000, 500), (333, 777), (64, 64)] {
        for label in ["1920x1080", "1280x720", "800x600", "640x480"] {
            let size = SizeSpec::preset(label).unwrap();
            let (tw, th) = size.target();
            let result = stage
                .export(cutout(w, h), "a.png", &size, ExportFormat::Png)
                .await
                .unwrap();

            assert!(result.width <= tw.unwrap() && result.height <= th.unwrap());
            assert!(result.width == tw.unwrap() || result.height == th.unwrap());
            let expected = f64::from(w) / f64::from(h);
            let actual = f64::from(result.width) / f64::from(result.height);
            // One pixel of rounding on the shorter side
            let tolerance = expected / f64::from(result.width.min(result.height));
            assert!(
                (expected - actual).abs() <= tolerance * 1.01,
                "{w}x{h} into {label}: got {}x{}",
                result.width,
                result.height
            );
        }
    }
}

#[tokio::test]
async fn test_source_size_png_is_byte_identical() {
    let cutout = cutout(120, 80);
    let result = ExportStage::default()
        .export(cutout.clone(), "photo.webp", &SizeSpec::original(), ExportFormat::Png)
        .await
        .unwrap();

    assert_eq!(result.bytes, cutout.encoded);
    assert_eq!(result.filename, "photo_nobg_original.png");
}

#[tokio::test]
async fn test_jpeg_has_white_matte() {
    let result = ExportStage::default()
        .export(cutout(100, 50), "photo.png", &SizeSpec::original(), ExportFormat::Jpeg)
        .await
        .unwrap();

    assert_eq!(result.filename, "photo_nobg_original.jpg");
    assert_eq!(&result.bytes[..2], &[0xFF, 0xD8]);

    let decoded = image::load_from_memory(&result.bytes).unwrap();
    assert!(!decoded.color().has_alpha());
    let rgb = decoded.to_rgb8();
    let background = rgb.get_pixel(90, 25);
    assert!(background.0.iter().all(|&c| c >= 245), "{background:?}");
    let subject = rgb.get_pixel(10, 25);
    assert!(subject.0[0] > 150 && subject.0[1] < 80, "{subject:?}");
}

#[tokio::test]
async fn test_single_dimension_and_custom_suffix() {
    let stage = ExportStage::new(&ExportSettings {
        jpeg_quality: 70,
        filename_suffix: "cutout".to_string(),
    });
    let result = stage
        .export(
            cutout(400, 200),
            "a.b.jpg",
            &SizeSpec::custom_height(100).unwrap(),
            ExportFormat::Jpeg,
        )
        .await
        .unwrap();

    assert_eq!((result.width, result.height), (200, 100));
    assert_eq!(result.filename, "a.b_cutout_100h.jpg");
}

#[tokio::test]
async fn test_upscaling_allowed() {
    let result = ExportStage::default()
        .export(
            cutout(100, 50),
            "small.png",
            &SizeSpec::custom_width(1000).unwrap(),
            ExportFormat::Png,
        )
        .await
        .unwrap();
    assert_eq!((result.width, result.height), (1000, 500));
}
