//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use nobg::{
    ModelOptions, NobgError, PhaseCallback, ProgressEvent, ProgressReporter, Result,
    SegmentationModel, SourceImage, Telemetry, TelemetryEvent,
};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

/// Route `log` output through the test harness; `RUST_LOG=nobg=debug` to see it
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encode an RGBA image as PNG
pub fn encode_png(img: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Opaque red subject on the left half, transparent right half
pub fn half_transparent(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([200, 30, 30, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

pub fn png_source(name: &str, width: u32, height: u32) -> SourceImage {
    SourceImage::new(
        encode_png(&RgbaImage::from_pixel(width, height, Rgba([90, 120, 150, 255]))),
        nobg::MediaType::Png,
        name,
    )
}

/// Segmentation model that replays a fixed cutout
pub struct StubModel {
    cutout: Vec<u8>,
    delay: Duration,
    fail: bool,
}

impl StubModel {
    pub fn returning(cutout: &RgbaImage) -> Self {
        Self {
            cutout: encode_png(cutout),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            cutout: Vec::new(),
            delay: Duration::ZERO,
            fail: true,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SegmentationModel for StubModel {
    async fn remove_background(
        &self,
        _source: &SourceImage,
        _options: &ModelOptions,
        progress: PhaseCallback<'_>,
    ) -> Result<Vec<u8>> {
        progress("fetch:model", 40, 80);
        progress("fetch:model", 80, 80);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        progress("compute:inference", 1, 2);
        // Late download report must not move the bar backwards
        progress("fetch:model", 10, 80);
        progress("compute:inference", 2, 2);
        progress("compute:mask", 1, 1);

        if self.fail {
            return Err(NobgError::inference("model produced no output"));
        }
        Ok(self.cutout.clone())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<ProgressEvent>>,
    pub errors: Mutex<Vec<String>>,
    pub completions: Mutex<u32>,
}

impl RecordingReporter {
    pub fn percentages(&self) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.percentage)
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn report_completion(&self, _elapsed_ms: u64) {
        *self.completions.lock().unwrap() += 1;
    }

    fn report_error(&self, error: &str) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<TelemetryEvent>>,
    pub flushes: Mutex<u32>,
}

impl RecordingTelemetry {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(TelemetryEvent::name).collect()
    }
}

#[async_trait]
impl Telemetry for RecordingTelemetry {
    fn track(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn flush(&self, _timeout: Duration) {
        *self.flushes.lock().unwrap() += 1;
    }
}
