//! Cutout stage: run the segmentation model with progress reporting

use crate::{
    config::ModelOptions,
    error::{NobgError, Result},
    segmentation::SegmentationModel,
    services::progress::{ProgressReporter, ProgressTracker},
    types::{CutoutResult, SourceImage},
};
use std::sync::Arc;
use tracing::instrument;

/// Wraps a [`SegmentationModel`] and turns its output into a [`CutoutResult`]
#[derive(Clone)]
pub struct CutoutStage {
    model: Arc<dyn SegmentationModel>,
    options: ModelOptions,
}

impl std::fmt::Debug for CutoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CutoutStage")
            .field("model", &self.model.name())
            .field("options", &self.options)
            .finish()
    }
}

impl CutoutStage {
    #[must_use]
    pub fn new(model: Arc<dyn SegmentationModel>, options: ModelOptions) -> Self {
        Self { model, options }
    }

    #[must_use]
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Remove the background from `source`
    ///
    /// The reporter first receives a 0% loading event, then the model's
    /// translated phase reports (never decreasing), then a 100% event right
    /// before the result is returned. Nothing is retried.
    ///
    /// # Errors
    /// - `CutoutFailed` wrapping whatever made the model or the decoding of
    ///   its output fail
    #[instrument(
        skip_all,
        fields(
            model = %self.model.name(),
            file = %source.file_name,
            bytes = source.bytes.len()
        )
    )]
    pub async fn run(
        &self,
        source: &SourceImage,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<CutoutResult> {
        let tracker = ProgressTracker::new(reporter);
        tracker.begin();

        let outcome = if source.bytes.is_empty() {
            Err(NobgError::validation("Source image is empty"))
        } else {
            let callback =
                |key: &str, current: u64, total: u64| tracker.report_phase(key, current, total);
            self.model
                .remove_background(source, &self.options, &callback)
                .await
                .and_then(CutoutResult::from_encoded)
        };

        match outcome {
            Ok(cutout) => {
                tracker.finish();
                log::info!(
                    "Cutout of {} ready: {}x{} in {}ms",
                    source.file_name,
                    cutout.width,
                    cutout.height,
                    tracker.elapsed_ms()
                );
                Ok(cutout)
            },
            Err(cause) => {
                log::error!("Cutout of {} failed: {}", source.file_name, cause);
                tracker.report_error(&cause.to_string());
                Err(NobgError::cutout_failed(cause))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{segmentation::PhaseCallback, types::MediaType, types::ProgressEvent};
    use async_trait::async_trait;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct FixedModel {
        output: Result<Vec<u8>>,
    }

    #[async_trait]
    impl SegmentationModel for FixedModel {
        async fn remove_background(
            &self,
            _source: &SourceImage,
            _options: &ModelOptions,
            progress: PhaseCallback<'_>,
        ) -> Result<Vec<u8>> {
            progress("fetch:model", 50, 100);
            progress("compute:inference", 1, 2);
            progress("compute:unknown", 0, 0);
            match &self.output {
                Ok(bytes) => Ok(bytes.clone()),
                Err(e) => Err(NobgError::inference(e.to_string())),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
        errors: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recorder {
        fn report_progress(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn report_error(&self, error: &str) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(width, height, Rgba([9, 9, 9, 9]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn source() -> SourceImage {
        SourceImage::new(png(4, 2), MediaType::Png, "in.png")
    }

    #[tokio::test]
    async fn test_run_reports_ordered_progress() {
        let stage = CutoutStage::new(
            Arc::new(FixedModel { output: Ok(png(4, 2)) }),
            ModelOptions::default(),
        );
        let recorder = Arc::new(Recorder::default());

        let cutout = stage.run(&source(), recorder.clone()).await.unwrap();
        assert_eq!(cutout.dimensions(), (4, 2));

        let events = recorder.events.lock().unwrap().clone();
        let percentages: Vec<u8> = events.iter().map(|e| e.percentage).collect();
        assert_eq!(percentages, vec![0, 15, 60, 60, 100]);
        assert_eq!(events[0].message, "Loading AI model...");
        assert_eq!(events[2].message, "Processing image...");
        assert_eq!(events[3].message, "Processing...");
    }

    #[tokio::test]
    async fn test_model_error_becomes_cutout_failed() {
        let stage = CutoutStage::new(
            Arc::new(FixedModel {
                output: Err(NobgError::inference("unsupported image")),
            }),
            ModelOptions::default(),
        );
        let recorder = Arc::new(Recorder::default());

        let err = stage.run(&source(), recorder.clone()).await.unwrap_err();
        assert!(matches!(err, NobgError::CutoutFailed { .. }));
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
        // No completion event on failure
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.percentage < 100));
    }

    #[tokio::test]
    async fn test_undecodable_output_fails() {
        let stage = CutoutStage::new(
            Arc::new(FixedModel {
                output: Ok(vec![0, 1, 2]),
            }),
            ModelOptions::default(),
        );
        let err = stage
            .run(&source(), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, NobgError::CutoutFailed { .. }));
    }

    #[tokio::test]
    async fn test_empty_source_fails_without_model_call() {
        let stage = CutoutStage::new(
            Arc::new(FixedModel { output: Ok(png(1, 1)) }),
            ModelOptions::default(),
        );
        let empty = SourceImage::new(Vec::new(), MediaType::Jpeg, "empty.jpg");
        let recorder = Arc::new(Recorder::default());

        assert!(stage.run(&empty, recorder.clone()).await.is_err());
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }
}
