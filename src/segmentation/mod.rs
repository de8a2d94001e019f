//! Segmentation model abstraction
//!
//! The cutout stage treats the model as a black box: raw image bytes in,
//! encoded RGBA cutout out, with `(phase, current, total)` progress reports
//! along the way. The ONNX Runtime implementation lives behind the `onnx`
//! feature; callers can inject any other implementation.

pub mod download;

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::{config::ModelOptions, error::Result, types::SourceImage};
use async_trait::async_trait;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSegmentationModel;
pub use download::ModelStore;

/// Progress callback handed to a model: `(phase_key, current, total)`
pub type PhaseCallback<'a> = &'a (dyn Fn(&str, u64, u64) + Send + Sync);

/// A model that strips the background from an image
#[async_trait]
pub trait SegmentationModel: Send + Sync {
    /// Remove the background and return the cutout encoded as
    /// `options.output.format`
    ///
    /// # Errors
    /// - Unsupported or undecodable input
    /// - Weight download or model initialization failures
    /// - Inference failures
    async fn remove_background(
        &self,
        source: &SourceImage,
        options: &ModelOptions,
        progress: PhaseCallback<'_>,
    ) -> Result<Vec<u8>>;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}
