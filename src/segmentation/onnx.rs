//! ISNet segmentation through ONNX Runtime
//!
//! The session is built lazily on the first run and reused while the model
//! file and device stay the same. Decoding, preprocessing, inference and
//! compositing all run on the blocking thread pool.

use crate::{
    config::{ComputeDevice, ModelOptions, StudioConfig},
    error::{NobgError, Result},
    segmentation::{download::ModelStore, PhaseCallback, SegmentationModel},
    services::progress::CutoutPhase,
    types::SourceImage,
};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, RgbaImage};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Square input resolution expected by ISNet
pub const INPUT_SIZE: u32 = 1024;

const NORMALIZATION_MEAN: f32 = 0.5;
const NORMALIZATION_STD: f32 = 1.0;

struct LoadedSession {
    model_path: PathBuf,
    device: ComputeDevice,
    session: Session,
}

/// [`SegmentationModel`] backed by the ISNet ONNX export
pub struct OnnxSegmentationModel {
    store: ModelStore,
    session: Arc<Mutex<Option<LoadedSession>>>,
}

impl std::fmt::Debug for OnnxSegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSegmentationModel")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl OnnxSegmentationModel {
    #[must_use]
    pub fn new(store: ModelStore) -> Self {
        Self {
            store,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Build a model whose weights are cached under `config.cache_dir`
    ///
    /// # Errors
    /// - No usable cache directory
    /// - HTTP client creation failure
    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        Ok(Self::new(ModelStore::new(config.cache_dir.clone())?))
    }

    /// Execution providers and whether this machine can use them
    #[must_use]
    pub fn list_providers() -> Vec<(&'static str, bool)> {
        vec![
            ("CPU", true),
            (
                "CUDA",
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
            ),
            (
                "CoreML",
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
            ),
        ]
    }

    async fn resolve_model_path(
        &self,
        options: &ModelOptions,
        progress: PhaseCallback<'_>,
    ) -> Result<PathBuf> {
        if let Some(path) = &options.model_path {
            if !path.is_file() {
                return Err(NobgError::model(format!(
                    "Model file not found: {}",
                    path.display()
                )));
            }
            progress(CutoutPhase::FETCH_MODEL_KEY, 1, 1);
            return Ok(path.clone());
        }
        self.store
            .ensure_model(options.precision, options.sha256.as_deref(), progress)
            .await
    }
}

#[async_trait]
impl SegmentationModel for OnnxSegmentationModel {
    async fn remove_background(
        &self,
        source: &SourceImage,
        options: &ModelOptions,
        progress: PhaseCallback<'_>,
    ) -> Result<Vec<u8>> {
        if options.output.format != ImageFormat::Png.to_mime_type() {
            return Err(NobgError::invalid_config(format!(
                "Unsupported model output format '{}', only image/png is produced",
                options.output.format
            )));
        }

        let model_path = self.resolve_model_path(options, progress).await?;

        progress(CutoutPhase::INFERENCE_KEY, 0, 3);
        let bytes = source.bytes.clone();
        let (original, input) = spawn_blocking(move || {
            let original = image::load_from_memory(&bytes)?.to_rgba8();
            let input = preprocess(&original);
            Ok((original, input))
        })
        .await?;
        progress(CutoutPhase::INFERENCE_KEY, 1, 3);

        let slot = Arc::clone(&self.session);
        let device = options.device;
        let mask = spawn_blocking(move || run_inference(&slot, &model_path, device, input)).await?;
        progress(CutoutPhase::INFERENCE_KEY, 3, 3);

        progress(CutoutPhase::POSTPROCESS_KEY, 0, 2);
        let encoded = spawn_blocking(move || {
            let cutout = apply_mask(original, &mask);
            encode_png(&cutout)
        })
        .await?;
        progress(CutoutPhase::POSTPROCESS_KEY, 2, 2);

        Ok(encoded)
    }

    fn name(&self) -> &str {
        "isnet-onnx"
    }
}

async fn spawn_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| NobgError::inference(format!("Worker task failed: {e}")))?
}

/// Resize to 1024x1024 and normalize into an NCHW tensor
fn preprocess(source: &RgbaImage) -> Array4<f32> {
    let resized = imageops::resize(source, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            tensor[[0, channel, y, x]] = (value - NORMALIZATION_MEAN) / NORMALIZATION_STD;
        }
    }
    tensor
}

fn build_session(model_path: &Path, device: ComputeDevice) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(|e| NobgError::model(format!("Failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| NobgError::model(format!("Failed to set optimization level: {e}")))?;

    if device == ComputeDevice::Gpu {
        let mut providers = Vec::new();

        let cuda = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
            log::info!("CUDA execution provider is available and will be used");
            providers.push(cuda.build());
        }

        let coreml = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
            log::info!("CoreML execution provider is available and will be used");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        }

        if providers.is_empty() {
            log::warn!("No GPU execution provider available, falling back to CPU");
        } else {
            builder = builder.with_execution_providers(providers).map_err(|e| {
                NobgError::model(format!("Failed to set execution providers: {e}"))
            })?;
        }
    } else {
        log::info!("Using CPU execution provider");
    }

    let session = builder.commit_from_file(model_path).map_err(|e| {
        NobgError::model(format!(
            "Failed to create session from {}: {e}",
            model_path.display()
        ))
    })?;
    log::debug!("ONNX Runtime session ready for {}", model_path.display());
    Ok(session)
}

/// Run the network, building or rebuilding the cached session as needed
///
/// Returns the single-channel mask at model resolution, values in 0-1.
fn run_inference(
    slot: &Mutex<Option<LoadedSession>>,
    model_path: &Path,
    device: ComputeDevice,
    input: Array4<f32>,
) -> Result<GrayImage> {
    let mut guard = slot
        .lock()
        .map_err(|_| NobgError::inference("Model session lock poisoned"))?;

    let reusable = guard
        .as_ref()
        .is_some_and(|loaded| loaded.model_path == model_path && loaded.device == device);
    if !reusable {
        *guard = Some(LoadedSession {
            model_path: model_path.to_path_buf(),
            device,
            session: build_session(model_path, device)?,
        });
    }
    let loaded = guard
        .as_mut()
        .ok_or_else(|| NobgError::inference("ONNX session not initialized"))?;

    let start = instant::Instant::now();
    let input_value = Value::from_array(input)
        .map_err(|e| NobgError::inference(format!("Failed to convert input tensor: {e}")))?;
    let outputs = loaded
        .session
        .run(ort::inputs![input_value])
        .map_err(|e| NobgError::inference(format!("ONNX inference failed: {e}")))?;

    let keys: Vec<_> = outputs.keys().collect();
    let first_key = keys
        .first()
        .ok_or_else(|| NobgError::inference("No output tensors found"))?;
    let output = outputs
        .get(*first_key)
        .ok_or_else(|| NobgError::inference("First output tensor not found"))?
        .try_extract_array::<f32>()
        .map_err(|e| NobgError::inference(format!("Failed to extract output tensor: {e}")))?;

    let shape = output.shape().to_vec();
    let (height, width) = match shape.as_slice() {
        [.., h, w] => (*h, *w),
        _ => {
            return Err(NobgError::inference(format!(
                "Unexpected output tensor shape {shape:?}"
            )))
        },
    };
    let values: Vec<u8> = output
        .iter()
        .take(width * height)
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    log::debug!(
        "Inference complete in {}ms, mask {}x{}",
        start.elapsed().as_millis(),
        width,
        height
    );

    GrayImage::from_raw(width as u32, height as u32, values)
        .ok_or_else(|| NobgError::inference("Mask buffer does not match output shape"))
}

/// Scale the mask to the source size and write it into the alpha channel
fn apply_mask(mut cutout: RgbaImage, mask: &GrayImage) -> RgbaImage {
    let (width, height) = cutout.dimensions();
    let mask = imageops::resize(mask, width, height, FilterType::Triangle);
    for (pixel, alpha) in cutout.pixels_mut().zip(mask.pixels()) {
        pixel[3] = alpha[0];
    }
    cutout
}

fn encode_png(cutout: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    cutout.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}
