//! Model weight download and caching
//!
//! ISNet weights are fetched from Hugging Face on first use, streamed into a
//! temporary file next to the cache entry and persisted atomically, so an
//! interrupted download never leaves a truncated model behind.

use crate::{
    config::{ModelPrecision, CACHE_DIR_ENV},
    error::{NobgError, Result},
    segmentation::PhaseCallback,
    services::progress::CutoutPhase,
};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const MODEL_REPOSITORY: &str = "https://huggingface.co/imgly/isnet-general-onnx/resolve/main";

/// Local cache of segmentation model weights
#[derive(Debug, Clone)]
pub struct ModelStore {
    client: Client,
    cache_dir: PathBuf,
}

impl ModelStore {
    /// Create a store rooted at `base` (or the default cache location)
    ///
    /// Weights live in a `models` subdirectory of the base directory.
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - No cache directory could be determined
    pub fn new(base: Option<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| NobgError::network_error("Failed to create HTTP client", e))?;

        let base = match base {
            Some(dir) => dir,
            None => Self::default_base_dir()?,
        };

        Ok(Self {
            client,
            cache_dir: base.join("models"),
        })
    }

    /// `$NOBG_CACHE_DIR`, or `nobg` under the platform cache directory
    ///
    /// # Errors
    /// - Neither the environment variable nor a platform cache dir is available
    pub fn default_base_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        dirs::cache_dir()
            .map(|dir| dir.join("nobg"))
            .ok_or_else(|| {
                NobgError::invalid_config(format!(
                    "No cache directory available, set {CACHE_DIR_ENV}"
                ))
            })
    }

    /// Directory holding the cached weights
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download URL for a model variant
    #[must_use]
    pub fn model_url(precision: ModelPrecision) -> String {
        let file = match precision {
            ModelPrecision::Fp32 => "model.onnx",
            ModelPrecision::Fp16 => "model_fp16.onnx",
        };
        format!("{MODEL_REPOSITORY}/onnx/{file}")
    }

    /// Where a model variant is stored once downloaded
    #[must_use]
    pub fn cached_path(&self, precision: ModelPrecision) -> PathBuf {
        self.cache_dir.join(format!("isnet_{precision}.onnx"))
    }

    #[must_use]
    pub fn is_cached(&self, precision: ModelPrecision) -> bool {
        self.cached_path(precision).is_file()
    }

    /// Return the path of a usable model file, downloading it if needed
    ///
    /// Byte progress is reported under the `fetch:model` phase key.
    ///
    /// # Errors
    /// - Network failures or non-success HTTP status
    /// - Cache directory not writable
    /// - Downloaded file does not match `expected_sha256`
    pub async fn ensure_model(
        &self,
        precision: ModelPrecision,
        expected_sha256: Option<&str>,
        progress: PhaseCallback<'_>,
    ) -> Result<PathBuf> {
        let path = self.cached_path(precision);
        if path.is_file() {
            if verify_file_integrity(&path, expected_sha256)? {
                log::debug!("Using cached model {}", path.display());
                progress(CutoutPhase::FETCH_MODEL_KEY, 1, 1);
                return Ok(path);
            }
            log::warn!("Cached model {} failed verification, downloading again", path.display());
        }

        let url = Self::model_url(precision);
        log::info!("Downloading {} model from {}", precision, url);
        self.download_file(&url, &path, progress).await?;

        if !verify_file_integrity(&path, expected_sha256)? {
            let _ = std::fs::remove_file(&path);
            return Err(NobgError::model(format!(
                "Downloaded model from {url} failed SHA-256 verification"
            )));
        }
        Ok(path)
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: PhaseCallback<'_>,
    ) -> Result<()> {
        let dir = local_path.parent().unwrap_or(&self.cache_dir);
        std::fs::create_dir_all(dir)
            .map_err(|e| NobgError::file_io_error("create directory", dir, &e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NobgError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(NobgError::network_error(
                format!("HTTP error for {url}"),
                response.status(),
            ));
        }

        let total = response.content_length().unwrap_or(0);
        progress(CutoutPhase::FETCH_MODEL_KEY, 0, total);

        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| NobgError::file_io_error("create temporary file in", dir, &e))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| NobgError::file_io_error("open temporary file", temp.path(), &e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| NobgError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| NobgError::file_io_error("write to file", temp.path(), &e))?;
            downloaded += bytes_read as u64;
            progress(CutoutPhase::FETCH_MODEL_KEY, downloaded, total);
        }

        file.flush()
            .await
            .map_err(|e| NobgError::file_io_error("flush file", temp.path(), &e))?;
        drop(file);

        temp.persist(local_path)
            .map_err(|e| NobgError::file_io_error("persist model", local_path, &e.error))?;

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }
}

/// Check a file against an optional hex SHA-256 digest
///
/// Returns `Ok(true)` when no digest is given.
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = std::fs::read(file_path)
        .map_err(|e| NobgError::file_io_error("read file for verification", file_path, &e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual = format!("{:x}", hasher.finalize());

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}
