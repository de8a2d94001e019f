//! File input/output at the edges of the pipeline
//!
//! Reading goes through the upload validator before any bytes are loaded.
//! Exports are written through a temporary file in the destination directory
//! and persisted atomically under the suggested file name.

use crate::{
    error::{NobgError, Result},
    services::validation::{FileDescriptor, UploadValidator},
    types::{ExportResult, SourceImage},
};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Validate and read a source image from disk
///
/// Metadata is checked first so oversized or unsupported files are rejected
/// without reading them.
///
/// # Errors
/// - `Validation` when the file type or size is not accepted
/// - `Io` when the file cannot be read
pub fn read_source<P: AsRef<Path>>(path: P, validator: &UploadValidator) -> Result<SourceImage> {
    let path = path.as_ref();
    let descriptor = FileDescriptor::from_path(path)?;
    validator.validate(&descriptor)?;

    let bytes =
        std::fs::read(path).map_err(|e| NobgError::file_io_error("read input file", path, &e))?;
    log::debug!("Read {} ({} bytes)", path.display(), bytes.len());
    validator.accept(&descriptor, bytes)
}

/// Write an export into `dir` under its suggested file name
///
/// Returns the final path. An existing file with the same name is replaced.
///
/// # Errors
/// - `Io` when the directory cannot be created or the file cannot be written
pub fn save_export<P: AsRef<Path>>(result: &ExportResult, dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .map_err(|e| NobgError::file_io_error("create output directory", dir, &e))?;

    let target = dir.join(&result.filename);
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| NobgError::file_io_error("create temporary file in", dir, &e))?;
    temp.write_all(&result.bytes)
        .map_err(|e| NobgError::file_io_error("write export", temp.path(), &e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| NobgError::file_io_error("flush export", temp.path(), &e))?;
    temp.persist(&target)
        .map_err(|e| NobgError::file_io_error("persist export", &target, &e.error))?;

    log::info!(
        "Saved {} ({}x{}, {} bytes)",
        target.display(),
        result.width,
        result.height,
        result.bytes.len()
    );
    Ok(target)
}
