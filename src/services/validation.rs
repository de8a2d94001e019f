//! Upload boundary checks
//!
//! Files are checked for type first and size second, before any bytes reach
//! the cutout stage.

use crate::{
    config::UploadLimits,
    error::{NobgError, Result},
    types::{MediaType, SourceImage},
};
use image::ImageFormat;
use std::path::Path;

const MIB: u64 = 1024 * 1024;

/// What the upload boundary knows about a file before reading it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    /// Declared MIME type
    pub media_type: String,
    /// Size in bytes
    pub size: u64,
}

impl FileDescriptor {
    #[must_use]
    pub fn new<N: Into<String>, M: Into<String>>(name: N, media_type: M, size: u64) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size,
        }
    }

    /// Describe a file on disk, deriving the MIME type from its extension
    ///
    /// # Errors
    /// - File metadata cannot be read
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .map_err(|e| NobgError::file_io_error("inspect input file", path, &e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime_for_path(path), metadata.len()))
    }
}

/// MIME type derived from a path's extension, `application/octet-stream` when unknown
#[must_use]
pub fn mime_for_path<P: AsRef<Path>>(path: P) -> &'static str {
    ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Validates user-selected files against [`UploadLimits`]
#[derive(Debug, Clone, Default)]
pub struct UploadValidator {
    limits: UploadLimits,
}

impl UploadValidator {
    #[must_use]
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Check type and size, returning the supported media type
    ///
    /// # Errors
    /// - `Validation` with a user-facing message for an unaccepted type or an
    ///   oversized file
    pub fn validate(&self, file: &FileDescriptor) -> Result<MediaType> {
        let media_type = MediaType::from_mime(&file.media_type)
            .filter(|media_type| {
                self.limits
                    .accepted_types
                    .iter()
                    .any(|t| t.trim().eq_ignore_ascii_case(media_type.mime()))
            })
            .ok_or_else(|| NobgError::validation(self.type_message()))?;

        if file.size > self.limits.max_bytes {
            log::debug!(
                "Rejected {}: {} bytes over limit of {}",
                file.name,
                file.size,
                self.limits.max_bytes
            );
            return Err(NobgError::validation(self.size_message()));
        }

        Ok(media_type)
    }

    /// Validate a descriptor and take ownership of its bytes
    ///
    /// # Errors
    /// - Anything [`UploadValidator::validate`] rejects
    /// - Empty file contents
    pub fn accept(&self, file: &FileDescriptor, bytes: Vec<u8>) -> Result<SourceImage> {
        let media_type = self.validate(file)?;
        if bytes.is_empty() {
            return Err(NobgError::validation("The selected file is empty"));
        }
        Ok(SourceImage::new(bytes, media_type, file.name.clone()))
    }

    fn type_message(&self) -> String {
        let labels: Vec<&str> = self
            .limits
            .accepted_types
            .iter()
            .map(|t| type_label(t))
            .collect();
        let list = match labels.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
            Some((last, _)) => (*last).to_string(),
            None => String::new(),
        };
        format!("Please upload a {list} image")
    }

    fn size_message(&self) -> String {
        let max = self.limits.max_bytes;
        if max % MIB == 0 {
            format!("File size must not exceed {}MB", max / MIB)
        } else {
            format!("File size must not exceed {:.1}MB", max as f64 / MIB as f64)
        }
    }
}

fn type_label(mime: &str) -> &str {
    match mime {
        "image/jpeg" => "JPG",
        "image/png" => "PNG",
        "image/webp" => "WebP",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_checked_before_size() {
        let validator = UploadValidator::default();
        let err = validator
            .validate(&FileDescriptor::new("anim.gif", "image/gif", 100 * MIB))
            .unwrap_err();
        assert_eq!(err.user_message(), "Please upload a JPG, PNG or WebP image");
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let validator = UploadValidator::default();
        assert_eq!(
            validator
                .validate(&FileDescriptor::new("a.png", "image/png", 20 * MIB))
                .unwrap(),
            MediaType::Png
        );

        let err = validator
            .validate(&FileDescriptor::new("a.png", "image/png", 20 * MIB + 1))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "File size must not exceed 20MB");
    }

    #[test]
    fn test_custom_limits() {
        let validator = UploadValidator::new(UploadLimits {
            max_bytes: MIB + MIB / 2,
            accepted_types: vec!["image/png".to_string()],
        });

        let err = validator
            .validate(&FileDescriptor::new("a.jpg", "image/jpeg", 10))
            .unwrap_err();
        assert_eq!(err.to_string(), "Please upload a PNG image");

        let err = validator
            .validate(&FileDescriptor::new("a.png", "image/png", 2 * MIB))
            .unwrap_err();
        assert_eq!(err.to_string(), "File size must not exceed 1.5MB");
    }

    #[test]
    fn test_accept_rejects_empty_bytes() {
        let validator = UploadValidator::default();
        let file = FileDescriptor::new("a.webp", "image/webp", 0);
        assert!(validator.accept(&file, Vec::new()).is_err());

        let source = validator.accept(&file, vec![1, 2, 3]).unwrap();
        assert_eq!(source.media_type, MediaType::WebP);
        assert_eq!(source.file_name, "a.webp");
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path("photo.JPG"), "image/jpeg");
        assert_eq!(mime_for_path("photo.png"), "image/png");
        assert_eq!(mime_for_path("photo.webp"), "image/webp");
        assert_eq!(mime_for_path("anim.gif"), "image/gif");
        assert_eq!(mime_for_path("notes"), "application/octet-stream");
    }

    #[test]
    fn test_descriptor_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let file = FileDescriptor::from_path(&path).unwrap();
        assert_eq!(file.name, "shot.png");
        assert_eq!(file.media_type, "image/png");
        assert_eq!(file.size, 64);

        assert!(FileDescriptor::from_path(dir.path().join("missing.png")).is_err());
    }
}
