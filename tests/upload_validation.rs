//! Upload boundary checks on real files

use nobg::{read_source, FileDescriptor, MediaType, NobgError, UploadValidator};
use std::fs::File;
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;

/// Sparse file of the given length
fn file_of_size(dir: &TempDir, name: &str, len: u64) -> std::path::PathBuf {
    let path = dir.path().join(name);
    File::create(&path).unwrap().set_len(len).unwrap();
    path
}

#[test]
fn test_rejects_25mb_file() {
    let dir = TempDir::new().unwrap();
    let path = file_of_size(&dir, "huge.jpg", 25 * MIB);

    let err = read_source(&path, &UploadValidator::default()).unwrap_err();
    assert!(matches!(err, NobgError::Validation(_)));
    assert_eq!(err.user_message(), "File size must not exceed 20MB");
}

#[test]
fn test_rejects_gif() {
    let dir = TempDir::new().unwrap();
    let path = file_of_size(&dir, "anim.gif", 1024);

    let err = read_source(&path, &UploadValidator::default()).unwrap_err();
    assert_eq!(err.user_message(), "Please upload a JPG, PNG or WebP image");
}

#[test]
fn test_accepts_5mb_png() {
    let dir = TempDir::new().unwrap();
    let path = file_of_size(&dir, "photo.png", 5 * MIB);

    let source = read_source(&path, &UploadValidator::default()).unwrap();
    assert_eq!(source.media_type, MediaType::Png);
    assert_eq!(source.size(), 5 * MIB);
    assert_eq!(source.file_name, "photo.png");
}

#[test]
fn test_declared_type_is_case_insensitive() {
    let validator = UploadValidator::default();
    for mime in ["image/JPEG", "image/jpg", "IMAGE/WEBP"] {
        assert!(
            validator
                .validate(&FileDescriptor::new("x", mime, 10))
                .is_ok(),
            "{mime}"
        );
    }
    assert!(validator
        .validate(&FileDescriptor::new("x.svg", "image/svg+xml", 10))
        .is_err());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = read_source(dir.path().join("nope.png"), &UploadValidator::default()).unwrap_err();
    assert!(matches!(err, NobgError::Io(_)));
}
