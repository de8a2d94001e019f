//! Core types for cutout and export operations

use crate::error::{NobgError, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest width or height accepted for a custom export size
pub const MAX_CUSTOM_DIMENSION: u32 = 10_000;

/// Media types accepted at the upload boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Jpeg,
    Png,
    WebP,
}

impl MediaType {
    /// Map a MIME string to a supported media type
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// A user-selected image that passed upload validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// Declared media type
    pub media_type: MediaType,
    /// File name as selected by the user, used for export naming
    pub file_name: String,
}

impl SourceImage {
    #[must_use]
    pub fn new<S: Into<String>>(bytes: Vec<u8>, media_type: MediaType, file_name: S) -> Self {
        Self {
            bytes,
            media_type,
            file_name: file_name.into(),
        }
    }

    /// Size of the raw file in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Output of a successful cutout run
///
/// Holds both the decoded RGBA raster used by resizing and the encoded PNG the
/// model produced, which source-size PNG exports hand back unchanged.
#[derive(Debug, Clone)]
pub struct CutoutResult {
    pub width: u32,
    pub height: u32,
    pub image: RgbaImage,
    pub encoded: Vec<u8>,
}

impl CutoutResult {
    /// Decode the encoded model output into a cutout
    ///
    /// # Errors
    /// - Bytes that are not a decodable image
    pub fn from_encoded(encoded: Vec<u8>) -> Result<Self> {
        let image = image::load_from_memory(&encoded)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            image,
            encoded,
        })
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Progress notification surfaced to the user during a cutout run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Completion in percent, 0-100
    pub percentage: u8,
    pub message: String,
}

impl ProgressEvent {
    #[must_use]
    pub fn new<S: Into<String>>(percentage: u8, message: S) -> Self {
        Self {
            percentage: percentage.min(100),
            message: message.into(),
        }
    }
}

/// A named export size; `None` keeps the source dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePreset {
    pub label: &'static str,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Built-in export sizes, in display order
pub const SIZE_PRESETS: [SizePreset; 5] = [
    SizePreset {
        label: "original",
        width: None,
        height: None,
    },
    SizePreset {
        label: "1920x1080",
        width: Some(1920),
        height: Some(1080),
    },
    SizePreset {
        label: "1280x720",
        width: Some(1280),
        height: Some(720),
    },
    SizePreset {
        label: "800x600",
        width: Some(800),
        height: Some(600),
    },
    SizePreset {
        label: "640x480",
        width: Some(640),
        height: Some(480),
    },
];

/// Target size for an export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    Preset(SizePreset),
    Custom {
        width: Option<u32>,
        height: Option<u32>,
    },
}

impl Default for SizeSpec {
    fn default() -> Self {
        Self::original()
    }
}

impl SizeSpec {
    /// Keep the cutout's own dimensions
    #[must_use]
    pub fn original() -> Self {
        Self::Preset(SIZE_PRESETS[0])
    }

    /// Look up a built-in preset by label
    #[must_use]
    pub fn preset(label: &str) -> Option<Self> {
        SIZE_PRESETS
            .iter()
            .find(|preset| preset.label.eq_ignore_ascii_case(label))
            .map(|preset| Self::Preset(*preset))
    }

    /// Custom bounding box
    ///
    /// # Errors
    /// - Either dimension outside 1-10000
    pub fn custom(width: u32, height: u32) -> Result<Self> {
        Ok(Self::Custom {
            width: Some(check_dimension("width", width)?),
            height: Some(check_dimension("height", height)?),
        })
    }

    /// Custom width; height follows the source aspect ratio
    ///
    /// # Errors
    /// - Width outside 1-10000
    pub fn custom_width(width: u32) -> Result<Self> {
        Ok(Self::Custom {
            width: Some(check_dimension("width", width)?),
            height: None,
        })
    }

    /// Custom height; width follows the source aspect ratio
    ///
    /// # Errors
    /// - Height outside 1-10000
    pub fn custom_height(height: u32) -> Result<Self> {
        Ok(Self::Custom {
            width: None,
            height: Some(check_dimension("height", height)?),
        })
    }

    /// Requested width and height, `None` meaning the source dimension
    #[must_use]
    pub fn target(&self) -> (Option<u32>, Option<u32>) {
        match *self {
            Self::Preset(preset) => (preset.width, preset.height),
            Self::Custom { width, height } => (width, height),
        }
    }

    /// Compact label used in export file names
    #[must_use]
    pub fn label(&self) -> String {
        match *self {
            Self::Preset(preset) => preset.label.chars().filter(|c| !c.is_whitespace()).collect(),
            Self::Custom {
                width: Some(w),
                height: Some(h),
            } => format!("{w}x{h}"),
            Self::Custom {
                width: Some(w),
                height: None,
            } => format!("{w}w"),
            Self::Custom {
                width: None,
                height: Some(h),
            } => format!("{h}h"),
            Self::Custom {
                width: None,
                height: None,
            } => SIZE_PRESETS[0].label.to_string(),
        }
    }

    /// Whether the export keeps the source dimensions
    #[must_use]
    pub fn is_source_size(&self) -> bool {
        self.target() == (None, None)
    }
}

fn check_dimension(name: &str, value: u32) -> Result<u32> {
    if (1..=MAX_CUSTOM_DIMENSION).contains(&value) {
        Ok(value)
    } else {
        Err(NobgError::config_value_error(
            &format!("custom {name}"),
            value,
            "1-10000",
            None,
        ))
    }
}

fn parse_dimension(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| NobgError::invalid_config(format!("Invalid {name} '{raw}' in size")))
}

impl FromStr for SizeSpec {
    type Err = NobgError;

    /// Parse a preset label, `WxH`, `Wx` or `xH`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(preset) = Self::preset(s) {
            return Ok(preset);
        }

        let lower = s.to_ascii_lowercase();
        let Some((w, h)) = lower.split_once('x') else {
            return Err(NobgError::invalid_config(format!(
                "Unknown size '{s}', expected a preset or WxH"
            )));
        };

        match (w.is_empty(), h.is_empty()) {
            (false, false) => Self::custom(
                parse_dimension("width", w)?,
                parse_dimension("height", h)?,
            ),
            (false, true) => Self::custom_width(parse_dimension("width", w)?),
            (true, false) => Self::custom_height(parse_dimension("height", h)?),
            (true, true) => Err(NobgError::invalid_config(
                "Size needs at least a width or a height",
            )),
        }
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Encodings offered at export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Lossless with alpha
    #[default]
    Png,
    /// Lossy, composited over a white matte
    Jpeg,
}

impl ExportFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    #[must_use]
    pub fn supports_transparency(self) -> bool {
        matches!(self, Self::Png)
    }
}

impl FromStr for ExportFormat {
    type Err = NobgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(Self::Png),
            "jpeg" | "jpg" | "image/jpeg" => Ok(Self::Jpeg),
            other => Err(NobgError::invalid_config(format!(
                "Unsupported export format '{other}', expected png or jpeg"
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Encoded export ready to be saved
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub bytes: Vec<u8>,
    /// Suggested file name, e.g. `photo_nobg_800x600.png`
    pub filename: String,
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
}
