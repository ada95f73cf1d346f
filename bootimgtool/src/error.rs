//! Error types for boot image processing

use crate::segment::SegmentKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for boot image operations
pub type Result<T> = std::result::Result<T, BootImgError>;

/// Errors that can occur while reading, disassembling or building an image
#[derive(Error, Debug)]
pub enum BootImgError {
    #[error("Invalid boot magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: String, found: String },

    #[error("Image too short: {len} bytes (expected at least {min})")]
    ImageTooShort { len: usize, min: usize },

    #[error("Unsupported header version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid page size {page_size}: {reason}")]
    InvalidPageSize { page_size: u32, reason: &'static str },

    #[error("{kind} segment out of bounds: offset {offset} + size {size} exceeds image length {len}")]
    SegmentOutOfBounds {
        kind: SegmentKind,
        offset: u64,
        size: u32,
        len: usize,
    },

    #[error("{kind} segment too large: {size} bytes")]
    SegmentTooLarge { kind: SegmentKind, size: u64 },

    #[error("Missing {kind} file: {}", .path.display())]
    MissingSegmentFile { kind: SegmentKind, path: PathBuf },

    #[error("{field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Unknown recipe tag {tag:?} at offset {offset}")]
    UnknownRecipeTag { tag: String, offset: u64 },

    #[error("Truncated recipe record '{tag}' at offset {offset}")]
    TruncatedRecipe { tag: &'static str, offset: u64 },

    #[error("Invalid value for recipe tag '{tag}': {reason}")]
    InvalidRecipeValue { tag: &'static str, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl BootImgError {
    /// Create an invalid magic error from the bytes found at offset 0
    pub fn invalid_magic(found: &[u8]) -> Self {
        Self::InvalidMagic {
            expected: String::from_utf8_lossy(crate::BOOT_MAGIC).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        }
    }

    /// Wrap an I/O error with the path it happened on
    pub fn file_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn zero_page_size() -> Self {
        Self::InvalidPageSize {
            page_size: 0,
            reason: "must be non-zero",
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
