//! Payload segments packed behind the boot image header

use crate::error::{BootImgError, Result};
use std::fmt;
use std::path::Path;

/// First two bytes of a gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Segment kinds, declared in on-disk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentKind {
    Kernel,
    Ramdisk,
    /// Second-stage bootloader
    Second,
    /// Recovery device tree overlay (header v1+)
    RecoveryDtbo,
    /// Device tree blob (header v2)
    Dtb,
}

impl SegmentKind {
    /// All kinds in the order they follow the header
    pub const ORDER: [SegmentKind; 5] = [
        SegmentKind::Kernel,
        SegmentKind::Ramdisk,
        SegmentKind::Second,
        SegmentKind::RecoveryDtbo,
        SegmentKind::Dtb,
    ];

    /// Kernel and ramdisk must always be present
    pub fn is_required(self) -> bool {
        matches!(self, SegmentKind::Kernel | SegmentKind::Ramdisk)
    }

    /// Base filename used when the segment is extracted
    pub fn file_stem(self) -> &'static str {
        match self {
            SegmentKind::Kernel => "kernel",
            SegmentKind::Ramdisk => "ramdisk",
            SegmentKind::Second => "second",
            SegmentKind::RecoveryDtbo => "recovery_dtbo",
            SegmentKind::Dtb => "dtb",
        }
    }

    /// Filename for extracted `data`; kernel and ramdisk get a `.gz`
    /// suffix when they start with the gzip magic.
    pub fn output_file_name(self, data: &[u8]) -> String {
        let sniffed = matches!(self, SegmentKind::Kernel | SegmentKind::Ramdisk);
        if sniffed && is_gzip(data) {
            format!("{}.gz", self.file_stem())
        } else {
            self.file_stem().to_string()
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Kernel => "kernel",
            SegmentKind::Ramdisk => "ramdisk",
            SegmentKind::Second => "second stage",
            SegmentKind::RecoveryDtbo => "recovery dtbo",
            SegmentKind::Dtb => "dtb",
        };
        write!(f, "{}", name)
    }
}

/// Check the two-byte gzip signature
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// One payload held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub data: Vec<u8>,
    /// Load address from the header, where the format has one
    pub load_addr: Option<u64>,
}

impl Segment {
    pub fn new(kind: SegmentKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            data,
            load_addr: None,
        }
    }

    pub fn with_load_addr(mut self, addr: u64) -> Self {
        self.load_addr = Some(addr);
        self
    }

    /// Read a segment file fully into memory.
    ///
    /// A missing file maps to [`BootImgError::MissingSegmentFile`]; other
    /// failures keep the path alongside the I/O error.
    pub fn load(kind: SegmentKind, path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BootImgError::MissingSegmentFile {
                kind,
                path: path.to_path_buf(),
            },
            _ => BootImgError::file_io(path, e),
        })?;

        if u32::try_from(data.len()).is_err() {
            return Err(BootImgError::SegmentTooLarge {
                kind,
                size: data.len() as u64,
            });
        }

        Ok(Self::new(kind, data))
    }

    /// Size as stored in the header
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_present(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn is_gzip(&self) -> bool {
        is_gzip(&self.data)
    }
}
