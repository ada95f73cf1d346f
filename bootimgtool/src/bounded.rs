//! Length-checked byte fields for the fixed-width header strings
//!
//! The header stores the product name and both command lines as fixed
//! arrays padded with NUL bytes. [`BoundedBytes`] keeps only the
//! meaningful bytes and refuses anything longer than the on-disk width.

use crate::error::{BootImgError, Result};
use crate::{BOOT_ARGS_SIZE, BOOT_EXTRA_ARGS_SIZE, BOOT_NAME_SIZE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::io::Write;

/// Product name field (16 bytes on disk)
pub type ProductName = BoundedBytes<BOOT_NAME_SIZE>;

/// Kernel command line field (512 bytes on disk)
pub type Cmdline = BoundedBytes<BOOT_ARGS_SIZE>;

/// Extra kernel command line field (1024 bytes on disk)
pub type ExtraCmdline = BoundedBytes<BOOT_EXTRA_ARGS_SIZE>;

/// Byte string holding at most `MAX` bytes
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BoundedBytes<const MAX: usize> {
    bytes: Vec<u8>,
}

impl<const MAX: usize> BoundedBytes<MAX> {
    /// Maximum number of bytes this field can hold
    pub const MAX_LEN: usize = MAX;

    /// Create a field, failing with [`BootImgError::FieldTooLong`] if
    /// `bytes` does not fit. `field` names the value in the error.
    pub fn new(field: &'static str, bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX {
            return Err(BootImgError::FieldTooLong {
                field,
                len: bytes.len(),
                max: MAX,
            });
        }
        Ok(Self { bytes })
    }

    /// Build a field from its on-disk form, dropping trailing NUL padding.
    ///
    /// Bytes after an embedded NUL are kept so the field re-encodes to the
    /// same bytes it was read from.
    pub fn from_padded(raw: &[u8]) -> Self {
        let raw = &raw[..raw.len().min(MAX)];
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        Self {
            bytes: raw[..end].to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// On-disk representation, zero-padded to `MAX` bytes
    pub fn to_padded(&self) -> [u8; MAX] {
        let mut out = [0u8; MAX];
        out[..self.bytes.len()].copy_from_slice(&self.bytes);
        out
    }

    /// Write the zero-padded on-disk representation
    pub fn write_padded<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.bytes)?;
        writer.write_all(&vec![0u8; MAX - self.bytes.len()])
    }

    /// Text up to the first NUL, the way a bootloader would read it
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        String::from_utf8_lossy(&self.bytes[..end])
    }
}

impl<const MAX: usize> fmt::Debug for BoundedBytes<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}

impl<const MAX: usize> fmt::Display for BoundedBytes<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl<const MAX: usize> Serialize for BoundedBytes<MAX> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl<'de, const MAX: usize> Deserialize<'de> for BoundedBytes<MAX> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::new("text field", text).map_err(serde::de::Error::custom)
    }
}
