//! Boot image header structures and serialization
//!
//! The header is a packed little-endian struct. Version 0 defines the
//! base fields, version 1 appends the recovery dtbo fields and the header
//! size, version 2 appends the device tree blob fields.

use crate::bounded::{Cmdline, ExtraCmdline, ProductName};
use crate::error::{BootImgError, Result};
use crate::{
    BOOT_ARGS_SIZE, BOOT_EXTRA_ARGS_SIZE, BOOT_ID_WORDS, BOOT_MAGIC, BOOT_MAGIC_SIZE,
    BOOT_NAME_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

/// Size of the version 0 header
pub const HEADER_V0_SIZE: usize =
    BOOT_MAGIC_SIZE + 10 * 4 + BOOT_NAME_SIZE + BOOT_ARGS_SIZE + BOOT_ID_WORDS * 4 + BOOT_EXTRA_ARGS_SIZE;

/// Bytes appended by version 1: recovery dtbo size, offset and header size
pub const HEADER_V1_EXTRA: usize = 4 + 8 + 4;

/// Bytes appended by version 2: dtb size and address
pub const HEADER_V2_EXTRA: usize = 4 + 8;

/// Size of the largest supported header
pub const HEADER_MAX_SIZE: usize = HEADER_V0_SIZE + HEADER_V1_EXTRA + HEADER_V2_EXTRA;

/// Byte offset of the `header_version` field
pub const HEADER_VERSION_OFFSET: usize = BOOT_MAGIC_SIZE + 8 * 4;

/// Supported header layout versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HeaderVersion {
    #[default]
    V0 = 0,
    V1 = 1,
    V2 = 2,
}

impl HeaderVersion {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Number of header bytes written for this version
    pub fn header_size(self) -> usize {
        header_size_for(self)
    }

    pub fn has_recovery_dtbo(self) -> bool {
        self >= HeaderVersion::V1
    }

    pub fn has_dtb(self) -> bool {
        self >= HeaderVersion::V2
    }
}

impl TryFrom<u32> for HeaderVersion {
    type Error = BootImgError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(BootImgError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for HeaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Header bytes actually written for `version`
pub fn header_size_for(version: HeaderVersion) -> usize {
    match version {
        HeaderVersion::V0 => HEADER_MAX_SIZE - (HEADER_V1_EXTRA + HEADER_V2_EXTRA),
        HeaderVersion::V1 => HEADER_MAX_SIZE - HEADER_V2_EXTRA,
        HeaderVersion::V2 => HEADER_MAX_SIZE,
    }
}

/// Split an `os_version` value into `(release, major, minor)`
pub fn decode_os_version(os_version: u32) -> (u32, u32, u32) {
    (
        (os_version >> 25) & 0x7f,
        (os_version >> 18) & 0x7f,
        (os_version >> 11) & 0x7f,
    )
}

/// Split the patch level bits of an `os_version` value into `(year, month)`
pub fn decode_patch_level(os_version: u32) -> (u32, u32) {
    (((os_version >> 4) & 0x7f) + 2000, os_version & 0xf)
}

/// Pack a version and patch level into an `os_version` value
pub fn encode_os_version(version: OsVersion, patch: PatchLevel) -> u32 {
    ((version.release & 0x7f) << 25)
        | ((version.major & 0x7f) << 18)
        | ((version.minor & 0x7f) << 11)
        | ((patch.year.saturating_sub(2000) & 0x7f) << 4)
        | (patch.month & 0xf)
}

/// Operating system version, e.g. `11.0.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsVersion {
    pub release: u32,
    pub major: u32,
    pub minor: u32,
}

impl OsVersion {
    pub fn decode(os_version: u32) -> Self {
        let (release, major, minor) = decode_os_version(os_version);
        Self {
            release,
            major,
            minor,
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.release, self.major, self.minor)
    }
}

impl FromStr for OsVersion {
    type Err = BootImgError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .ok()
                    .filter(|&v| v < 128)
                    .ok_or_else(|| BootImgError::invalid_argument(format!("invalid os version: {s}")))
            })
            .collect::<Result<Vec<_>>>()?;

        match parts.as_slice() {
            [release] => Ok(Self {
                release: *release,
                major: 0,
                minor: 0,
            }),
            [release, major] => Ok(Self {
                release: *release,
                major: *major,
                minor: 0,
            }),
            [release, major, minor] => Ok(Self {
                release: *release,
                major: *major,
                minor: *minor,
            }),
            _ => Err(BootImgError::invalid_argument(format!(
                "invalid os version: {s}"
            ))),
        }
    }
}

/// Security patch level, e.g. `2024-05`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchLevel {
    pub year: u32,
    pub month: u32,
}

impl PatchLevel {
    pub fn decode(os_version: u32) -> Self {
        let (year, month) = decode_patch_level(os_version);
        Self { year, month }
    }
}

impl Default for PatchLevel {
    fn default() -> Self {
        Self {
            year: 2000,
            month: 0,
        }
    }
}

impl fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for PatchLevel {
    type Err = BootImgError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BootImgError::invalid_argument(format!("invalid patch level: {s}"));

        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: u32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;

        if !(2000..2128).contains(&year) || !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

/// Boot image header (versions 0 to 2)
///
/// The magic is implied: it is checked when decoding and always written
/// when encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootImageHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub header_version: HeaderVersion,
    /// Packed OS version and patch level, passed through unmodified
    pub os_version: u32,
    pub name: ProductName,
    pub cmdline: Cmdline,
    pub id: [u32; BOOT_ID_WORDS],
    pub extra_cmdline: ExtraCmdline,

    // v1
    pub recovery_dtbo_size: u32,
    pub recovery_dtbo_offset: u64,
    pub header_size: u32,

    // v2
    pub dtb_size: u32,
    pub dtb_addr: u64,
}

impl BootImageHeader {
    /// Create an empty header for the given version
    pub fn new(version: HeaderVersion) -> Self {
        Self {
            header_version: version,
            ..Self::default()
        }
    }

    /// Number of bytes this header encodes to
    pub fn encoded_size(&self) -> usize {
        header_size_for(self.header_version)
    }

    pub fn os(&self) -> OsVersion {
        OsVersion::decode(self.os_version)
    }

    pub fn patch_level(&self) -> PatchLevel {
        PatchLevel::decode(self.os_version)
    }

    /// Validate fields the layout depends on
    ///
    /// The page size must be non-zero and large enough for the header to
    /// fit in the first page.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(BootImgError::zero_page_size());
        }
        if (self.page_size as usize) < self.encoded_size() {
            return Err(BootImgError::InvalidPageSize {
                page_size: self.page_size,
                reason: "smaller than the header",
            });
        }
        Ok(())
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.encoded_size());
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Write exactly [`encoded_size`](Self::encoded_size) bytes
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(BOOT_MAGIC)?;

        writer.write_u32::<LittleEndian>(self.kernel_size)?;
        writer.write_u32::<LittleEndian>(self.kernel_addr)?;
        writer.write_u32::<LittleEndian>(self.ramdisk_size)?;
        writer.write_u32::<LittleEndian>(self.ramdisk_addr)?;
        writer.write_u32::<LittleEndian>(self.second_size)?;
        writer.write_u32::<LittleEndian>(self.second_addr)?;
        writer.write_u32::<LittleEndian>(self.tags_addr)?;
        writer.write_u32::<LittleEndian>(self.page_size)?;
        writer.write_u32::<LittleEndian>(self.header_version.as_u32())?;
        writer.write_u32::<LittleEndian>(self.os_version)?;

        self.name.write_padded(writer)?;
        self.cmdline.write_padded(writer)?;
        for word in self.id {
            writer.write_u32::<LittleEndian>(word)?;
        }
        self.extra_cmdline.write_padded(writer)?;

        if self.header_version.has_recovery_dtbo() {
            writer.write_u32::<LittleEndian>(self.recovery_dtbo_size)?;
            writer.write_u64::<LittleEndian>(self.recovery_dtbo_offset)?;
            writer.write_u32::<LittleEndian>(self.header_size)?;
        }

        if self.header_version.has_dtb() {
            writer.write_u32::<LittleEndian>(self.dtb_size)?;
            writer.write_u64::<LittleEndian>(self.dtb_addr)?;
        }

        Ok(())
    }

    /// Deserialize a header from the start of `data`.
    ///
    /// The magic and version are checked before any other field is read,
    /// and fields of later versions are left at zero.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_MAGIC_SIZE {
            return Err(BootImgError::ImageTooShort {
                len: data.len(),
                min: BOOT_MAGIC_SIZE,
            });
        }
        if &data[..BOOT_MAGIC_SIZE] != BOOT_MAGIC {
            return Err(BootImgError::invalid_magic(&data[..BOOT_MAGIC_SIZE]));
        }

        let version_end = HEADER_VERSION_OFFSET + 4;
        if data.len() < version_end {
            return Err(BootImgError::ImageTooShort {
                len: data.len(),
                min: version_end,
            });
        }
        let raw_version = (&data[HEADER_VERSION_OFFSET..version_end]).read_u32::<LittleEndian>()?;
        let header_version = HeaderVersion::try_from(raw_version)?;

        let size = header_size_for(header_version);
        if data.len() < size {
            return Err(BootImgError::ImageTooShort {
                len: data.len(),
                min: size,
            });
        }

        let mut cursor = Cursor::new(&data[BOOT_MAGIC_SIZE..size]);
        let mut header = Self::new(header_version);

        header.kernel_size = cursor.read_u32::<LittleEndian>()?;
        header.kernel_addr = cursor.read_u32::<LittleEndian>()?;
        header.ramdisk_size = cursor.read_u32::<LittleEndian>()?;
        header.ramdisk_addr = cursor.read_u32::<LittleEndian>()?;
        header.second_size = cursor.read_u32::<LittleEndian>()?;
        header.second_addr = cursor.read_u32::<LittleEndian>()?;
        header.tags_addr = cursor.read_u32::<LittleEndian>()?;
        header.page_size = cursor.read_u32::<LittleEndian>()?;
        // already decoded above
        cursor.read_u32::<LittleEndian>()?;
        header.os_version = cursor.read_u32::<LittleEndian>()?;

        let mut name = [0u8; BOOT_NAME_SIZE];
        cursor.read_exact(&mut name)?;
        header.name = ProductName::from_padded(&name);

        let mut cmdline = [0u8; BOOT_ARGS_SIZE];
        cursor.read_exact(&mut cmdline)?;
        header.cmdline = Cmdline::from_padded(&cmdline);

        for word in header.id.iter_mut() {
            *word = cursor.read_u32::<LittleEndian>()?;
        }

        let mut extra = [0u8; BOOT_EXTRA_ARGS_SIZE];
        cursor.read_exact(&mut extra)?;
        header.extra_cmdline = ExtraCmdline::from_padded(&extra);

        if header_version.has_recovery_dtbo() {
            header.recovery_dtbo_size = cursor.read_u32::<LittleEndian>()?;
            header.recovery_dtbo_offset = cursor.read_u64::<LittleEndian>()?;
            header.header_size = cursor.read_u32::<LittleEndian>()?;
        }

        if header_version.has_dtb() {
            header.dtb_size = cursor.read_u32::<LittleEndian>()?;
            header.dtb_addr = cursor.read_u64::<LittleEndian>()?;
        }

        Ok(header)
    }

    /// Read a header from a reader, consuming only the bytes its version needs
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = vec![0u8; HEADER_VERSION_OFFSET + 4];
        reader.read_exact(&mut prefix)?;
        if &prefix[..BOOT_MAGIC_SIZE] != BOOT_MAGIC {
            return Err(BootImgError::invalid_magic(&prefix[..BOOT_MAGIC_SIZE]));
        }

        let raw_version = (&prefix[HEADER_VERSION_OFFSET..]).read_u32::<LittleEndian>()?;
        let size = header_size_for(HeaderVersion::try_from(raw_version)?);

        let mut data = prefix;
        data.resize(size, 0);
        reader.read_exact(&mut data[HEADER_VERSION_OFFSET + 4..])?;
        Self::from_bytes(&data)
    }

    /// Human readable listing of the header fields
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("header version: {}", self.header_version),
            format!("kernel size = {}", self.kernel_size),
            format!("kernel address = 0x{:x}", self.kernel_addr),
            format!("ramdisk size = {}", self.ramdisk_size),
            format!("ramdisk address = 0x{:x}", self.ramdisk_addr),
        ];

        if self.second_size > 0 {
            lines.push(format!("second size = {}", self.second_size));
            lines.push(format!("second address = 0x{:x}", self.second_addr));
        }

        lines.push(format!("tags address = 0x{:x}", self.tags_addr));
        lines.push(format!("os version = {}", self.os()));
        lines.push(format!("os patch level = {}", self.patch_level()));
        lines.push(format!("name = {}", self.name));
        lines.push(format!("cmdline = {}", self.cmdline));
        if !self.extra_cmdline.is_empty() {
            lines.push(format!("extra cmdline = {}", self.extra_cmdline));
        }
        lines.push(format!("pagesize = {}", self.page_size));

        if self.header_version.has_recovery_dtbo() {
            lines.push(format!("header size = {}", self.header_size));
            if self.recovery_dtbo_size > 0 {
                lines.push(format!("recovery dtbo size = {}", self.recovery_dtbo_size));
                lines.push(format!("recovery dtbo offset = {}", self.recovery_dtbo_offset));
            }
        }

        if self.header_version.has_dtb() {
            lines.push(format!("dtb size = {}", self.dtb_size));
            lines.push(format!("dtb addr = 0x{:x}", self.dtb_addr));
        }

        let id = self
            .id
            .iter()
            .map(|word| format!("{:08x}", word))
            .collect::<Vec<_>>()
            .join("");
        lines.push(format!("id = {}", id));

        lines.join("\n")
    }
}
