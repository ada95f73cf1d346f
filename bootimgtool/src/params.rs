//! Build parameters consumed by the image assembler

use crate::BOOT_ID_WORDS;
use crate::bounded::{Cmdline, ExtraCmdline, ProductName};
use crate::error::{BootImgError, Result};
use crate::header::{HeaderVersion, header_size_for};
use crate::recipe::{Record, Tag, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_BASE: u32 = 0x1000_0000;

/// Everything needed to assemble an image
///
/// Segment files are named relative to the directory handed to
/// [`ImageAssembler`](crate::ImageAssembler). `None` or an empty name means
/// the segment is not part of the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    pub kernel: Option<String>,
    pub kernel_addr: u32,
    pub ramdisk: Option<String>,
    pub ramdisk_addr: u32,
    pub second: Option<String>,
    pub second_addr: u32,
    pub recovery_dtbo: Option<String>,
    pub recovery_dtbo_offset: u64,
    pub dtb: Option<String>,
    pub dtb_addr: u64,
    pub tags_addr: u32,
    pub page_size: u32,
    pub header_version: u32,
    pub os_version: u32,
    pub name: ProductName,
    pub cmdline: Cmdline,
    pub extra_cmdline: ExtraCmdline,
    pub id: [u32; BOOT_ID_WORDS],
    /// Copy `id` into the image instead of computing it
    pub keep_id: bool,
}

impl Default for BuildParams {
    /// Conventional mkbootimg addresses, 2048-byte pages, header version 0
    fn default() -> Self {
        Self {
            kernel: None,
            kernel_addr: DEFAULT_BASE + 0x0000_8000,
            ramdisk: None,
            ramdisk_addr: DEFAULT_BASE + 0x0100_0000,
            second: None,
            second_addr: DEFAULT_BASE + 0x00f0_0000,
            recovery_dtbo: None,
            recovery_dtbo_offset: 0,
            dtb: None,
            dtb_addr: (DEFAULT_BASE + 0x01f0_0000) as u64,
            tags_addr: DEFAULT_BASE + 0x0000_0100,
            page_size: 2048,
            header_version: 0,
            os_version: 0,
            name: ProductName::default(),
            cmdline: Cmdline::default(),
            extra_cmdline: ExtraCmdline::default(),
            id: [0; BOOT_ID_WORDS],
            keep_id: false,
        }
    }
}

fn filename(tag: Tag, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| BootImgError::InvalidRecipeValue {
        tag: tag.name(),
        reason: format!("filename is not valid UTF-8: {e}"),
    })
}

fn mismatch(tag: Tag, value: &Value) -> BootImgError {
    BootImgError::InvalidRecipeValue {
        tag: tag.name(),
        reason: format!("unexpected value {value:?}"),
    }
}

impl BuildParams {
    /// All-zero parameters, the starting point when folding a recipe
    pub fn zeroed() -> Self {
        Self {
            kernel_addr: 0,
            ramdisk_addr: 0,
            second_addr: 0,
            dtb_addr: 0,
            tags_addr: 0,
            page_size: 0,
            ..Self::default()
        }
    }

    /// Apply one recipe record, returning the updated parameters
    pub fn apply(mut self, record: Record) -> Result<Self> {
        let Record { tag, value } = record;
        match (tag, value) {
            (Tag::KernelAddr, Value::U32(v)) => self.kernel_addr = v,
            (Tag::RamdiskAddr, Value::U32(v)) => self.ramdisk_addr = v,
            (Tag::SecondAddr, Value::U32(v)) => self.second_addr = v,
            (Tag::TagsAddr, Value::U32(v)) => self.tags_addr = v,
            (Tag::PageSize, Value::U32(v)) => self.page_size = v,
            (Tag::HeaderVersion, Value::U32(v)) => self.header_version = v,
            (Tag::OsVersion, Value::U32(v)) => self.os_version = v,
            (Tag::RecoveryDtboOffset, Value::U64(v)) => self.recovery_dtbo_offset = v,
            (Tag::DtbAddr, Value::U64(v)) => self.dtb_addr = v,
            (Tag::Id, Value::Id(words)) => self.id = words,
            (Tag::KernelName, Value::Bytes(b)) => self.kernel = Some(filename(tag, b)?),
            (Tag::RamdiskName, Value::Bytes(b)) => self.ramdisk = Some(filename(tag, b)?),
            (Tag::SecondName, Value::Bytes(b)) => self.second = Some(filename(tag, b)?),
            (Tag::RecoveryDtboName, Value::Bytes(b)) => {
                self.recovery_dtbo = Some(filename(tag, b)?)
            }
            (Tag::DtbName, Value::Bytes(b)) => self.dtb = Some(filename(tag, b)?),
            (Tag::ProductName, Value::Bytes(b)) => self.name = ProductName::new("product name", b)?,
            (Tag::Cmdline, Value::Bytes(b)) => self.cmdline = Cmdline::new("cmdline", b)?,
            (Tag::ExtraCmdline, Value::Bytes(b)) => {
                self.extra_cmdline = ExtraCmdline::new("extra cmdline", b)?
            }
            (tag, value) => return Err(mismatch(tag, &value)),
        }
        Ok(self)
    }

    /// Validated header version
    pub fn version(&self) -> Result<HeaderVersion> {
        HeaderVersion::try_from(self.header_version)
    }

    /// Header size the image will declare for this version
    pub fn header_size(&self) -> Result<u32> {
        Ok(header_size_for(self.version()?) as u32)
    }

    /// Parse parameters from TOML text; missing keys take the defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load parameters from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BootImgError::file_io(path, e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Recipe;

    #[test]
    fn test_defaults() {
        let params = BuildParams::default();
        assert_eq!(params.kernel_addr, 0x1000_8000);
        assert_eq!(params.ramdisk_addr, 0x1100_0000);
        assert_eq!(params.second_addr, 0x10f0_0000);
        assert_eq!(params.tags_addr, 0x1000_0100);
        assert_eq!(params.dtb_addr, 0x11f0_0000);
        assert_eq!(params.page_size, 2048);
        assert_eq!(params.version().unwrap(), HeaderVersion::V0);
        assert!(!params.keep_id);
    }

    #[test]
    fn test_fold_recipe() {
        let recipe: Recipe = [
            Record::u32(Tag::KernelAddr, 0x8000).unwrap(),
            Record::u32(Tag::PageSize, 4096).unwrap(),
            Record::u32(Tag::HeaderVersion, 2).unwrap(),
            Record::bytes(Tag::KernelName, "kernel.gz").unwrap(),
            Record::bytes(Tag::RamdiskName, "ramdisk").unwrap(),
            Record::bytes(Tag::ProductName, "device").unwrap(),
            Record::bytes(Tag::Cmdline, "quiet").unwrap(),
            Record::new(Tag::Id, Value::Id([9; 8])).unwrap(),
            Record::u64(Tag::DtbAddr, 0x1_0000_0000).unwrap(),
            Record::bytes(Tag::DtbName, "dtb").unwrap(),
            // later record wins
            Record::u32(Tag::KernelAddr, 0x9000).unwrap(),
        ]
        .into_iter()
        .collect();

        let params = recipe.to_params().unwrap();
        assert_eq!(params.kernel_addr, 0x9000);
        assert_eq!(params.page_size, 4096);
        assert_eq!(params.header_version, 2);
        assert_eq!(params.kernel.as_deref(), Some("kernel.gz"));
        assert_eq!(params.ramdisk.as_deref(), Some("ramdisk"));
        assert_eq!(params.name.as_bytes(), b"device");
        assert_eq!(params.cmdline.as_bytes(), b"quiet");
        assert_eq!(params.id, [9; 8]);
        assert_eq!(params.dtb_addr, 0x1_0000_0000);
        assert_eq!(params.dtb.as_deref(), Some("dtb"));
        // fields not in the recipe stay zero
        assert_eq!(params.ramdisk_addr, 0);
        assert_eq!(params.second, None);
    }

    #[test]
    fn test_apply_rejects_mismatched_value() {
        let record = Record {
            tag: Tag::PageSize,
            value: Value::Bytes(b"2048".to_vec()),
        };
        assert!(matches!(
            BuildParams::zeroed().apply(record),
            Err(BootImgError::InvalidRecipeValue { tag: "pas", .. })
        ));
    }

    #[test]
    fn test_apply_rejects_non_utf8_filename() {
        let record = Record::bytes(Tag::KernelName, vec![0xff, 0xfe]).unwrap();
        assert!(BuildParams::zeroed().apply(record).is_err());
    }

    #[test]
    fn test_header_size_by_version() {
        let mut params = BuildParams::default();
        assert_eq!(params.header_size().unwrap(), 1632);
        params.header_version = 1;
        assert_eq!(params.header_size().unwrap(), 1648);
        params.header_version = 2;
        assert_eq!(params.header_size().unwrap(), 1660);
        params.header_version = 3;
        assert!(matches!(
            params.header_size(),
            Err(BootImgError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_from_toml() {
        let params = BuildParams::from_toml_str(
            r#"
            kernel = "Image.gz"
            ramdisk = "initrd.img"
            dtb = "board.dtb"
            header_version = 2
            page_size = 4096
            kernel_addr = 0x80008000
            name = "board"
            cmdline = "console=ttyS0"
            "#,
        )
        .unwrap();

        assert_eq!(params.kernel.as_deref(), Some("Image.gz"));
        assert_eq!(params.dtb.as_deref(), Some("board.dtb"));
        assert_eq!(params.page_size, 4096);
        assert_eq!(params.kernel_addr, 0x8000_8000);
        assert_eq!(params.name.to_string(), "board");
        // untouched keys keep their defaults
        assert_eq!(params.ramdisk_addr, 0x1100_0000);
    }

    #[test]
    fn test_from_toml_overlong_cmdline() {
        let text = format!("cmdline = \"{}\"", "x".repeat(600));
        assert!(matches!(
            BuildParams::from_toml_str(&text),
            Err(BootImgError::Config(_))
        ));
    }
}
