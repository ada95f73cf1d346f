//! Split a boot image into segment files plus a recipe

use crate::error::{BootImgError, Result};
use crate::header::BootImageHeader;
use crate::layout::Layout;
use crate::recipe::{RECIPE_FILE_NAME, Recipe, Record, Tag, Value};
use crate::segment::{Segment, SegmentKind};
use std::path::{Path, PathBuf};

/// Result of disassembling one image
#[derive(Debug, Clone)]
pub struct Disassembly {
    pub header: BootImageHeader,
    pub recipe: Recipe,
    /// Extracted segment files, in image order
    pub files: Vec<(SegmentKind, PathBuf)>,
    /// Location of the written recipe
    pub recipe_path: PathBuf,
}

impl Disassembly {
    pub fn file(&self, kind: SegmentKind) -> Option<&Path> {
        self.files
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, path)| path.as_path())
    }
}

/// Slice every present segment out of `image`.
///
/// The header must already have been decoded from the same bytes.
pub fn extract_segments(image: &[u8], header: &BootImageHeader) -> Result<Vec<Segment>> {
    header.validate()?;
    let layout = Layout::for_header(header)?;

    layout
        .placements()
        .iter()
        .map(|placement| {
            let out_of_bounds = || BootImgError::SegmentOutOfBounds {
                kind: placement.kind,
                offset: placement.offset,
                size: placement.size,
                len: image.len(),
            };
            let start = usize::try_from(placement.offset).map_err(|_| out_of_bounds())?;
            let end = usize::try_from(placement.data_end()).map_err(|_| out_of_bounds())?;
            let data = image.get(start..end).ok_or_else(out_of_bounds)?;

            let segment = Segment::new(placement.kind, data.to_vec());
            Ok(match load_addr(header, placement.kind) {
                Some(addr) => segment.with_load_addr(addr),
                None => segment,
            })
        })
        .collect()
}

fn load_addr(header: &BootImageHeader, kind: SegmentKind) -> Option<u64> {
    match kind {
        SegmentKind::Kernel => Some(header.kernel_addr as u64),
        SegmentKind::Ramdisk => Some(header.ramdisk_addr as u64),
        SegmentKind::Second => Some(header.second_addr as u64),
        SegmentKind::RecoveryDtbo => None,
        SegmentKind::Dtb => Some(header.dtb_addr),
    }
}

/// Build the recipe describing `header`, naming each segment by `names`
pub fn recipe_for(header: &BootImageHeader, names: &[(SegmentKind, String)]) -> Result<Recipe> {
    let name_of = |kind: SegmentKind| {
        names
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
    };

    let mut recipe = Recipe::new();
    recipe.push(Record::u32(Tag::KernelAddr, header.kernel_addr)?);
    recipe.push(Record::u32(Tag::PageSize, header.page_size)?);
    recipe.push(Record::u32(Tag::HeaderVersion, header.header_version.as_u32())?);
    recipe.push(Record::u32(Tag::TagsAddr, header.tags_addr)?);
    recipe.push(Record::bytes(
        Tag::KernelName,
        name_of(SegmentKind::Kernel).unwrap_or_default(),
    )?);
    recipe.push(Record::u32(Tag::RamdiskAddr, header.ramdisk_addr)?);
    recipe.push(Record::bytes(
        Tag::RamdiskName,
        name_of(SegmentKind::Ramdisk).unwrap_or_default(),
    )?);
    if let Some(name) = name_of(SegmentKind::Second) {
        recipe.push(Record::bytes(Tag::SecondName, name)?);
    }
    recipe.push(Record::u32(Tag::SecondAddr, header.second_addr)?);
    recipe.push(Record::u32(Tag::OsVersion, header.os_version)?);
    recipe.push(Record::bytes(Tag::Cmdline, header.cmdline.as_bytes())?);
    recipe.push(Record::bytes(Tag::ProductName, header.name.as_bytes())?);
    recipe.push(Record::new(Tag::Id, Value::Id(header.id))?);
    recipe.push(Record::bytes(
        Tag::ExtraCmdline,
        header.extra_cmdline.as_bytes(),
    )?);

    if header.header_version.has_recovery_dtbo() {
        recipe.push(Record::u64(
            Tag::RecoveryDtboOffset,
            header.recovery_dtbo_offset,
        )?);
        if let Some(name) = name_of(SegmentKind::RecoveryDtbo) {
            recipe.push(Record::bytes(Tag::RecoveryDtboName, name)?);
        }
    }

    if header.header_version.has_dtb() {
        recipe.push(Record::u64(Tag::DtbAddr, header.dtb_addr)?);
        if let Some(name) = name_of(SegmentKind::Dtb) {
            recipe.push(Record::bytes(Tag::DtbName, name)?);
        }
    }

    Ok(recipe)
}

/// Writes segments and `recipe.cfg` into one directory
#[derive(Debug, Clone)]
pub struct Disassembler {
    output_dir: PathBuf,
}

impl Disassembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Read `path` and disassemble it
    pub fn disassemble_file(&self, path: impl AsRef<Path>) -> Result<Disassembly> {
        let path = path.as_ref();
        let image = std::fs::read(path).map_err(|e| BootImgError::file_io(path, e))?;
        log::debug!("read {} bytes from {}", image.len(), path.display());
        self.disassemble(&image)
    }

    /// Disassemble an in-memory image.
    ///
    /// Files already present in the output directory are overwritten.
    /// Files written before a failure are left in place.
    pub fn disassemble(&self, image: &[u8]) -> Result<Disassembly> {
        let header = BootImageHeader::from_bytes(image)?;
        log::debug!("header version {}", header.header_version);

        let mut segments = extract_segments(image, &header)?;
        // kernel and ramdisk always get a file so the recipe can name them
        for kind in SegmentKind::ORDER.into_iter().filter(|kind| kind.is_required()) {
            if !segments.iter().any(|segment| segment.kind == kind) {
                segments.push(Segment::new(kind, Vec::new()));
            }
        }
        segments.sort_by_key(|segment| segment.kind);

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| BootImgError::file_io(&self.output_dir, e))?;

        let mut names = Vec::with_capacity(segments.len());
        let mut files = Vec::with_capacity(segments.len());
        for segment in &segments {
            let name = segment.kind.output_file_name(&segment.data);
            let path = self.output_dir.join(&name);
            std::fs::write(&path, &segment.data).map_err(|e| BootImgError::file_io(&path, e))?;
            log::info!(
                "wrote {} ({} bytes) to {}",
                segment.kind,
                segment.size(),
                path.display()
            );
            names.push((segment.kind, name));
            files.push((segment.kind, path));
        }

        let recipe = recipe_for(&header, &names)?;
        let recipe_path = self.output_dir.join(RECIPE_FILE_NAME);
        recipe.save(&recipe_path)?;
        log::info!(
            "wrote recipe ({} records) to {}",
            recipe.records().len(),
            recipe_path.display()
        );

        Ok(Disassembly {
            header,
            recipe,
            files,
            recipe_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderVersion;
    use crate::{BOOT_MAGIC, Cmdline, ProductName};

    fn image_with(version: HeaderVersion, kernel: &[u8], ramdisk: &[u8], dtb: &[u8]) -> Vec<u8> {
        let page = 2048usize;
        let mut header = BootImageHeader::new(version);
        header.page_size = page as u32;
        header.kernel_size = kernel.len() as u32;
        header.kernel_addr = 0x1000_8000;
        header.ramdisk_size = ramdisk.len() as u32;
        header.ramdisk_addr = 0x1100_0000;
        header.second_addr = 0x10f0_0000;
        header.tags_addr = 0x1000_0100;
        header.name = ProductName::new("name", "board").unwrap();
        header.cmdline = Cmdline::new("cmdline", "console=ttyS0").unwrap();
        header.id = [7; 8];
        if version.has_recovery_dtbo() {
            header.header_size = version.header_size() as u32;
        }
        if version.has_dtb() {
            header.dtb_size = dtb.len() as u32;
            header.dtb_addr = 0x11f0_0000;
        }

        let mut image = header.to_bytes().unwrap();
        image.resize(page, 0);
        for data in [kernel, ramdisk, dtb] {
            if data.is_empty() {
                continue;
            }
            image.extend_from_slice(data);
            image.resize(image.len().next_multiple_of(page), 0);
        }
        image
    }

    #[test]
    fn test_extract_segments() {
        let image = image_with(HeaderVersion::V2, &[1; 3000], &[2; 8], &[3; 16]);
        let header = BootImageHeader::from_bytes(&image).unwrap();
        let segments = extract_segments(&image, &header).unwrap();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].kind, SegmentKind::Kernel);
        assert_eq!(segments[0].data, vec![1; 3000]);
        assert_eq!(segments[0].load_addr, Some(0x1000_8000));
        assert_eq!(segments[1].data, vec![2; 8]);
        assert_eq!(segments[2].kind, SegmentKind::Dtb);
        assert_eq!(segments[2].data, vec![3; 16]);
    }

    #[test]
    fn test_truncated_image_is_out_of_bounds() {
        let mut image = image_with(HeaderVersion::V0, &[1; 3000], &[2; 8], &[]);
        image.truncate(2048 + 100);
        let header = BootImageHeader::from_bytes(&image).unwrap();

        assert!(matches!(
            extract_segments(&image, &header),
            Err(BootImgError::SegmentOutOfBounds {
                kind: SegmentKind::Kernel,
                offset: 2048,
                size: 3000,
                ..
            })
        ));
    }

    #[test]
    fn test_recipe_record_order() {
        let image = image_with(HeaderVersion::V2, &[1; 10], &[2; 8], &[3; 4]);
        let header = BootImageHeader::from_bytes(&image).unwrap();
        let names = vec![
            (SegmentKind::Kernel, "kernel".to_string()),
            (SegmentKind::Ramdisk, "ramdisk".to_string()),
            (SegmentKind::Dtb, "dtb".to_string()),
        ];
        let recipe = recipe_for(&header, &names).unwrap();

        let codes: Vec<&str> = recipe.records().iter().map(|r| r.tag.name()).collect();
        assert_eq!(
            codes,
            vec![
                "kna", "pas", "hev", "taa", "knn", "rda", "rdn", "sea", "osv", "cmd", "pna",
                "idv", "ecm", "reo", "dta", "dtn"
            ]
        );
    }

    #[test]
    fn test_v0_recipe_has_no_version_records() {
        let image = image_with(HeaderVersion::V0, &[1; 10], &[2; 8], &[]);
        let header = BootImageHeader::from_bytes(&image).unwrap();
        let recipe = recipe_for(&header, &[]).unwrap();

        assert!(recipe.get(Tag::RecoveryDtboOffset).is_none());
        assert!(recipe.get(Tag::DtbAddr).is_none());
        assert!(recipe.get(Tag::SecondName).is_none());
        assert_eq!(recipe.get(Tag::KernelName), Some(&Value::Bytes(Vec::new())));
    }

    #[test]
    fn test_disassemble_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut kernel = vec![0x1f, 0x8b];
        kernel.extend_from_slice(&[0; 100]);
        let image = image_with(HeaderVersion::V0, &kernel, b"cpio", &[]);

        let dump = Disassembler::new(dir.path()).disassemble(&image).unwrap();

        let kernel_path = dir.path().join("kernel.gz");
        let ramdisk_path = dir.path().join("ramdisk");
        assert_eq!(std::fs::read(&kernel_path).unwrap(), kernel);
        assert_eq!(std::fs::read(&ramdisk_path).unwrap(), b"cpio");
        assert_eq!(dump.file(SegmentKind::Kernel), Some(kernel_path.as_path()));
        assert!(dump.recipe_path.exists());

        let params = Recipe::load(&dump.recipe_path).unwrap().to_params().unwrap();
        assert_eq!(params.kernel.as_deref(), Some("kernel.gz"));
        assert_eq!(params.ramdisk.as_deref(), Some("ramdisk"));
        assert_eq!(params.page_size, 2048);
        assert_eq!(params.id, [7; 8]);
        assert_eq!(params.cmdline.to_string(), "console=ttyS0");
    }

    #[test]
    fn test_empty_ramdisk_still_gets_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = image_with(HeaderVersion::V0, &[1; 10], &[], &[]);

        let dump = Disassembler::new(dir.path()).disassemble(&image).unwrap();

        let ramdisk_path = dir.path().join("ramdisk");
        assert_eq!(std::fs::read(&ramdisk_path).unwrap(), b"");
        assert_eq!(dump.file(SegmentKind::Ramdisk), Some(ramdisk_path.as_path()));
        assert_eq!(
            dump.recipe.get(Tag::RamdiskName),
            Some(&Value::Bytes(b"ramdisk".to_vec()))
        );
    }

    #[test]
    fn test_disassemble_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = image_with(HeaderVersion::V0, &[1; 10], &[2; 8], &[]);
        image[..8].copy_from_slice(b"NOTANIMG");
        assert_ne!(&image[..8], BOOT_MAGIC);

        let err = Disassembler::new(dir.path()).disassemble(&image).unwrap_err();
        assert!(matches!(err, BootImgError::InvalidMagic { .. }));
        // nothing written
        assert!(!dir.path().join(RECIPE_FILE_NAME).exists());
    }
}
