//! Image assembler: build a boot image from parameters and segment files

use crate::error::{BootImgError, Result};
use crate::header::{BootImageHeader, HeaderVersion, header_size_for};
use crate::layout::{Layout, RAMDISK_ALIGNMENT, pad_to_alignment, page_padding};
use crate::params::BuildParams;
use crate::segment::{Segment, SegmentKind};
use crate::BOOT_ID_WORDS;
use sha1::{Digest, Sha1};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Extension given to every assembled image
pub const IMAGE_EXTENSION: &str = "img";

/// Digest bytes kept in the identity field
pub const IDENTITY_DIGEST_LEN: usize = 20;

/// Output path for an image: `output` with `.img` appended unless it
/// already ends in `.img`
pub fn image_output_path(output: impl AsRef<Path>) -> PathBuf {
    let output = output.as_ref();
    if output.extension().is_some_and(|ext| ext == IMAGE_EXTENSION) {
        return output.to_path_buf();
    }
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(IMAGE_EXTENSION);
    PathBuf::from(name)
}

/// Identity words for an image.
///
/// The digest covers the kernel, ramdisk and (when present) second stage
/// payloads each followed by their size, then the tags address, page
/// size, header version, os version, the padded name and the padded
/// command line. Scalars are fed as 4-byte little-endian values. At most
/// the first [`IDENTITY_DIGEST_LEN`] bytes of the digest are kept; the
/// remaining words are zero.
pub fn compute_identity<D: Digest>(
    header: &BootImageHeader,
    kernel: &[u8],
    ramdisk: &[u8],
    second: Option<&[u8]>,
) -> [u32; BOOT_ID_WORDS] {
    let mut hasher = D::new();
    let scalar = |hasher: &mut D, value: u32| hasher.update(value.to_le_bytes());

    hasher.update(kernel);
    scalar(&mut hasher, header.kernel_size);
    hasher.update(ramdisk);
    scalar(&mut hasher, header.ramdisk_size);
    if let Some(second) = second.filter(|data| !data.is_empty()) {
        hasher.update(second);
        scalar(&mut hasher, header.second_size);
    }
    scalar(&mut hasher, header.tags_addr);
    scalar(&mut hasher, header.page_size);
    scalar(&mut hasher, header.header_version.as_u32());
    scalar(&mut hasher, header.os_version);
    hasher.update(header.name.to_padded());
    hasher.update(header.cmdline.to_padded());

    let digest = hasher.finalize();
    let mut raw = [0u8; BOOT_ID_WORDS * 4];
    let len = digest.len().min(IDENTITY_DIGEST_LEN);
    raw[..len].copy_from_slice(&digest[..len]);

    let mut id = [0u32; BOOT_ID_WORDS];
    for (word, chunk) in id.iter_mut().zip(raw.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    id
}

/// A fully assembled image held in memory
#[derive(Debug, Clone)]
pub struct AssembledImage {
    pub header: BootImageHeader,
    /// Present segments in image order
    pub segments: Vec<Segment>,
    pub layout: Layout,
}

impl AssembledImage {
    pub fn segment(&self, kind: SegmentKind) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.kind == kind)
    }

    /// Size of the image in bytes
    pub fn len(&self) -> u64 {
        self.layout.total_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the header page followed by every segment, each padded to
    /// its page span
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let page_size = self.layout.page_size();

        self.header.write_to(writer)?;
        let header_len = self.header.encoded_size() as u64;
        write_zeros(writer, page_padding(header_len, page_size)?)?;

        for placement in self.layout.placements() {
            let Some(segment) = self.segment(placement.kind) else {
                continue;
            };
            writer.write_all(&segment.data)?;
            write_zeros(writer, page_padding(segment.data.len() as u64, page_size)?)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut image = Vec::with_capacity(self.len() as usize);
        self.write_to(&mut image)?;
        Ok(image)
    }
}

fn write_zeros<W: Write>(writer: &mut W, count: u64) -> Result<()> {
    std::io::copy(&mut std::io::repeat(0).take(count), writer)?;
    Ok(())
}

/// Builds images from [`BuildParams`], resolving segment files against a
/// base directory
#[derive(Debug, Clone)]
pub struct ImageAssembler {
    base_dir: PathBuf,
}

impl ImageAssembler {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn load_required(&self, kind: SegmentKind, name: Option<&str>) -> Result<Segment> {
        match name.filter(|name| !name.is_empty()) {
            Some(name) => Segment::load(kind, &self.resolve(name)),
            None => Err(BootImgError::invalid_argument(format!(
                "no {kind} filename given"
            ))),
        }
    }

    /// Load an optional segment; a missing file is skipped with a warning
    fn load_optional(&self, kind: SegmentKind, name: Option<&str>) -> Result<Option<Segment>> {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            return Ok(None);
        };
        match Segment::load(kind, &self.resolve(name)) {
            Ok(segment) => Ok(Some(segment).filter(Segment::is_present)),
            Err(BootImgError::MissingSegmentFile { path, .. }) => {
                log::warn!("{} file {} not found, skipping", kind, path.display());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load an optional segment only supported by newer header versions
    fn load_versioned(
        &self,
        kind: SegmentKind,
        name: Option<&str>,
        supported: bool,
        version: HeaderVersion,
    ) -> Result<Option<Segment>> {
        if supported {
            return self.load_optional(kind, name);
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            log::warn!("header version {version} has no {kind} field, ignoring {name}");
        }
        Ok(None)
    }

    /// Assemble an image in memory
    pub fn build(&self, params: &BuildParams) -> Result<AssembledImage> {
        let version = params.version()?;

        let mut header = BootImageHeader::new(version);
        header.page_size = params.page_size;
        header.validate()?;

        let kernel = self.load_required(SegmentKind::Kernel, params.kernel.as_deref())?;
        let mut ramdisk = self.load_required(SegmentKind::Ramdisk, params.ramdisk.as_deref())?;
        let padded = pad_to_alignment(&mut ramdisk.data, RAMDISK_ALIGNMENT);
        if padded > 0 {
            log::warn!("ramdisk padded with {padded} bytes to {RAMDISK_ALIGNMENT}-byte alignment");
        }
        if u32::try_from(ramdisk.data.len()).is_err() {
            return Err(BootImgError::SegmentTooLarge {
                kind: SegmentKind::Ramdisk,
                size: ramdisk.data.len() as u64,
            });
        }

        let second = self.load_optional(SegmentKind::Second, params.second.as_deref())?;
        let recovery_dtbo = self.load_versioned(
            SegmentKind::RecoveryDtbo,
            params.recovery_dtbo.as_deref(),
            version.has_recovery_dtbo(),
            version,
        )?;
        let dtb = self.load_versioned(
            SegmentKind::Dtb,
            params.dtb.as_deref(),
            version.has_dtb(),
            version,
        )?;

        header.kernel_size = kernel.size();
        header.kernel_addr = params.kernel_addr;
        header.ramdisk_size = ramdisk.size();
        header.ramdisk_addr = params.ramdisk_addr;
        header.second_size = second.as_ref().map_or(0, Segment::size);
        header.second_addr = params.second_addr;
        header.tags_addr = params.tags_addr;
        header.os_version = params.os_version;
        header.name = params.name.clone();
        header.cmdline = params.cmdline.clone();
        header.extra_cmdline = params.extra_cmdline.clone();

        if version.has_recovery_dtbo() {
            header.recovery_dtbo_size = recovery_dtbo.as_ref().map_or(0, Segment::size);
            header.recovery_dtbo_offset = params.recovery_dtbo_offset;
            header.header_size = header_size_for(version) as u32;
        }
        if version.has_dtb() {
            header.dtb_size = dtb.as_ref().map_or(0, Segment::size);
            header.dtb_addr = params.dtb_addr;
        }

        header.id = if params.keep_id {
            params.id
        } else {
            compute_identity::<Sha1>(
                &header,
                &kernel.data,
                &ramdisk.data,
                second.as_ref().map(|segment| segment.data.as_slice()),
            )
        };

        let layout = Layout::for_header(&header)?;

        let mut segments = vec![
            kernel.with_load_addr(params.kernel_addr as u64),
            ramdisk.with_load_addr(params.ramdisk_addr as u64),
        ];
        segments.extend(second.map(|s| s.with_load_addr(params.second_addr as u64)));
        segments.extend(recovery_dtbo);
        segments.extend(dtb.map(|s| s.with_load_addr(params.dtb_addr)));
        segments.retain(Segment::is_present);

        Ok(AssembledImage {
            header,
            segments,
            layout,
        })
    }

    /// Assemble an image and write it to `output` (with `.img` appended
    /// when missing). Returns the path written.
    pub fn assemble(&self, params: &BuildParams, output: impl AsRef<Path>) -> Result<PathBuf> {
        let image = self.build(params)?;
        let path = image_output_path(output);

        let file = std::fs::File::create(&path).map_err(|e| BootImgError::file_io(&path, e))?;
        let mut writer = BufWriter::new(file);
        image.write_to(&mut writer)?;
        writer.flush().map_err(|e| BootImgError::file_io(&path, e))?;

        log::info!(
            "wrote {} bytes (header v{}, {} segments) to {}",
            image.len(),
            image.header.header_version,
            image.segments.len(),
            path.display()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded::Cmdline;
    use sha2::Sha256;
    use tempfile::TempDir;

    fn workspace(files: &[(&str, &[u8])]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            std::fs::write(dir.path().join(name), data).unwrap();
        }
        dir
    }

    fn params(kernel: &str, ramdisk: &str) -> BuildParams {
        BuildParams {
            kernel: Some(kernel.to_string()),
            ramdisk: Some(ramdisk.to_string()),
            ..BuildParams::default()
        }
    }

    #[test]
    fn test_image_output_path() {
        assert_eq!(image_output_path("boot"), PathBuf::from("boot.img"));
        assert_eq!(image_output_path("boot.img"), PathBuf::from("boot.img"));
        assert_eq!(image_output_path("out/boot.v2"), PathBuf::from("out/boot.v2.img"));
    }

    #[test]
    fn test_build_layout_and_padding() {
        let dir = workspace(&[("kernel", &[0xaa; 5000]), ("ramdisk", &[0xbb; 6])]);
        let image = ImageAssembler::new(dir.path())
            .build(&params("kernel", "ramdisk"))
            .unwrap();

        assert_eq!(image.header.kernel_size, 5000);
        // ramdisk padded to 4 bytes
        assert_eq!(image.header.ramdisk_size, 8);
        assert_eq!(image.len(), 5 * 2048);

        let bytes = image.to_bytes().unwrap();
        assert_eq!(bytes.len(), 5 * 2048);
        assert_eq!(&bytes[..8], b"ANDROID!");
        assert!(bytes[1632..2048].iter().all(|&b| b == 0));
        assert_eq!(&bytes[2048..2048 + 5000], &[0xaa; 5000][..]);
        assert!(bytes[2048 + 5000..4 * 2048].iter().all(|&b| b == 0));
        assert_eq!(&bytes[4 * 2048..4 * 2048 + 6], &[0xbb; 6][..]);
        assert_eq!(&bytes[4 * 2048 + 6..4 * 2048 + 8], &[0, 0]);
    }

    #[test]
    fn test_exact_page_multiple_has_no_extra_page() {
        let dir = workspace(&[("kernel", &[1; 2048]), ("ramdisk", &[2; 4])]);
        let image = ImageAssembler::new(dir.path())
            .build(&params("kernel", "ramdisk"))
            .unwrap();
        assert_eq!(image.to_bytes().unwrap().len(), 3 * 2048);
    }

    #[test]
    fn test_missing_kernel() {
        let dir = workspace(&[("ramdisk", b"data")]);
        let err = ImageAssembler::new(dir.path())
            .build(&params("kernel", "ramdisk"))
            .unwrap_err();
        assert!(matches!(
            err,
            BootImgError::MissingSegmentFile {
                kind: SegmentKind::Kernel,
                ..
            }
        ));

        let err = ImageAssembler::new(dir.path())
            .build(&BuildParams::default())
            .unwrap_err();
        match err {
            BootImgError::InvalidArgument(msg) => assert!(msg.contains("kernel"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            ImageAssembler::new(dir.path()).build(&params("ramdisk", "")),
            Err(BootImgError::InvalidArgument(msg)) if msg.contains("ramdisk")
        ));
    }

    #[test]
    fn test_missing_optional_segments_are_skipped() {
        let dir = workspace(&[("kernel", b"kern"), ("ramdisk", b"rdsk")]);
        let mut p = params("kernel", "ramdisk");
        p.header_version = 2;
        p.second = Some("second".into());
        p.dtb = Some("dtb".into());

        let image = ImageAssembler::new(dir.path()).build(&p).unwrap();
        assert_eq!(image.header.second_size, 0);
        assert_eq!(image.header.dtb_size, 0);
        assert_eq!(image.header.second_addr, p.second_addr);
        assert_eq!(image.header.dtb_addr, p.dtb_addr);
        assert_eq!(image.segments.len(), 2);
    }

    #[test]
    fn test_dtb_ignored_below_v2() {
        let dir = workspace(&[("kernel", b"kern"), ("ramdisk", b"rdsk"), ("dtb", b"tree")]);
        let mut p = params("kernel", "ramdisk");
        p.header_version = 1;
        p.dtb = Some("dtb".into());

        let image = ImageAssembler::new(dir.path()).build(&p).unwrap();
        assert!(image.segment(SegmentKind::Dtb).is_none());
        assert_eq!(image.header.header_size, 1648);

        p.header_version = 2;
        let image = ImageAssembler::new(dir.path()).build(&p).unwrap();
        assert_eq!(image.header.dtb_size, 4);
        assert_eq!(image.layout.get(SegmentKind::Dtb).unwrap().offset, 3 * 2048);
    }

    #[test]
    fn test_invalid_version_and_page_size() {
        let dir = workspace(&[("kernel", b"kern"), ("ramdisk", b"rdsk")]);
        let assembler = ImageAssembler::new(dir.path());

        let mut p = params("kernel", "ramdisk");
        p.header_version = 3;
        assert!(matches!(
            assembler.build(&p),
            Err(BootImgError::UnsupportedVersion(3))
        ));

        let mut p = params("kernel", "ramdisk");
        p.page_size = 0;
        assert!(matches!(
            assembler.build(&p),
            Err(BootImgError::InvalidPageSize { page_size: 0, .. })
        ));
    }

    #[test]
    fn test_identity() {
        let dir = workspace(&[("kernel", b"kernel data"), ("ramdisk", b"rdsk")]);
        let assembler = ImageAssembler::new(dir.path());
        let mut p = params("kernel", "ramdisk");

        let first = assembler.build(&p).unwrap().header.id;
        let second = assembler.build(&p).unwrap().header.id;
        assert_eq!(first, second);
        // SHA-1 fills five words
        assert_ne!(&first[..5], &[0u32; 5]);
        assert_eq!(&first[5..], &[0u32; 3]);

        p.cmdline = Cmdline::new("cmdline", "quiet").unwrap();
        assert_ne!(assembler.build(&p).unwrap().header.id, first);

        p.keep_id = true;
        p.id = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(assembler.build(&p).unwrap().header.id, p.id);
    }

    #[test]
    fn test_identity_digest_input() {
        let mut header = BootImageHeader::new(HeaderVersion::V0);
        header.kernel_size = 2;
        header.ramdisk_size = 4;
        header.page_size = 2048;

        let mut expected = Sha1::new();
        expected.update(b"kk");
        expected.update(2u32.to_le_bytes());
        expected.update(b"rrrr");
        expected.update(4u32.to_le_bytes());
        expected.update(0u32.to_le_bytes());
        expected.update(2048u32.to_le_bytes());
        expected.update(0u32.to_le_bytes());
        expected.update(0u32.to_le_bytes());
        expected.update([0u8; 16]);
        expected.update([0u8; 512]);
        let digest = expected.finalize();

        let id = compute_identity::<Sha1>(&header, b"kk", b"rrrr", None);
        assert_eq!(id[0], u32::from_le_bytes(digest[..4].try_into().unwrap()));
        assert_eq!(id[4], u32::from_le_bytes(digest[16..20].try_into().unwrap()));

        // an empty second stage is not hashed
        assert_eq!(compute_identity::<Sha1>(&header, b"kk", b"rrrr", Some(&[][..])), id);
    }

    #[test]
    fn test_identity_wide_digest_keeps_twenty_bytes() {
        let mut header = BootImageHeader::new(HeaderVersion::V0);
        header.page_size = 2048;

        let id = compute_identity::<Sha256>(&header, b"kernel", b"ramdisk", None);
        let mut hasher = Sha256::new();
        hasher.update(b"kernel");
        hasher.update(0u32.to_le_bytes());
        hasher.update(b"ramdisk");
        hasher.update(0u32.to_le_bytes());
        hasher.update(0u32.to_le_bytes());
        hasher.update(2048u32.to_le_bytes());
        hasher.update(0u32.to_le_bytes());
        hasher.update(0u32.to_le_bytes());
        hasher.update([0u8; 16]);
        hasher.update([0u8; 512]);
        let digest = hasher.finalize();

        assert_eq!(id[0], u32::from_le_bytes(digest[..4].try_into().unwrap()));
        assert_eq!(id[4], u32::from_le_bytes(digest[16..20].try_into().unwrap()));
        assert_eq!(&id[5..], &[0u32; 3]);
    }

    #[test]
    fn test_assemble_writes_file() {
        let dir = workspace(&[("kernel", b"kern"), ("ramdisk", b"rdsk")]);
        let output = dir.path().join("boot");
        let written = ImageAssembler::new(dir.path())
            .assemble(&params("kernel", "ramdisk"), &output)
            .unwrap();

        assert_eq!(written, dir.path().join("boot.img"));
        let bytes = std::fs::read(&written).unwrap();
        assert_eq!(bytes.len(), 3 * 2048);
        let header = BootImageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.kernel_size, 4);
    }
}
