//! Page-aligned placement of segments behind the header
//!
//! The header takes the first page. Each present segment follows in
//! [`SegmentKind::ORDER`], starting on a page boundary and spanning
//! `pages_for(size)` pages. Absent or empty segments take no space at
//! all, so later segments move up.

use crate::error::{BootImgError, Result};
use crate::header::BootImageHeader;
use crate::segment::SegmentKind;

/// Alignment applied to the ramdisk content before page alignment
pub const RAMDISK_ALIGNMENT: usize = 4;

/// Number of pages needed to hold `size` bytes
pub fn pages_for(size: u32, page_size: u32) -> Result<u32> {
    if page_size == 0 {
        return Err(BootImgError::zero_page_size());
    }
    Ok(size.div_ceil(page_size))
}

/// Zero bytes needed after `size` bytes to reach the next page boundary
pub fn page_padding(size: u64, page_size: u32) -> Result<u64> {
    if page_size == 0 {
        return Err(BootImgError::zero_page_size());
    }
    let page_size = page_size as u64;
    Ok((page_size - size % page_size) % page_size)
}

/// Zero-fill `data` up to a multiple of `alignment`.
///
/// Returns the number of bytes appended.
pub fn pad_to_alignment(data: &mut Vec<u8>, alignment: usize) -> usize {
    let aligned = data.len().next_multiple_of(alignment);
    let added = aligned - data.len();
    data.resize(aligned, 0);
    added
}

/// Where one segment lives inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub kind: SegmentKind,
    /// Byte offset from the start of the image
    pub offset: u64,
    /// Payload size in bytes
    pub size: u32,
    /// Pages reserved for the payload and its padding
    pub pages: u32,
}

impl Placement {
    /// End of the payload (exclusive)
    pub fn data_end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// Placement of every present segment for one page size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    page_size: u32,
    placements: Vec<Placement>,
}

impl Layout {
    /// Plan offsets for the given segments.
    ///
    /// Segments are placed in [`SegmentKind::ORDER`] regardless of the
    /// input order, and zero-size entries are dropped.
    pub fn plan<I>(page_size: u32, segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = (SegmentKind, u32)>,
    {
        if page_size == 0 {
            return Err(BootImgError::zero_page_size());
        }

        let mut present: Vec<(SegmentKind, u32)> = segments
            .into_iter()
            .filter(|&(_, size)| size > 0)
            .collect();
        present.sort_by_key(|&(kind, _)| kind);

        let mut offset = page_size as u64;
        let mut placements = Vec::with_capacity(present.len());
        for (kind, size) in present {
            let pages = pages_for(size, page_size)?;
            placements.push(Placement {
                kind,
                offset,
                size,
                pages,
            });
            log::debug!("{kind} at offset {offset:#x}, {size} bytes in {pages} pages");
            offset += pages as u64 * page_size as u64;
        }

        Ok(Self {
            page_size,
            placements,
        })
    }

    /// Plan the layout described by a decoded header
    pub fn for_header(header: &BootImageHeader) -> Result<Self> {
        let mut segments = vec![
            (SegmentKind::Kernel, header.kernel_size),
            (SegmentKind::Ramdisk, header.ramdisk_size),
            (SegmentKind::Second, header.second_size),
        ];
        if header.header_version.has_recovery_dtbo() {
            segments.push((SegmentKind::RecoveryDtbo, header.recovery_dtbo_size));
        }
        if header.header_version.has_dtb() {
            segments.push((SegmentKind::Dtb, header.dtb_size));
        }
        Self::plan(header.page_size, segments)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn get(&self, kind: SegmentKind) -> Option<&Placement> {
        self.placements.iter().find(|p| p.kind == kind)
    }

    /// Total image size: header page plus every segment's pages
    pub fn total_size(&self) -> u64 {
        let pages: u64 = self.placements.iter().map(|p| p.pages as u64).sum();
        (1 + pages) * self.page_size as u64
    }
}
