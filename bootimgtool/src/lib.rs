//! # bootimgtool
//!
//! Read, disassemble and rebuild Android-style boot images (header
//! versions 0 through 2).
//!
//! A boot image is one page of header followed by page-aligned segments:
//! kernel, ramdisk, an optional second-stage loader, an optional recovery
//! dtbo and an optional device tree blob. Disassembling an image writes
//! every segment to its own file together with a `recipe.cfg` that holds
//! the remaining header parameters, so the image can be rebuilt later.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bootimgtool::{Disassembler, ImageAssembler};
//!
//! let dump = Disassembler::new("out").disassemble_file("boot.img")?;
//! let mut params = dump.recipe.to_params()?;
//! params.keep_id = true;
//!
//! let written = ImageAssembler::new("out").assemble(&params, "rebuilt")?;
//! assert_eq!(written.extension().unwrap(), "img");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod assemble;
pub mod bounded;
pub mod cli;
pub mod disassemble;
pub mod error;
pub mod header;
pub mod layout;
pub mod logger;
pub mod params;
pub mod recipe;
pub mod segment;

pub use assemble::{AssembledImage, ImageAssembler, compute_identity, image_output_path};
pub use bounded::{BoundedBytes, Cmdline, ExtraCmdline, ProductName};
pub use disassemble::{Disassembler, Disassembly};
pub use error::{BootImgError, Result};
pub use header::{BootImageHeader, HeaderVersion, OsVersion, PatchLevel};
pub use layout::{Layout, Placement, pages_for};
pub use params::BuildParams;
pub use recipe::{Recipe, Record, Tag, Value};
pub use segment::{Segment, SegmentKind};

/// Current version of the bootimgtool implementation
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic string at offset 0 of every boot image
pub const BOOT_MAGIC: &[u8; BOOT_MAGIC_SIZE] = b"ANDROID!";

pub const BOOT_MAGIC_SIZE: usize = 8;
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;

/// Number of 32-bit words in the identity field
pub const BOOT_ID_WORDS: usize = 8;

/// Longest segment filename accepted in a recipe
pub const MAX_FILENAME_LEN: usize = 255;
