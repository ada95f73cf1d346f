//! Command line interface for bootimgtool

use crate::header::{OsVersion, PatchLevel, encode_os_version};
use crate::recipe::{RECIPE_FILE_NAME, Recipe};
use crate::{
    BootImageHeader, BuildParams, Cmdline, Disassembler, ExtraCmdline, ImageAssembler,
    ProductName, VERSION,
};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Command line arguments for bootimgtool
#[derive(Parser, Debug)]
#[command(name = "bootimgtool")]
#[command(version = VERSION)]
#[command(about = "Inspect, disassemble and rebuild Android boot images", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - only output errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the header of a boot image
    Info(InfoArgs),
    /// Extract the segments of a boot image and write a recipe
    Disassemble(DisassembleArgs),
    /// Build a boot image from a recipe, a TOML file or flags
    Create(CreateArgs),
}

#[derive(ClapArgs, Debug)]
pub struct InfoArgs {
    /// Image file to examine
    pub image_file: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct DisassembleArgs {
    /// Image file to disassemble
    pub image_file: PathBuf,

    /// Directory for the extracted files and recipe
    #[arg(short = 'd', long, default_value = ".")]
    pub output_dir: PathBuf,
}

/// Arguments for creating an image
#[derive(ClapArgs, Debug, Default)]
pub struct CreateArgs {
    /// Output image file (`.img` is appended when missing)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Keep the identity from the recipe instead of recomputing it
    #[arg(short, long)]
    pub keep_id: bool,

    /// Recipe file (defaults to ./recipe.cfg when present)
    #[arg(long, conflicts_with = "config")]
    pub recipe: Option<PathBuf>,

    /// TOML parameter file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Kernel file
    #[arg(long)]
    pub kernel: Option<PathBuf>,

    /// Ramdisk file
    #[arg(long)]
    pub ramdisk: Option<PathBuf>,

    /// Second stage bootloader file
    #[arg(long)]
    pub second: Option<PathBuf>,

    /// Recovery dtbo file (header version 1+)
    #[arg(long)]
    pub recovery_dtbo: Option<PathBuf>,

    /// Device tree blob file (header version 2)
    #[arg(long)]
    pub dtb: Option<PathBuf>,

    /// Kernel load address (hexadecimal)
    #[arg(long, value_parser = parse_hex_u32)]
    pub kernel_addr: Option<u32>,

    /// Ramdisk load address (hexadecimal)
    #[arg(long, value_parser = parse_hex_u32)]
    pub ramdisk_addr: Option<u32>,

    /// Second stage load address (hexadecimal)
    #[arg(long, value_parser = parse_hex_u32)]
    pub second_addr: Option<u32>,

    /// Kernel tags address (hexadecimal)
    #[arg(long, value_parser = parse_hex_u32)]
    pub tags_addr: Option<u32>,

    /// Device tree load address (hexadecimal)
    #[arg(long, value_parser = parse_hex_u64)]
    pub dtb_addr: Option<u64>,

    /// Recovery dtbo offset
    #[arg(long, value_parser = parse_hex_u64)]
    pub recovery_dtbo_offset: Option<u64>,

    /// Page size in bytes
    #[arg(long, value_parser = parse_hex_u32)]
    pub page_size: Option<u32>,

    /// Header version (0, 1 or 2)
    #[arg(long)]
    pub header_version: Option<u32>,

    /// OS version, e.g. 11.0.0
    #[arg(long)]
    pub os_version: Option<OsVersion>,

    /// OS security patch level, e.g. 2024-05
    #[arg(long)]
    pub os_patch_level: Option<PatchLevel>,

    /// Product name
    #[arg(long)]
    pub name: Option<String>,

    /// Kernel command line
    #[arg(long)]
    pub cmdline: Option<String>,

    /// Extra kernel command line
    #[arg(long)]
    pub extra_cmdline: Option<String>,
}

/// Parse hexadecimal string to u32
fn parse_hex_u32(s: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    }
}

/// Parse hexadecimal string to u64
fn parse_hex_u64(s: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
}

/// Main CLI handler
pub fn run_cli(args: Args) -> Result<()> {
    let quiet = args.quiet;
    match args.command {
        Commands::Info(info_args) => handle_info(info_args),
        Commands::Disassemble(disassemble_args) => handle_disassemble(disassemble_args, quiet),
        Commands::Create(create_args) => handle_create(create_args, quiet),
    }
}

fn handle_info(args: InfoArgs) -> Result<()> {
    log::debug!("reading image: {}", args.image_file.display());
    let image = std::fs::read(&args.image_file)
        .with_context(|| format!("failed to read {}", args.image_file.display()))?;
    let header = BootImageHeader::from_bytes(&image)
        .with_context(|| format!("{} is not a valid boot image", args.image_file.display()))?;

    println!("{}", header.summary());
    Ok(())
}

fn handle_disassemble(args: DisassembleArgs, quiet: bool) -> Result<()> {
    let dump = Disassembler::new(&args.output_dir)
        .disassemble_file(&args.image_file)
        .with_context(|| format!("failed to disassemble {}", args.image_file.display()))?;

    if !quiet {
        println!(
            "{} {} (header v{})",
            "Disassembled".green().bold(),
            args.image_file.display(),
            dump.header.header_version
        );
        for (kind, path) in &dump.files {
            println!("  {:<14} {}", kind.to_string(), path.display());
        }
        println!("  {:<14} {}", "recipe", dump.recipe_path.display());
    }
    Ok(())
}

fn handle_create(args: CreateArgs, quiet: bool) -> Result<()> {
    let (mut params, base_dir) = load_params(&args)?;
    apply_overrides(&mut params, &args)?;

    let written = ImageAssembler::new(&base_dir)
        .assemble(&params, &args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    if !quiet {
        let size = std::fs::metadata(&written)
            .with_context(|| format!("failed to stat {}", written.display()))?
            .len();
        println!(
            "{} {} ({} bytes)",
            "Image created successfully:".green().bold(),
            written.display(),
            size
        );
    }
    Ok(())
}

/// Directory segment names in a recipe or config are relative to
fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Starting parameters and their base directory: `--config`, then
/// `--recipe` or a `recipe.cfg` in the working directory, then defaults
fn load_params(args: &CreateArgs) -> Result<(BuildParams, PathBuf)> {
    if let Some(config) = &args.config {
        log::debug!("loading parameters from {}", config.display());
        let params = BuildParams::from_toml_file(config)
            .with_context(|| format!("failed to load config {}", config.display()))?;
        return Ok((params, base_dir_of(config)));
    }

    let recipe = match &args.recipe {
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(RECIPE_FILE_NAME)).filter(|path| path.exists()),
    };

    match recipe {
        Some(path) => {
            log::debug!("loading recipe from {}", path.display());
            let params = Recipe::load(&path)
                .and_then(|recipe| recipe.to_params())
                .with_context(|| format!("failed to load recipe {}", path.display()))?;
            Ok((params, base_dir_of(&path)))
        }
        None => {
            log::debug!("no recipe or config given, using defaults");
            Ok((BuildParams::default(), PathBuf::from(".")))
        }
    }
}

/// Segment paths given on the command line are relative to the working
/// directory, not to the recipe
fn cli_path(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}

fn apply_overrides(params: &mut BuildParams, args: &CreateArgs) -> Result<()> {
    for (slot, path) in [
        (&mut params.kernel, &args.kernel),
        (&mut params.ramdisk, &args.ramdisk),
        (&mut params.second, &args.second),
        (&mut params.recovery_dtbo, &args.recovery_dtbo),
        (&mut params.dtb, &args.dtb),
    ] {
        if let Some(path) = path {
            *slot = Some(cli_path(path)?);
        }
    }

    if let Some(v) = args.kernel_addr {
        params.kernel_addr = v;
    }
    if let Some(v) = args.ramdisk_addr {
        params.ramdisk_addr = v;
    }
    if let Some(v) = args.second_addr {
        params.second_addr = v;
    }
    if let Some(v) = args.tags_addr {
        params.tags_addr = v;
    }
    if let Some(v) = args.dtb_addr {
        params.dtb_addr = v;
    }
    if let Some(v) = args.recovery_dtbo_offset {
        params.recovery_dtbo_offset = v;
    }
    if let Some(v) = args.page_size {
        params.page_size = v;
    }
    if let Some(v) = args.header_version {
        params.header_version = v;
    }

    if args.os_version.is_some() || args.os_patch_level.is_some() {
        let version = args
            .os_version
            .unwrap_or_else(|| OsVersion::decode(params.os_version));
        let patch = args
            .os_patch_level
            .unwrap_or_else(|| PatchLevel::decode(params.os_version));
        params.os_version = encode_os_version(version, patch);
    }

    if let Some(name) = &args.name {
        params.name = ProductName::new("name", name.as_str())?;
    }
    if let Some(cmdline) = &args.cmdline {
        params.cmdline = Cmdline::new("cmdline", cmdline.as_str())?;
    }
    if let Some(extra) = &args.extra_cmdline {
        params.extra_cmdline = ExtraCmdline::new("extra cmdline", extra.as_str())?;
    }

    if args.keep_id {
        params.keep_id = true;
    }
    Ok(())
}
