//! Main entry point for the bootimgtool CLI

use bootimgtool::cli::{Args, run_cli};
use bootimgtool::logger;
use clap::Parser;
use colored::Colorize;

fn main() {
    let args = Args::parse();

    if let Err(e) = logger::init(logger::level_for(args.verbose, args.quiet)) {
        eprintln!("failed to install logger: {}", e);
    }

    if let Err(e) = run_cli(args) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
