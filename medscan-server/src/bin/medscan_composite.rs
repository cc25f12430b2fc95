//! medscan-composite - reference annotation compositor
//!
//! `medscan-composite <source> <mask> <destination>`
//!
//! Resamples the mask to the source's resolution, outlines the marked region
//! in red and writes the result to `destination` (format from extension).
//!
//! Exit codes: 0 success, 1 unreadable input or unwritable output, 2 usage.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "medscan-composite")]
#[command(about = "Outline an annotation mask on a scan image")]
#[command(version)]
struct Args {
    /// Source scan image
    source: PathBuf,

    /// Mask image (any resolution)
    mask: PathBuf,

    /// Output image path
    destination: PathBuf,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(2),
            };
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("medscan-composite: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    use anyhow::Context;

    let source = image::open(&args.source)
        .with_context(|| format!("cannot read source {}", args.source.display()))?;
    let mask = image::open(&args.mask)
        .with_context(|| format!("cannot read mask {}", args.mask.display()))?;

    let output = medscan_common::composite::composite(&source, &mask);

    if let Some(parent) = args.destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }

    output
        .save(&args.destination)
        .with_context(|| format!("cannot write {}", args.destination.display()))?;

    Ok(())
}
