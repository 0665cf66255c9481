//! scedump - Reconstructs plaintext application bundles from console containers.
//!
//! Extract PKG system entries, PFS directory trees and SELF executables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use walkdir::WalkDir;

use scedump::elf::segment_type_name;
use scedump::pkg::{Resolution, SCE_SYS_DIR};
use scedump::util::MAX_CHUNK_SIZE;
use scedump::{
    convert_self, detect_format, extract_image_with_options, ExtractionOptions, Format, PfsContext,
    PkgContext, PlaintextSegmentReader, SelfContext,
};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

/// Reconstructs plaintext application bundles from PKG, PFS and SELF containers.
#[derive(Parser, Debug)]
#[command(name = "scedump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract the system entries of a PKG archive into <output>/sce_sys
    Pkg {
        /// Print the resolved entry names without writing anything
        #[arg(short, long)]
        list: bool,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Path to the PKG archive
        input: PathBuf,

        /// Output directory
        #[arg(default_value = ".")]
        output: PathBuf,
    },

    /// Extract the directory tree of a PFS image
    Pfs {
        /// Walk the image and print totals without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Copy buffer size in bytes (clamped to 64 KiB..=1 MiB)
        #[arg(long, default_value_t = MAX_CHUNK_SIZE)]
        chunk_size: usize,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Path to the PFS image
        input: PathBuf,

        /// Output directory
        #[arg(default_value = ".")]
        output: PathBuf,
    },

    /// Rebuild ELF files from SELF executables whose segments are stored in the clear
    #[command(name = "self")]
    SelfExec {
        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// A SELF file, or a directory to search for SELF files
        input: PathBuf,

        /// Output file (single input) or directory (directory input)
        output: PathBuf,
    },

    /// Show container information
    Info {
        /// Path to a PKG archive, PFS image or SELF executable
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pkg {
            input,
            output,
            list,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_pkg(&input, &output, list)
        }
        Commands::Pfs {
            input,
            output,
            dry_run,
            chunk_size,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_pfs(&input, &output, dry_run, chunk_size, verbosity)
        }
        Commands::SelfExec {
            input,
            output,
            jobs,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_self(&input, &output, jobs, verbosity)
        }
        Commands::Info { input } => {
            setup_logging(1);
            cmd_info(&input)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)?
            .progress_chars("#>-"),
    );
    Ok(progress)
}

// =============================================================================
// PKG
// =============================================================================

fn cmd_pkg(input: &Path, output: &Path, list: bool) -> Result<()> {
    let start = Instant::now();

    let pkg = PkgContext::open(input)
        .with_context(|| format!("Failed to open package: {}", input.display()))?;

    if list {
        for (entry, resolution) in pkg.resolve() {
            match resolution {
                Resolution::Named { name, source } => {
                    println!("{:#06x}  {:>10}  {} ({:?})", entry.entry_type, entry.size, name, source)
                }
                Resolution::Unnamed => println!("{:#06x}  {:>10}  <unnamed>", entry.entry_type, entry.size),
                Resolution::Skipped => {}
            }
        }
        return Ok(());
    }

    let report = pkg
        .extract(output)
        .with_context(|| format!("Failed to extract package: {}", input.display()))?;

    if !report.failed.is_empty() {
        warn!("{} entries failed to extract:", report.failed.len());
        for (index, err) in &report.failed {
            error!("  entry #{}: {}", index, err);
        }
    }

    info!(
        "Wrote {} files to {} in {:.2}s",
        report.written.len(),
        output.join(SCE_SYS_DIR).display(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

// =============================================================================
// PFS
// =============================================================================

fn cmd_pfs(input: &Path, output: &Path, dry_run: bool, chunk_size: usize, verbosity: u8) -> Result<()> {
    let start = Instant::now();

    let image = PfsContext::open(input)
        .with_context(|| format!("Failed to open image: {}", input.display()))?;

    let totals = image.dry_run();
    if dry_run {
        println!(
            "{} files, {} directories, {} bytes ({} skipped, {} failed)",
            totals.files, totals.directories, totals.bytes, totals.skipped, totals.failed
        );
        return Ok(());
    }
    drop(image);

    let progress = progress_bar(totals.bytes)?;
    let mut on_chunk = |n: u64| progress.inc(n);
    let options = ExtractionOptions {
        verbosity,
        chunk_size,
    };

    let stats = extract_image_with_options(input, output, &options, Some(&mut on_chunk))
        .with_context(|| format!("Failed to extract image: {}", input.display()))?;

    progress.finish_with_message("Done");

    if stats.failed > 0 {
        warn!("{} entries failed to extract", stats.failed);
    }

    info!(
        "Extracted {} files, {} directories ({} bytes) in {:.2}s",
        stats.files,
        stats.directories,
        stats.bytes,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

// =============================================================================
// SELF
// =============================================================================

/// Converts one container, using the stored segment contents as plaintext.
fn convert_one(input: &Path, output: &Path, options: &ExtractionOptions) -> Result<()> {
    let source = SelfContext::open(input)?;
    let mut reader = PlaintextSegmentReader::new(&source);
    let report = convert_self(&source, output, &mut reader, options)?;
    info!(
        "{} -> {} ({} segments, {:#x} bytes)",
        input.display(),
        output.display(),
        report.written.len(),
        report.output_size
    );
    Ok(())
}

/// Finds every SELF file below `dir`.
fn discover_selfs(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| SelfContext::probe(path))
        .collect()
}

fn cmd_self(input: &Path, output: &Path, jobs: Option<usize>, verbosity: u8) -> Result<()> {
    let start = Instant::now();

    if input.is_file() {
        let options = ExtractionOptions {
            verbosity,
            ..Default::default()
        };
        convert_one(input, output, &options)
            .with_context(|| format!("Failed to convert: {}", input.display()))?;
        info!("Converted {} in {:.2}s", input.display(), start.elapsed().as_secs_f64());
        return Ok(());
    }

    if !input.is_dir() {
        bail!("Input does not exist: {}", input.display());
    }

    let files = discover_selfs(input);
    if files.is_empty() {
        warn!("No SELF files found in {}", input.display());
        return Ok(());
    }

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create directory: {}", output.display()))?;

    info!("Converting {} files to {}", files.len(), output.display());

    let progress = progress_bar(files.len() as u64)?;

    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let options = ExtractionOptions {
        verbosity: verbosity.saturating_sub(1), // Less verbose for batch
        ..Default::default()
    };

    let errors: Vec<_> = files
        .par_iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(input).unwrap_or(path);
            let result = convert_one(path, &output.join(relative), &options);
            progress.inc(1);
            result.err().map(|e| (path.clone(), e))
        })
        .collect();

    progress.finish_with_message("Done");

    if !errors.is_empty() {
        warn!("{} files failed to convert:", errors.len());
        for (path, err) in &errors {
            error!("  {}: {:#}", path.display(), err);
        }
    }

    info!(
        "Converted {}/{} files in {:.2}s",
        files.len() - errors.len(),
        files.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

// =============================================================================
// Info
// =============================================================================

fn cmd_info(input: &Path) -> Result<()> {
    let format = detect_format(input)
        .with_context(|| format!("Failed to read: {}", input.display()))?;

    match format {
        Some(Format::Package) => info_pkg(input),
        Some(Format::Image) => info_pfs(input),
        Some(Format::SelfExecutable) => info_self(input),
        Some(Format::Elf) => {
            println!("{}: plain ELF, nothing to extract", input.display());
            Ok(())
        }
        None => bail!("Unrecognised container: {}", input.display()),
    }
}

fn info_pkg(input: &Path) -> Result<()> {
    let pkg = PkgContext::open(input)
        .with_context(|| format!("Failed to open package: {}", input.display()))?;

    println!("PKG: {}", input.display());
    println!("  {}", pkg.header);
    if let Some(content) = &pkg.content_header {
        println!("  {}", content);
    }
    println!("  Entries: {}", pkg.entries.len());
    for entry in &pkg.entries {
        println!("    {}", entry);
    }

    Ok(())
}

fn info_pfs(input: &Path) -> Result<()> {
    let image = PfsContext::open(input)
        .with_context(|| format!("Failed to open image: {}", input.display()))?;
    let totals = image.dry_run();

    println!("PFS: {}", input.display());
    println!("  {}", image.header);
    println!("  Inodes loaded: {}", image.inodes.len());
    println!(
        "  Contents: {} files, {} directories, {} bytes ({} skipped, {} failed)",
        totals.files, totals.directories, totals.bytes, totals.skipped, totals.failed
    );

    Ok(())
}

fn info_self(input: &Path) -> Result<()> {
    let source = SelfContext::open(input)
        .with_context(|| format!("Failed to open SELF: {}", input.display()))?;

    println!("SELF: {}", input.display());
    println!("  {}", source.header);
    println!("  Segments: {}", source.segments.len());
    for entry in &source.segments {
        println!("    {}", entry);
    }
    println!("  {}", source.elf_header);
    println!("  Program headers: {}", source.phdrs.len());
    for (i, phdr) in source.phdrs.iter().enumerate() {
        println!("    [{:2}] {:<16} {}", i, segment_type_name(phdr.p_type.get()), phdr);
    }

    Ok(())
}
