use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::process::ExitCode;
use takeout_exif_applier::config::{normalize_legacy_flags, Args};
use takeout_exif_applier::{AppConfig, Processor, Statistics};

fn main() -> ExitCode {
    let args = Args::parse_from(normalize_legacy_flags(std::env::args_os()));

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = AppConfig::load(&args)
        .context("failed to load configuration (is the root directory set with --dir <PATH>?)")?;

    // Initialize env_logger based on config.log_level
    let level = if config.verbose {
        log::LevelFilter::Debug
    } else {
        config.log_level.parse().unwrap_or(log::LevelFilter::Info)
    };
    env_logger::Builder::new().filter_level(level).init();

    let root = config
        .validated_root()
        .with_context(|| format!("Error accessing directory: {}", config.root_dir.display()))?;

    println!("Starting Google Takeout EXIF metadata processor");
    println!("Directory: {}", root.display());
    println!("Dry Run: {}", config.dry_run);
    println!("Verbose: {}\n", config.verbose);

    let verbose = config.verbose;
    let processor = Processor::with_external_tools(AppConfig { root_dir: root, ..config });
    info!("Using {} workers", processor.config().worker_count());

    let (stats, aborted) = match processor.process() {
        Ok(stats) => (stats, None),
        Err(aborted) => (aborted.statistics, Some(aborted.source)),
    };

    print_report(&stats, verbose);

    if let Some(source) = aborted {
        eprintln!("Error processing folder: {}", source);
        return Ok(ExitCode::FAILURE);
    }
    if stats.error_count > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(stats: &Statistics, verbose: bool) {
    println!("\n=== Processing Complete ===");
    println!("Total files scanned: {}", stats.total_files);
    println!("JSON metadata files found: {}", stats.json_files);
    println!("Media files processed: {}", stats.processed_files);
    println!("  - Modified: {}", stats.modified_files);
    println!("  - Already up-to-date: {}", stats.unmodified_files);
    println!("Files skipped: {}", stats.skipped_files);
    println!("Errors encountered: {}", stats.error_count);

    if verbose && !stats.modified_details.is_empty() {
        println!("\n=== Modified Files ===");
        for detail in &stats.modified_details {
            println!("{}", detail);
        }
    }

    if verbose && !stats.unmodified_details.is_empty() {
        println!("\n=== Unchanged Files (Already Had Matching EXIF) ===");
        for detail in &stats.unmodified_details {
            println!("{}", detail);
        }
    }
}
