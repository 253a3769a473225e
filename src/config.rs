use crate::error::AppError;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;

/// Flags that may also be written with a single dash (`-dir`, `-dry-run`).
const LONG_FLAGS: &[&str] = &["dir", "dry-run", "verbose", "workers"];

#[derive(Debug, Parser, Default)]
#[command(
    name = "takeout-exif-applier",
    about = "Applies Google Takeout JSON metadata to the exported photos and videos"
)]
pub struct Args {
    /// Root directory of the Google Takeout folder
    #[arg(long = "dir", short = 'd', value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Perform a dry run without modifying files
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Number of worker threads (default: available parallelism, at least 2)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub root_dir: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    /// 0 picks the worker count from the host.
    pub num_workers: usize,
    pub log_level: String,
    pub exiftool_path: String,
    pub ffmpeg_path: String,
}

impl AppConfig {
    /// Defaults, then `takeout-exif-applier.*` in the working directory,
    /// then `TAKEOUT_*` environment variables, then command-line flags.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("dry_run", false)?
            .set_default("verbose", false)?
            .set_default("num_workers", 0)?
            .set_default("log_level", "info")?
            .set_default("exiftool_path", "exiftool")?
            .set_default("ffmpeg_path", "ffmpeg")?
            .add_source(File::with_name("takeout-exif-applier").required(false))
            .add_source(Environment::with_prefix("TAKEOUT"));

        if let Some(dir) = &args.dir {
            builder = builder.set_override("root_dir", dir.to_string_lossy().into_owned())?;
        }
        if args.dry_run {
            builder = builder.set_override("dry_run", true)?;
        }
        if args.verbose {
            builder = builder.set_override("verbose", true)?;
        }
        if let Some(workers) = args.workers {
            builder = builder.set_override("num_workers", workers as i64)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Built-in defaults for `root`, without reading files or environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root.into(),
            dry_run: false,
            verbose: false,
            num_workers: 0,
            log_level: "info".to_string(),
            exiftool_path: "exiftool".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(2)
    }

    pub fn queue_capacity(&self) -> usize {
        self.worker_count() * 2
    }

    /// Absolute form of `root_dir`, which must be an existing directory.
    pub fn validated_root(&self) -> Result<PathBuf, AppError> {
        let meta = std::fs::metadata(&self.root_dir)?;
        if !meta.is_dir() {
            return Err(AppError::InvalidDirectory(self.root_dir.clone()));
        }
        Ok(std::fs::canonicalize(&self.root_dir)?)
    }
}

/// Rewrites `-dir` style flags to `--dir` so both spellings parse.
pub fn normalize_legacy_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split('=').next().unwrap_or(rest);
            if LONG_FLAGS.contains(&name) {
                OsString::from(format!("-{}", text))
            } else {
                arg
            }
        })
        .collect()
}
