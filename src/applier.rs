//! Writes resolved metadata onto media files.
//!
//! Images go through exiftool and videos through ffmpeg. When the tool is
//! missing or fails, only the filesystem timestamps are updated.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::media::{display_name, MediaKind};
use crate::metadata::{Coordinates, MetadataRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::ffi::OsString;
use std::fs::{self, File, FileTimes};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use tempfile::TempPath;

/// Embedded GPS positions closer than this are treated as equal.
const GPS_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub modified: bool,
    /// File name the outcome is about.
    pub details: String,
    /// Summary of what the file carried before, empty when unknown.
    pub existing_data: String,
    pub new_data: String,
}

pub trait MetadataApplier: Send + Sync {
    /// Whether the embedding tool for `kind` can be run.
    fn tool_available(&self, kind: MediaKind) -> bool;

    fn apply(&self, media: &Path, record: &MetadataRecord) -> Result<ApplyOutcome, AppError>;
}

impl<T: MetadataApplier + ?Sized> MetadataApplier for Arc<T> {
    fn tool_available(&self, kind: MediaKind) -> bool {
        (**self).tool_available(kind)
    }

    fn apply(&self, media: &Path, record: &MetadataRecord) -> Result<ApplyOutcome, AppError> {
        (**self).apply(media, record)
    }
}

/// Date and position already embedded in an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedData {
    pub date_time: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl EmbeddedData {
    pub fn read(path: &Path) -> Option<EmbeddedData> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = Reader::new().read_from_container(&mut reader).ok()?;

        Some(EmbeddedData {
            date_time: read_date_time(&exif),
            latitude: read_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S'),
            longitude: read_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W'),
        })
    }

    /// True when the embedded DateTime is exactly `taken` (to the second)
    /// and, if a position is wanted, the embedded one matches it.
    pub fn is_current(&self, taken: DateTime<Utc>, coordinates: Option<Coordinates>) -> bool {
        if self.date_time != Some(taken.naive_utc()) {
            return false;
        }
        match coordinates {
            None => true,
            Some(c) => near(self.latitude, c.latitude) && near(self.longitude, c.longitude),
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(dt) = self.date_time {
            parts.push(format!("DateTime={}", dt.format("%Y-%m-%d %H:%M:%S")));
        }
        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            parts.push(format!("GPS: {:.6}, {:.6}", lat, lon));
        }
        parts.join(", ")
    }
}

fn near(embedded: Option<f64>, wanted: f64) -> bool {
    embedded.map(|v| (v - wanted).abs() < GPS_TOLERANCE).unwrap_or(false)
}

fn read_date_time(exif: &exif::Exif) -> Option<NaiveDateTime> {
    let field = exif.get_field(Tag::DateTime, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())
}

fn read_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let degrees = parts
        .iter()
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, scale)| part.to_f64() / scale)
        .sum::<f64>();

    let negative = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(values) => values.first().map(|v| v.first() == Some(&negative_ref)),
            _ => None,
        })
        .unwrap_or(false);
    Some(if negative { -degrees } else { degrees })
}

/// Applies metadata with exiftool (images) and ffmpeg (videos).
#[derive(Debug)]
pub struct ExternalToolApplier {
    exiftool: PathBuf,
    ffmpeg: PathBuf,
    exiftool_available: OnceLock<bool>,
    ffmpeg_available: OnceLock<bool>,
}

impl ExternalToolApplier {
    pub fn new(exiftool: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            exiftool: exiftool.into(),
            ffmpeg: ffmpeg.into(),
            exiftool_available: OnceLock::new(),
            ffmpeg_available: OnceLock::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.exiftool_path, &config.ffmpeg_path)
    }

    fn apply_to_image(
        &self,
        media: &Path,
        record: &MetadataRecord,
        taken: DateTime<Utc>,
        mut outcome: ApplyOutcome,
    ) -> Result<ApplyOutcome, AppError> {
        let coordinates = record.resolved_coordinates();

        if let Some(embedded) = EmbeddedData::read(media) {
            outcome.existing_data = embedded.summary();
            if embedded.is_current(taken, coordinates) {
                outcome.new_data = date_summary(taken);
                return Ok(outcome);
            }
        }

        let args = exiftool_args(media, record, taken, coordinates);
        if let Err(e) = run_tool(&self.exiftool, &args) {
            log::warn!("exiftool failed, updating timestamps only for {:?}: {}", media, e);
            return fallback(media, taken, outcome);
        }

        set_file_times(media, taken)?;
        outcome.modified = true;
        outcome.new_data = match coordinates {
            Some(c) => format!(
                "{}, GPS: {:.6}, {:.6}",
                date_summary(taken),
                c.latitude,
                c.longitude
            ),
            None => date_summary(taken),
        };
        Ok(outcome)
    }

    fn apply_to_video(
        &self,
        media: &Path,
        record: &MetadataRecord,
        taken: DateTime<Utc>,
        mut outcome: ApplyOutcome,
    ) -> Result<ApplyOutcome, AppError> {
        let written = temp_output(media).and_then(|temp| {
            let args = ffmpeg_args(media, &temp, record, taken);
            run_tool(&self.ffmpeg, &args)?;
            temp.persist(media).map_err(|e| AppError::Apply {
                path: media.to_path_buf(),
                reason: format!("failed to replace original video: {}", e.error),
            })
        });
        if let Err(e) = written {
            log::warn!("ffmpeg failed, updating timestamps only for {:?}: {}", media, e);
            return fallback(media, taken, outcome);
        }

        set_file_times(media, taken)?;
        outcome.modified = true;
        outcome.new_data = format!("creation_time={}", taken.format("%Y-%m-%dT%H:%M:%S"));
        Ok(outcome)
    }
}

impl MetadataApplier for ExternalToolApplier {
    fn tool_available(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => *self
                .exiftool_available
                .get_or_init(|| probe_tool(&self.exiftool, "-ver")),
            MediaKind::Video => *self
                .ffmpeg_available
                .get_or_init(|| probe_tool(&self.ffmpeg, "-version")),
        }
    }

    fn apply(&self, media: &Path, record: &MetadataRecord) -> Result<ApplyOutcome, AppError> {
        let kind = MediaKind::from_path(media)
            .ok_or_else(|| AppError::UnsupportedMedia(media.to_path_buf()))?;
        let taken = record.resolved_timestamp()?.ok_or(AppError::MissingTimestamp)?;

        let outcome = ApplyOutcome {
            details: display_name(media),
            ..ApplyOutcome::default()
        };

        if !self.tool_available(kind) {
            let tool = match kind {
                MediaKind::Image => &self.exiftool,
                MediaKind::Video => &self.ffmpeg,
            };
            log::info!("{:?} not found, updating timestamps only for: {:?}", tool, media);
            return fallback(media, taken, outcome);
        }

        match kind {
            MediaKind::Image => self.apply_to_image(media, record, taken, outcome),
            MediaKind::Video => self.apply_to_video(media, record, taken, outcome),
        }
    }
}

fn fallback(
    media: &Path,
    taken: DateTime<Utc>,
    mut outcome: ApplyOutcome,
) -> Result<ApplyOutcome, AppError> {
    set_file_times(media, taken)?;
    outcome.modified = true;
    outcome.new_data = date_summary(taken);
    Ok(outcome)
}

pub fn exiftool_args(
    media: &Path,
    record: &MetadataRecord,
    taken: DateTime<Utc>,
    coordinates: Option<Coordinates>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-overwrite_original".into(),
        format!("-DateTime={}", taken.format("%Y:%m:%d %H:%M:%S")).into(),
    ];

    if !record.description.is_empty() {
        args.push(format!("-ImageDescription={}", record.description).into());
        args.push(format!("-Comment={}", record.description).into());
    }

    if let Some(c) = coordinates {
        // exiftool takes the hemisphere from the sign of a numeric Ref value
        args.push(format!("-GPSLatitude={:.6}", c.latitude).into());
        args.push(format!("-GPSLatitudeRef={:.6}", c.latitude).into());
        args.push(format!("-GPSLongitude={:.6}", c.longitude).into());
        args.push(format!("-GPSLongitudeRef={:.6}", c.longitude).into());
        if let Some(alt) = c.altitude {
            args.push(format!("-GPSAltitude={:.6}", alt).into());
        }
    }

    args.push(media.into());
    args
}

pub fn ffmpeg_args(
    media: &Path,
    temp: &Path,
    record: &MetadataRecord,
    taken: DateTime<Utc>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-v".into(),
        "error".into(),
        "-i".into(),
        media.into(),
        "-map".into(),
        "0".into(),
        "-metadata".into(),
        format!("creation_time={}", taken.format("%Y-%m-%dT%H:%M:%S")).into(),
    ];

    if !record.title.is_empty() {
        args.push("-metadata".into());
        args.push(format!("title={}", record.title).into());
    }

    if !record.description.is_empty() {
        args.push("-metadata".into());
        args.push(format!("comment={}", record.description).into());
    }

    if let Some(c) = record.resolved_coordinates() {
        args.push("-metadata".into());
        args.push(format!("location={}", iso6709(c)).into());
    }

    args.extend(["-c", "copy", "-y"].map(OsString::from));
    args.push(temp.into());
    args
}

/// ISO 6709 position string as used by QuickTime `location` atoms.
fn iso6709(c: Coordinates) -> String {
    match c.altitude {
        Some(alt) => format!("{:+08.4}{:+09.4}{:+.1}/", c.latitude, c.longitude, alt),
        None => format!("{:+08.4}{:+09.4}/", c.latitude, c.longitude),
    }
}

/// A fresh, uniquely named file next to `media` with the same extension, so
/// ffmpeg picks the same container. Removed on drop unless persisted.
fn temp_output(media: &Path) -> Result<TempPath, AppError> {
    let dir = match media.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let suffix = media
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix(".takeout-")
        .suffix(&suffix)
        .tempfile_in(dir)?;
    Ok(file.into_temp_path())
}

fn probe_tool(program: &Path, version_flag: &str) -> bool {
    Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn run_tool(program: &Path, args: &[OsString]) -> Result<(), AppError> {
    log::trace!("Running {:?} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AppError::Apply {
            path: program.to_path_buf(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Apply {
            path: program.to_path_buf(),
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

fn set_file_times(path: &Path, when: DateTime<Utc>) -> Result<(), AppError> {
    let time = SystemTime::from(when);
    let times = FileTimes::new().set_accessed(time).set_modified(time);
    fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_times(times))
        .map_err(|e| AppError::Apply {
            path: path.to_path_buf(),
            reason: format!("failed to update file times: {}", e),
        })
}

fn date_summary(taken: DateTime<Utc>) -> String {
    format!("DateTime={}", taken.format("%Y-%m-%d %H:%M:%S"))
}
