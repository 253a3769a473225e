// src/metadata.rs

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Folder-wide sidecar applying to every media file in the same directory.
pub const GLOBAL_SIDECAR_NAME: &str = "supplemental-metadata.json";

/// Marker inserted before `.json` in per-file supplemental sidecar names.
pub const SUPPLEMENTAL_MARKER: &str = ".supplemental-metadata";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One decoded sidecar document.
///
/// Empty strings, zero counts, zero timestamps and all-zero GPS fixes all
/// mean "absent": a fix at exactly 0.0/0.0 cannot be told apart from a
/// missing one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataRecord {
    pub title: String,
    pub description: String,
    #[serde(deserialize_with = "view_count")]
    pub image_views: u64,
    pub creation_time: TimeField,
    pub modification_time: TimeField,
    pub photo_taken_time: TimeField,
    pub geo_data: GeoFix,
    pub geo_data_alt: GeoFix,
}

/// A `{"timestamp": "<unix seconds>"}` object. The raw string is kept so a
/// malformed value only fails when that field is actually used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeField {
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub latitude_span: f64,
    pub longitude_span: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

fn view_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.trim().is_empty() => Ok(0),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid imageViews value {:?}", s))),
    }
}

impl TimeField {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self { timestamp: timestamp.into() }
    }

    pub fn is_set(&self) -> bool {
        let ts = self.timestamp.trim();
        !ts.is_empty() && ts != "0"
    }

    /// Parses the decimal Unix-seconds string. `Ok(None)` when unset.
    pub fn instant(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        if !self.is_set() {
            return Ok(None);
        }
        let secs: i64 = self
            .timestamp
            .trim()
            .parse()
            .map_err(|_| AppError::InvalidTimestamp(self.timestamp.clone()))?;
        DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| AppError::InvalidTimestamp(self.timestamp.clone()))
    }
}

impl GeoFix {
    pub fn is_set(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

impl MetadataRecord {
    /// Decodes one sidecar document, tolerating a leading UTF-8 BOM.
    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Left-biased merge: fills only the fields `self` left empty. GPS fixes
    /// are taken whole, and only when `self` has no fix at all.
    pub fn merge(mut self, supplemental: &MetadataRecord) -> MetadataRecord {
        if self.title.is_empty() && !supplemental.title.is_empty() {
            self.title = supplemental.title.clone();
        }
        if self.description.is_empty() && !supplemental.description.is_empty() {
            self.description = supplemental.description.clone();
        }
        if self.image_views == 0 && supplemental.image_views > 0 {
            self.image_views = supplemental.image_views;
        }
        if !self.creation_time.is_set() && supplemental.creation_time.is_set() {
            self.creation_time = supplemental.creation_time.clone();
        }
        if !self.modification_time.is_set() && supplemental.modification_time.is_set() {
            self.modification_time = supplemental.modification_time.clone();
        }
        if !self.photo_taken_time.is_set() && supplemental.photo_taken_time.is_set() {
            self.photo_taken_time = supplemental.photo_taken_time.clone();
        }
        if !self.geo_data.is_set() && supplemental.geo_data.is_set() {
            self.geo_data = supplemental.geo_data;
        }
        if !self.geo_data_alt.is_set() && supplemental.geo_data_alt.is_set() {
            self.geo_data_alt = supplemental.geo_data_alt;
        }
        self
    }

    /// Photo-taken time, falling back to creation time.
    ///
    /// A malformed photo-taken value is an error even if a creation time is
    /// present.
    pub fn resolved_timestamp(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        if self.photo_taken_time.is_set() {
            return self.photo_taken_time.instant();
        }
        self.creation_time.instant()
    }

    pub fn resolved_coordinates(&self) -> Option<Coordinates> {
        let fix = if self.geo_data.is_set() {
            self.geo_data
        } else if self.geo_data_alt.is_set() {
            self.geo_data_alt
        } else {
            return None;
        };
        Some(Coordinates {
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: (fix.altitude != 0.0).then_some(fix.altitude),
        })
    }
}

/// The merged metadata for one media file and the sidecars it was read from.
#[derive(Debug, Clone)]
pub struct LayeredRecord {
    pub record: MetadataRecord,
    /// Sidecars belonging to this media file alone, primary first. The
    /// folder-wide sidecar is never listed.
    pub sidecars: Vec<PathBuf>,
}

/// Reads the resolved sidecar and layers the folder-wide and per-file
/// supplemental sidecars under it, in that order.
///
/// When the resolved file is itself a per-file supplemental sidecar and its
/// primary (`photo.jpg.json` for `photo.jpg.supplemental-metadata.json`)
/// exists, the primary is the base layer and the resolved file the last one.
pub fn load_layered(sidecar: &Path) -> Result<LayeredRecord, AppError> {
    let resolved = MetadataRecord::decode(&fs::read(sidecar)?)?;

    let (mut record, per_file_layer, mut sidecars) =
        match primary_sidecar_path(sidecar).filter(|primary| primary.is_file()) {
            Some(primary) => {
                log::trace!("Using primary metadata {:?} under {:?}", primary, sidecar);
                let base = MetadataRecord::decode(&fs::read(&primary)?)?;
                (base, Some(resolved), vec![primary, sidecar.to_path_buf()])
            }
            None => (resolved, None, vec![sidecar.to_path_buf()]),
        };

    let global = sidecar
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(GLOBAL_SIDECAR_NAME);
    if global != sidecar {
        if let Some(layer) = read_layer(&global) {
            log::trace!("Merging global supplemental metadata {:?}", global);
            record = record.merge(&layer);
        }
    }

    match per_file_layer {
        Some(layer) => record = record.merge(&layer),
        None => {
            if let Some(per_file) = per_file_sidecar_path(sidecar) {
                if let Some(layer) = read_layer(&per_file) {
                    log::trace!("Merging per-file supplemental metadata {:?}", per_file);
                    record = record.merge(&layer);
                    sidecars.push(per_file);
                }
            }
        }
    }

    Ok(LayeredRecord { record, sidecars })
}

/// `photo.jpg.supplemental-metadata(1).json` -> `photo.jpg(1).json`, or
/// `None` when the name carries no full supplemental marker.
pub fn primary_sidecar_path(per_file: &Path) -> Option<PathBuf> {
    let name = per_file.file_name()?.to_str()?;
    let rest = name.strip_suffix(".json")?;
    let at = rest.rfind(SUPPLEMENTAL_MARKER).filter(|&at| at > 0)?;
    let tail = &rest[at + SUPPLEMENTAL_MARKER.len()..];
    let duplicate = tail
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);
    if !tail.is_empty() && !duplicate {
        return None;
    }
    Some(per_file.with_file_name(format!("{}{}.json", &rest[..at], tail)))
}

/// `photo.jpg.json` -> `photo.jpg.supplemental-metadata.json`
pub fn per_file_sidecar_path(sidecar: &Path) -> Option<PathBuf> {
    let name = sidecar.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    Some(sidecar.with_file_name(format!("{}{}.json", stem, SUPPLEMENTAL_MARKER)))
}

fn read_layer(path: &Path) -> Option<MetadataRecord> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("Cannot read supplemental metadata {:?}: {}", path, e);
            return None;
        }
    };
    match MetadataRecord::decode(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Ignoring unreadable supplemental metadata {:?}: {}", path, e);
            None
        }
    }
}
