//! Locates the sidecar JSON for a media file.
//!
//! The export renames sidecars in several lossy ways: the media extension
//! may be swapped for `.json`, a duplicate marker such as `(1)` is moved
//! from the media name to just before `.json`, and long names are cut short
//! in the middle of `.supplemental-metadata`. Candidates are probed in a
//! fixed priority order and the first one that exists wins.

use crate::error::AppError;
use crate::metadata::SUPPLEMENTAL_MARKER;
use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

lazy_static! {
    /// `.supplemental-metadata` followed by each one-character-shorter
    /// truncation down to `.s`, then the empty suffix.
    pub static ref SUPPLEMENTAL_SUFFIXES: Vec<&'static str> = truncations(SUPPLEMENTAL_MARKER);

    static ref DUPLICATE_MARKER: Regex =
        Regex::new(r"\(\d+\)").expect("duplicate marker pattern is valid");
}

fn truncations(full: &'static str) -> Vec<&'static str> {
    (2..=full.len())
        .rev()
        .map(|len| &full[..len])
        .chain(std::iter::once(""))
        .collect()
}

/// Answers whether a candidate sidecar path exists. Any error other than
/// "not found" aborts resolution.
pub trait PathProbe {
    fn exists(&self, path: &Path) -> io::Result<bool>;
}

impl<F> PathProbe for F
where
    F: Fn(&Path) -> io::Result<bool>,
{
    fn exists(&self, path: &Path) -> io::Result<bool> {
        self(path)
    }
}

/// Probes the real filesystem. Directories never count as a match.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(!meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
}

/// Splits a single `(N)` run out of the file name. Names with zero or
/// several runs are returned unchanged with no marker.
pub fn split_duplicate_marker(media: &Path) -> (PathBuf, Option<String>) {
    let Some(name) = media.file_name().and_then(|n| n.to_str()) else {
        return (media.to_path_buf(), None);
    };

    let mut runs = DUPLICATE_MARKER.find_iter(name);
    match (runs.next(), runs.next()) {
        (Some(run), None) => {
            let normalized = format!("{}{}", &name[..run.start()], &name[run.end()..]);
            (media.with_file_name(normalized), Some(run.as_str().to_string()))
        }
        _ => (media.to_path_buf(), None),
    }
}

/// Every path worth probing for `media`, highest priority first, without
/// repeats.
pub fn sidecar_candidates(media: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(SUPPLEMENTAL_SUFFIXES.len() * 3 + 1);
    let mut push = |path: PathBuf| {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    };

    // name.jpg -> name.json
    push(media.with_extension("json"));

    let (normalized, marker) = split_duplicate_marker(media);
    let marker = marker.unwrap_or_default();
    let marker = marker.as_str();

    // name(1).jpg -> name.jpg.supplemental-metadata(1).json and truncations
    for &suffix in SUPPLEMENTAL_SUFFIXES.iter() {
        push(append(&normalized, &[suffix, marker, ".json"]));
    }

    // name(1).jpg -> name(1).jpg.supplemental-metadata.json, when (1) is part of the real name
    for &suffix in SUPPLEMENTAL_SUFFIXES.iter() {
        push(append(media, &[suffix, ".json"]));
    }

    // name(1).jpg -> name.supplemental-metadata(1).json
    let stem = normalized.with_extension("");
    for &suffix in SUPPLEMENTAL_SUFFIXES.iter() {
        push(append(&stem, &[suffix, marker, ".json"]));
    }

    candidates
}

/// Finds the sidecar for `media`, or `NotFound` when no candidate exists.
pub fn resolve<P: PathProbe + ?Sized>(media: &Path, probe: &P) -> Result<Resolution, AppError> {
    for candidate in sidecar_candidates(media) {
        log::trace!("Probing sidecar candidate {:?}", candidate);
        match probe.exists(&candidate) {
            Ok(true) => {
                log::trace!("Matched {:?} -> {:?}", media, candidate);
                return Ok(Resolution::Found(candidate));
            }
            Ok(false) => {}
            Err(source) => {
                return Err(AppError::Resolve { path: candidate, source });
            }
        }
    }
    Ok(Resolution::NotFound)
}

fn append(path: &Path, parts: &[&str]) -> PathBuf {
    let mut joined = OsString::from(path.as_os_str());
    for part in parts {
        joined.push(part);
    }
    PathBuf::from(joined)
}
