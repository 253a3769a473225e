use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use takeout_exif_applier::media::MediaKind;
use takeout_exif_applier::metadata::MetadataRecord;
use takeout_exif_applier::{
    AppConfig, AppError, ApplyOutcome, ExternalToolApplier, MetadataApplier, Processor, Statistics,
};
use tempfile::TempDir;

const NEW_YEAR_2021: &str = r#"{"title": "x", "photoTakenTime": {"timestamp": "1609459200"}}"#;

/// Applier double that records what it was asked to write.
#[derive(Default)]
struct RecordingApplier {
    calls: Mutex<Vec<(PathBuf, MetadataRecord)>>,
    delay: Duration,
}

impl RecordingApplier {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(PathBuf, MetadataRecord)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by(|a, b| a.0.cmp(&b.0));
        calls
    }

    fn applied_to(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

impl MetadataApplier for RecordingApplier {
    fn tool_available(&self, _kind: MediaKind) -> bool {
        true
    }

    fn apply(&self, media: &Path, record: &MetadataRecord) -> Result<ApplyOutcome, AppError> {
        let taken = record.resolved_timestamp()?.ok_or(AppError::MissingTimestamp)?;
        thread::sleep(self.delay);
        self.calls
            .lock()
            .unwrap()
            .push((media.to_path_buf(), record.clone()));
        Ok(ApplyOutcome {
            modified: true,
            details: media.file_name().unwrap().to_string_lossy().into_owned(),
            existing_data: String::new(),
            new_data: format!("DateTime={}", taken.format("%Y-%m-%d %H:%M:%S")),
        })
    }
}

fn write(root: &Path, relative: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

fn run(root: &Path, workers: usize) -> (Statistics, Arc<RecordingApplier>) {
    run_with(root, workers, RecordingApplier::default())
}

fn run_with(
    root: &Path,
    workers: usize,
    applier: RecordingApplier,
) -> (Statistics, Arc<RecordingApplier>) {
    let applier = Arc::new(applier);
    let mut config = AppConfig::with_root(root);
    config.num_workers = workers;
    let stats = Processor::new(config, Box::new(Arc::clone(&applier)))
        .process()
        .unwrap();
    (stats, applier)
}

/// A takeout-like tree mixing every naming form plus broken and orphaned files.
fn build_export(root: &Path) {
    let year = "Takeout/Google Photos/Photos from 2021";
    for i in 0..12 {
        write(root, &format!("{year}/IMG_{i:04}.jpg"), b"jpeg");
        write(
            root,
            &format!("{year}/IMG_{i:04}.jpg.supplemental-metadata.json"),
            NEW_YEAR_2021,
        );
    }
    for i in 0..5 {
        write(root, &format!("{year}/VID_{i:04}.mp4"), b"mp4");
        write(root, &format!("{year}/VID_{i:04}.mp4.json"), NEW_YEAR_2021);
    }
    for i in 1..4 {
        write(root, &format!("{year}/dup({i}).jpg"), b"jpeg");
        write(root, &format!("{year}/dup.jpg.supplemental-metadata({i}).json"), NEW_YEAR_2021);
    }
    write(root, &format!("{year}/PXL_20210101_000000000.NIGHT.jpg"), b"jpeg");
    write(root, &format!("{year}/PXL_20210101_000000000.NIGHT.jpg.supplemen.json"), NEW_YEAR_2021);
    write(root, &format!("{year}/edited.jpg"), b"jpeg");
    write(root, &format!("{year}/edited.json"), NEW_YEAR_2021);

    write(root, &format!("{year}/orphan.png"), b"png");
    write(root, &format!("{year}/broken.jpg"), b"jpeg");
    write(root, &format!("{year}/broken.jpg.json"), b"{\"title\": ");
    write(root, &format!("{year}/undated.heic"), b"heic");
    write(root, &format!("{year}/undated.heic.json"), br#"{"title": "undated"}"#);
    write(root, "Takeout/Google Photos/Trip/metadata.json", br#"{"title": "Trip"}"#);
    write(root, "Takeout/Google Photos/Trip/beach.JPG", b"jpeg");
    write(root, "Takeout/Google Photos/Trip/beach.JPG.json", NEW_YEAR_2021);
    write(root, "Takeout/archive_browser.html", b"<html/>");
}

#[test]
fn applies_photo_taken_time_and_deletes_sidecar() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "photo.jpg", b"jpeg");
    let sidecar = write(
        dir.path(),
        "photo.json",
        br#"{"title": "photo.jpg", "photoTakenTime": {"timestamp": "1609459200"}}"#,
    );

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(stats.modified_files, 1);
    assert_eq!(stats.processed_files, 1);
    assert_eq!(stats.json_files, 1);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.total_files, 2);
    assert_eq!(
        stats.modified_details,
        vec!["  photo.jpg\n    Modified: DateTime=2021-01-01 00:00:00".to_string()]
    );
    assert!(!sidecar.exists());

    let calls = applier.calls();
    assert_eq!(calls.len(), 1);
    let taken = calls[0].1.resolved_timestamp().unwrap().unwrap();
    assert_eq!(taken, "2021-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
}

#[test]
fn timestamp_only_fallback_sets_modification_time() {
    let dir = TempDir::new().unwrap();
    let media = write(dir.path(), "photo.jpg", b"jpeg");
    let sidecar = write(dir.path(), "photo.jpg.json", NEW_YEAR_2021);

    let mut config = AppConfig::with_root(dir.path());
    config.num_workers = 2;
    let applier = ExternalToolApplier::new("/nonexistent/exiftool", "/nonexistent/ffmpeg");
    let stats = Processor::new(config, Box::new(applier)).process().unwrap();

    assert_eq!(stats.modified_files, 1);
    assert!(!sidecar.exists());
    let expected = SystemTime::from("2021-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    assert_eq!(fs::metadata(&media).unwrap().modified().unwrap(), expected);
}

#[test]
fn duplicate_marker_sidecar_is_matched() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "IMG(2).jpg", b"jpeg");
    write(dir.path(), "IMG.jpg", b"jpeg");
    let sidecar = write(dir.path(), "IMG.supplemental-metadata(2).json", NEW_YEAR_2021);

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(applier.applied_to(), vec!["IMG(2).jpg"]);
    assert_eq!(stats.modified_files, 1);
    assert_eq!(stats.skipped_files, 1);
    assert!(!sidecar.exists());
}

#[test]
fn malformed_sidecar_is_counted_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let mut malformed = vec![0xEF, 0xBB, 0xBF];
    malformed.extend_from_slice(br#"{"photoTakenTime": {"timestamp": "1609459200"}, }"#);
    write(dir.path(), "bad.jpg", b"jpeg");
    let bad_sidecar = write(dir.path(), "bad.jpg.json", &malformed);
    write(dir.path(), "good.jpg", b"jpeg");
    write(dir.path(), "good.jpg.json", NEW_YEAR_2021);

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.modified_files, 1);
    assert_eq!(stats.json_files, 1);
    assert_eq!(applier.applied_to(), vec!["good.jpg"]);
    assert!(bad_sidecar.exists());
}

#[test]
fn missing_timestamps_are_an_error_without_modification() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "clip.mp4", b"mp4");
    let sidecar = write(
        dir.path(),
        "clip.mp4.json",
        br#"{"title": "clip", "description": "no dates"}"#,
    );

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.processed_files, 0);
    assert_eq!(stats.modified_files, 0);
    assert!(applier.calls().is_empty());
    assert!(sidecar.exists());
}

#[test]
fn supplemental_layers_fill_gaps() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "photo.jpg", b"jpeg");
    write(dir.path(), "photo.json", br#"{"title": "photo.jpg"}"#);
    let global = write(
        dir.path(),
        "supplemental-metadata.json",
        br#"{"description": "folder", "creationTime": {"timestamp": "1609459200"}}"#,
    );
    let per_file = write(
        dir.path(),
        "photo.supplemental-metadata.json",
        br#"{"geoData": {"latitude": 51.5, "longitude": -0.12}}"#,
    );

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(stats.modified_files, 1);
    let calls = applier.calls();
    let record = &calls[0].1;
    assert_eq!(record.title, "photo.jpg");
    assert_eq!(record.description, "folder");
    assert_eq!(record.resolved_timestamp().unwrap().unwrap().timestamp(), 1609459200);
    assert_eq!(record.resolved_coordinates().unwrap().latitude, 51.5);
    assert!(global.exists());
    assert!(!per_file.exists());
    assert!(!dir.path().join("photo.json").exists());
}

#[test]
fn primary_sidecar_is_read_when_per_file_sidecar_also_exists() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "photo.jpg", b"jpeg");
    let primary = write(dir.path(), "photo.jpg.json", NEW_YEAR_2021);
    let per_file = write(
        dir.path(),
        "photo.jpg.supplemental-metadata.json",
        br#"{"description": "from the per-file sidecar"}"#,
    );

    let (stats, applier) = run(dir.path(), 2);

    assert_eq!(stats.modified_files, 1);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.json_files, 1);
    let calls = applier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.title, "x");
    assert_eq!(calls[0].1.description, "from the per-file sidecar");
    assert_eq!(calls[0].1.resolved_timestamp().unwrap().unwrap().timestamp(), 1609459200);
    assert!(!primary.exists());
    assert!(!per_file.exists());

    let (second, applier) = run(dir.path(), 2);
    assert!(applier.calls().is_empty());
    assert_eq!(second.skipped_files, 1);
    assert_eq!(second.error_count, 0);
}

#[test]
fn shared_sidecar_is_applied_once_for_any_worker_count() {
    let single = TempDir::new().unwrap();
    let many = TempDir::new().unwrap();
    for root in [single.path(), many.path()] {
        write(root, "IMG.jpg", b"jpeg");
        write(root, "IMG.png", b"png");
        write(root, "IMG.json", NEW_YEAR_2021);
    }

    let delay = Duration::from_millis(200);
    let (serial, serial_applier) = run_with(single.path(), 1, RecordingApplier::slow(delay));
    let (parallel, parallel_applier) = run_with(many.path(), 4, RecordingApplier::slow(delay));

    assert_eq!(serial.counters(), [3, 1, 1, 1, 0, 1, 0]);
    assert_eq!(parallel.counters(), serial.counters());
    assert_eq!(serial_applier.calls().len(), 1);
    assert_eq!(parallel_applier.calls().len(), 1);
    assert!(!many.path().join("IMG.json").exists());
}

#[test]
fn second_run_finds_nothing_left_to_apply() {
    let dir = TempDir::new().unwrap();
    build_export(dir.path());

    let (first, _) = run(dir.path(), 4);
    assert_eq!(first.modified_files, 23);

    let (second, applier) = run(dir.path(), 4);
    assert!(applier.calls().is_empty());
    assert_eq!(second.processed_files, 0);
    assert_eq!(second.modified_files, 0);
    assert_eq!(second.skipped_files, first.skipped_files + first.modified_files);
    // broken and undated sidecars are still there and still fail
    assert_eq!(second.error_count, 2);
}

#[test]
fn counters_do_not_depend_on_worker_count() {
    let single = TempDir::new().unwrap();
    let many = TempDir::new().unwrap();
    build_export(single.path());
    build_export(many.path());

    let (serial, serial_applier) = run(single.path(), 1);
    let (parallel, parallel_applier) = run(many.path(), 8);

    assert_eq!(serial.counters(), parallel.counters());
    assert_eq!(serial_applier.applied_to(), parallel_applier.applied_to());

    let mut serial_details = serial.modified_details.clone();
    let mut parallel_details = parallel.modified_details.clone();
    serial_details.sort();
    parallel_details.sort();
    assert_eq!(serial_details, parallel_details);

    assert_eq!(serial.modified_files, 23);
    assert_eq!(serial.skipped_files, 1);
    assert_eq!(serial.error_count, 2);
    assert_eq!(serial.total_files, 53);
}
