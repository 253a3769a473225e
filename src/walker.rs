use crate::error::AppError;
use crate::media::{is_sidecar, is_supported_media};
use crate::state::SharedState;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Walks `root` once and sends every media file to the workers.
///
/// Each directory is read in full (sorted by name) before its entries are
/// handled, so a sidecar a worker deletes afterwards is still seen and
/// counted. Returns when the walk ends; dropping `paths_tx` closes the queue.
pub fn start_walking(
    root: &Path,
    state: &SharedState,
    paths_tx: crossbeam_channel::Sender<PathBuf>,
) -> Result<(), AppError> {
    log::info!("Starting file discovery in {:?}", root);

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if vanished_sidecar(&e) => {
                log::trace!("Sidecar disappeared during walk: {:?}", e.path());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if entry.file_type().is_dir() {
            continue;
        }

        state.update(|s| s.total_files += 1);

        let path = entry.path();
        if is_sidecar(path) || state.is_consumed(path) {
            log::trace!("Skipping sidecar file: {:?}", path);
            continue;
        }

        if is_supported_media(path) {
            log::debug!("Found media file: {:?}", path);
            paths_tx.send(path.to_path_buf())?;
        } else {
            log::trace!("Skipping file due to unsupported extension: {:?}", path);
        }
    }

    log::info!("File discovery complete.");
    Ok(())
}

fn vanished_sidecar(e: &walkdir::Error) -> bool {
    is_vanished_sidecar(e.path(), e.io_error().map(io::Error::kind))
}

/// A sidecar consumed by a worker between listing and visiting is expected.
/// Anything else that disappears mid-walk is not.
fn is_vanished_sidecar(path: Option<&Path>, kind: Option<io::ErrorKind>) -> bool {
    kind == Some(io::ErrorKind::NotFound) && path.map(is_sidecar).unwrap_or(false)
}
