use crate::applier::{ApplyOutcome, ExternalToolApplier, MetadataApplier};
use crate::config::AppConfig;
use crate::error::{AppError, RunAborted};
use crate::media::display_name;
use crate::metadata::{self, LayeredRecord};
use crate::resolver::{self, FsProbe, PathProbe, Resolution};
use crate::state::{SharedState, SidecarClaim, Statistics};
use crate::walker;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;

/// Drives one run: the walker feeds a bounded queue and a fixed pool of
/// workers drains it, each worker owning one media file from sidecar lookup
/// to sidecar deletion.
pub struct Processor {
    config: AppConfig,
    applier: Box<dyn MetadataApplier>,
}

impl Processor {
    pub fn new(config: AppConfig, applier: Box<dyn MetadataApplier>) -> Self {
        Self { config, applier }
    }

    pub fn with_external_tools(config: AppConfig) -> Self {
        let applier = ExternalToolApplier::from_config(&config);
        Self::new(config, Box::new(applier))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Processes every media file under the root. Per-file failures are
    /// counted and logged; only a failed walk aborts, and even then the
    /// files already queued are finished first.
    pub fn process(&self) -> Result<Statistics, RunAborted> {
        let workers = self.config.worker_count();
        let state = SharedState::new();
        log::info!("Starting metadata processing with {} workers", workers);

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("takeout-worker-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                return Err(RunAborted {
                    statistics: state.snapshot(),
                    source: e.into(),
                })
            }
        };

        let (paths_tx, paths_rx) = crossbeam_channel::bounded(self.config.queue_capacity());

        let walk_result = thread::scope(|scope| {
            let walker =
                scope.spawn(|| walker::start_walking(&self.config.root_dir, &state, paths_tx));

            pool.install(|| {
                paths_rx
                    .into_iter()
                    .par_bridge()
                    .for_each(|media| self.process_media_file(&state, &media));
            });

            walker
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        });

        if let Err(source) = walk_result {
            log::error!("Error walking directory: {}", source);
            state.record_error();
            return Err(RunAborted {
                statistics: state.snapshot(),
                source,
            });
        }

        log::info!("All media files processed.");
        Ok(state.snapshot())
    }

    fn process_media_file(&self, state: &SharedState, media: &Path) {
        log::debug!("Processing started for: {:?}", media);

        let claim = match claim_sidecar(state, media) {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                log::debug!("[SKIP] No metadata file for: {:?}", media);
                state.update(|s| s.skipped_files += 1);
                return;
            }
            Err(e) => {
                log::error!("{}", e);
                state.record_error();
                return;
            }
        };

        let layered = match metadata::load_layered(claim.path()) {
            Ok(layered) => layered,
            Err(e) if e.is_decode_error() => {
                log::error!("Failed to parse metadata from {:?}: {}", claim.path(), e);
                state.record_error();
                return;
            }
            Err(e) => {
                log::error!("Failed to read metadata from {:?}: {}", claim.path(), e);
                state.record_error();
                return;
            }
        };
        state.update(|s| s.json_files += 1);

        if let Err(e) = self.apply(state, media, &layered) {
            log::error!("Failed to apply metadata to {:?}: {}", media, e);
            state.record_error();
        }
    }

    fn apply(
        &self,
        state: &SharedState,
        media: &Path,
        layered: &LayeredRecord,
    ) -> Result<(), AppError> {
        let record = &layered.record;
        record.resolved_timestamp()?.ok_or(AppError::MissingTimestamp)?;

        if self.config.dry_run {
            log::info!("[DRY-RUN] Would apply metadata to: {:?}", media);
            log::debug!("    Metadata: {:?}", record);
            log::debug!("    Would delete: {:?}", layered.sidecars);
            let detail = format!("  {} (would be modified)", display_name(media));
            state.update(|s| {
                s.processed_files += 1;
                s.modified_files += 1;
                s.modified_details.push(detail);
            });
            return Ok(());
        }

        let outcome = self.applier.apply(media, record)?;
        record_outcome(state, media, &outcome);
        for sidecar in &layered.sidecars {
            consume_sidecar(state, sidecar);
        }
        Ok(())
    }
}

/// Resolves the sidecar for `media`, skipping sidecars other workers have
/// already consumed, and holds it until the unit is done.
fn claim_sidecar<'a>(
    state: &'a SharedState,
    media: &Path,
) -> Result<Option<SidecarClaim<'a>>, AppError> {
    let probe = |path: &Path| -> io::Result<bool> {
        if state.is_consumed(path) {
            return Ok(false);
        }
        FsProbe.exists(path)
    };
    loop {
        match resolver::resolve(media, &probe)? {
            Resolution::NotFound => return Ok(None),
            Resolution::Found(sidecar) => {
                if let Some(claim) = state.claim(&sidecar) {
                    return Ok(Some(claim));
                }
                log::trace!("{:?} was consumed while waiting, resolving again", sidecar);
            }
        }
    }
}

fn record_outcome(state: &SharedState, media: &Path, outcome: &ApplyOutcome) {
    let mut detail = format!("  {}", outcome.details);
    if outcome.modified {
        if !outcome.new_data.is_empty() {
            detail.push_str(&format!("\n    Modified: {}", outcome.new_data));
        }
        state.update(|s| {
            s.processed_files += 1;
            s.modified_files += 1;
            s.modified_details.push(detail);
        });
        log::info!("[OK] Metadata modified: {:?}", media);
        if !outcome.existing_data.is_empty() {
            log::debug!("    Previous: {}", outcome.existing_data);
            log::debug!("    Updated:  {}", outcome.new_data);
        }
    } else {
        if !outcome.existing_data.is_empty() {
            detail.push_str(&format!("\n    Verified: {}", outcome.existing_data));
        }
        state.update(|s| {
            s.processed_files += 1;
            s.unmodified_files += 1;
            s.unmodified_details.push(detail);
        });
        log::info!("[SKIP] Already up-to-date: {:?}", media);
        if !outcome.existing_data.is_empty() {
            log::debug!("    Verified: {}", outcome.existing_data);
        }
    }
}

/// Deletes the sidecar and remembers it so the walker never hands it out.
/// Metadata is already applied at this point, so failure is only a warning.
fn consume_sidecar(state: &SharedState, sidecar: &Path) {
    match fs::remove_file(sidecar) {
        Ok(()) => {
            state.mark_consumed(sidecar.to_path_buf());
            log::debug!("    Deleted: {:?}", sidecar);
        }
        Err(e) => log::warn!("Failed to delete metadata file {:?}: {}", sidecar, e),
    }
}
