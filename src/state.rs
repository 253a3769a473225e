use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_files: u64,
    pub json_files: u64,
    pub processed_files: u64,
    pub modified_files: u64,
    pub unmodified_files: u64,
    pub skipped_files: u64,
    pub error_count: u64,
    pub modified_details: Vec<String>,
    pub unmodified_details: Vec<String>,
}

impl Statistics {
    /// Same counters, ignoring the detail lines and their order.
    pub fn counters(&self) -> [u64; 7] {
        [
            self.total_files,
            self.json_files,
            self.processed_files,
            self.modified_files,
            self.unmodified_files,
            self.skipped_files,
            self.error_count,
        ]
    }
}

/// State shared by the walker and every worker for the length of one run.
#[derive(Debug, Default)]
pub struct SharedState {
    consumed: Mutex<HashSet<PathBuf>>,
    /// Sidecars a worker is currently applying.
    claimed: Mutex<HashSet<PathBuf>>,
    released: Condvar,
    stats: Mutex<Statistics>,
}

/// Exclusive use of one sidecar, given back when dropped.
#[derive(Debug)]
pub struct SidecarClaim<'a> {
    state: &'a SharedState,
    sidecar: PathBuf,
}

impl SidecarClaim<'_> {
    pub fn path(&self) -> &Path {
        &self.sidecar
    }
}

impl Drop for SidecarClaim<'_> {
    fn drop(&mut self) {
        lock(&self.state.claimed).remove(&self.sidecar);
        self.state.released.notify_all();
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_consumed(&self, sidecar: PathBuf) {
        lock(&self.consumed).insert(sidecar);
    }

    pub fn is_consumed(&self, path: &Path) -> bool {
        lock(&self.consumed).contains(path)
    }

    /// Takes `sidecar` for the calling worker. Waits while another worker
    /// holds it and returns `None` once it has been consumed.
    pub fn claim(&self, sidecar: &Path) -> Option<SidecarClaim<'_>> {
        let mut claimed = lock(&self.claimed);
        loop {
            if self.is_consumed(sidecar) {
                return None;
            }
            if claimed.insert(sidecar.to_path_buf()) {
                return Some(SidecarClaim {
                    state: self,
                    sidecar: sidecar.to_path_buf(),
                });
            }
            claimed = self
                .released
                .wait(claimed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Runs `f` with the statistics locked, so a read-modify-write is atomic
    /// with respect to other workers.
    pub fn update<R>(&self, f: impl FnOnce(&mut Statistics) -> R) -> R {
        f(&mut lock(&self.stats))
    }

    pub fn record_error(&self) {
        self.update(|s| s.error_count += 1);
    }

    pub fn snapshot(&self) -> Statistics {
        lock(&self.stats).clone()
    }
}

// A worker that panicked mid-update leaves counters that are still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
