/// Persisted state layout and run-level state primitives.
///
/// The state directory is the only thing shared between runs:
///
/// ```text
/// state/
///   .slidemon.lock          exclusive-run guard (holds the owner pid)
///   most_recent.txt         key of the last epoch fully processed
///   sum24/ sum48/ sum72/    one dir per rolling window:
///     running_sum.asc         the incremental sum
///     queue/<key>.asc         the epochs currently inside the window
///   max16/queue/<key>.asc   epochs feeding the rolling maximum
///   daily/<YYYYMMDD>.asc    calendar-day buckets
///   alert_mask.asc          hysteresis state of the alert evaluator
/// ```
///
/// A run holds the lock for its whole ingest-then-persist sequence; the
/// guard releases on every exit path, including unwinding. A missing
/// marker or mask is an explicit fresh start; an unreadable one is
/// corruption and aborts the run rather than silently discarding history.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::model::{EpochKey, MonitorError};

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> StatePaths {
        StatePaths {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one named window (`sum24`, `sum48`, `sum72`, `max16`).
    pub fn window_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn marker(&self) -> PathBuf {
        self.root.join("most_recent.txt")
    }

    pub fn alert_mask(&self) -> PathBuf {
        self.root.join("alert_mask.asc")
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.root.join("daily")
    }

    /// A named auxiliary grid kept alongside the state (historical-average
    /// thresholds, slope-exceedance mask).
    pub fn aux_grid(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }
}

// ---------------------------------------------------------------------------
// Exclusive-run lock
// ---------------------------------------------------------------------------

/// Scoped exclusive access to a state directory.
///
/// Dropping the guard releases the lock, so every exit path — success,
/// error return, panic unwinding — leaves the directory unlocked.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
}

const LOCK_FILE_NAME: &str = ".slidemon.lock";

impl StateLock {
    /// Acquire the lock for `dir`, creating the directory if needed.
    ///
    /// Fails if another live process holds the lock. A lock left by a dead
    /// process is stale and is replaced.
    pub fn acquire(dir: &Path) -> Result<StateLock, MonitorError> {
        fs::create_dir_all(dir).map_err(|e| MonitorError::Config(format!(
            "cannot create state directory {}: {}",
            dir.display(),
            e
        )))?;
        let lock_path = dir.join(LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder_pid(&lock_path) {
                Some(pid) if Self::is_process_running(pid) => {
                    return Err(MonitorError::Config(format!(
                        "another run holds the state lock at {} (pid {})",
                        lock_path.display(),
                        pid
                    )));
                }
                _ => {
                    // Stale lock from a dead run.
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{}\n", pid)).map_err(|e| MonitorError::Config(format!(
            "cannot create lock file {}: {}",
            lock_path.display(),
            e
        )))?;
        Ok(StateLock { lock_path })
    }

    fn holder_pid(lock_path: &Path) -> Option<u32> {
        fs::read_to_string(lock_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        // Without a portable liveness check, treat any existing lock as live.
        true
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

// ---------------------------------------------------------------------------
// Most-recently-processed marker
// ---------------------------------------------------------------------------

/// Reads the marker. A missing file is a legitimate first run (`None`);
/// an unreadable or malformed file is corruption.
pub fn read_marker(paths: &StatePaths) -> Result<Option<EpochKey>, MonitorError> {
    let path = paths.marker();
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(|e| MonitorError::StateCorruption {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let key = EpochKey::parse(text.trim()).map_err(|e| MonitorError::StateCorruption {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(key))
}

/// Atomically replaces the marker.
pub fn write_marker(paths: &StatePaths, key: &EpochKey) -> Result<(), MonitorError> {
    codec::atomic_write(&paths.marker(), format!("{}\n", key).as_bytes())
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Lists the `.asc` files in a directory, sorted by file name. With
/// epoch-keyed or run-stamped names, name order is time order.
pub fn list_grid_files(dir: &Path) -> Result<Vec<PathBuf>, MonitorError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| MonitorError::StateCorruption {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("asc"))
        .collect();
    files.sort();
    Ok(files)
}

/// Deletes the oldest rasters in `dir` until at most `keep` remain.
pub fn prune_outputs(dir: &Path, keep: usize) -> Result<(), MonitorError> {
    let files = list_grid_files(dir)?;
    if files.len() > keep {
        for path in &files[..files.len() - keep] {
            codec::remove_grid(path)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
