/// Rolling windows over the half-hourly epoch stream.
///
/// A sum window keeps an incremental running-sum grid plus a bounded queue
/// of the epochs currently inside the window, so the oldest contribution
/// can be subtracted exactly on eviction instead of re-summing the whole
/// span. The maximum window keeps only the queue and recomputes the
/// element-wise maximum from it — max has no inverse, so there is nothing
/// incremental to maintain. That asymmetry is intentional.
///
/// Ingestion is staged in memory; nothing touches disk until `persist`.
/// A run that fails between the two leaves the persisted state exactly as
/// the previous run left it.

use std::path::{Path, PathBuf};

use crate::codec;
use crate::model::{EpochKey, MonitorError};
use crate::raster::Grid;
use crate::state;

const SUM_FILE: &str = "running_sum.asc";
const QUEUE_DIR: &str = "queue";

fn corrupt(path: &Path, reason: impl Into<String>) -> MonitorError {
    MonitorError::StateCorruption {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Reads the ordered queue keys of a window directory.
fn read_queue_keys(queue_dir: &Path) -> Result<Vec<EpochKey>, MonitorError> {
    let mut keys = Vec::new();
    for path in state::list_grid_files(queue_dir)? {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| corrupt(&path, "queue file has no stem"))?;
        let key = EpochKey::parse(stem).map_err(|e| corrupt(&path, e.to_string()))?;
        keys.push(key);
    }
    Ok(keys)
}

fn read_queue_grid(queue_dir: &Path, key: &EpochKey) -> Result<Grid, MonitorError> {
    let path = queue_dir.join(format!("{}.asc", key));
    codec::read_grid(&path).map_err(|e| corrupt(&path, e.to_string()))
}

// ---------------------------------------------------------------------------
// Sum window
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RollingWindow {
    name: String,
    dir: PathBuf,
    span: usize,
    sum: Option<Grid>,
    queue: Vec<EpochKey>,
    staged_insert: Option<(EpochKey, Grid)>,
    staged_evictions: Vec<EpochKey>,
}

impl RollingWindow {
    /// Opens (or freshly initializes) a window at `dir`.
    ///
    /// A missing directory is an explicit fresh window. Anything present
    /// but unreadable, or internally inconsistent (queue longer than the
    /// span, sum without queue or vice versa), aborts the run.
    pub fn open(dir: &Path, name: &str, span: usize) -> Result<RollingWindow, MonitorError> {
        let queue_dir = dir.join(QUEUE_DIR);
        let queue = read_queue_keys(&queue_dir)?;
        if queue.len() > span {
            return Err(corrupt(
                &queue_dir,
                format!("queue holds {} epochs, span is {}", queue.len(), span),
            ));
        }
        let sum_path = dir.join(SUM_FILE);
        let sum = if sum_path.exists() {
            Some(codec::read_grid(&sum_path).map_err(|e| corrupt(&sum_path, e.to_string()))?)
        } else {
            None
        };
        if sum.is_some() != !queue.is_empty() {
            return Err(corrupt(
                dir,
                "running sum and queue disagree (one is present without the other)",
            ));
        }
        Ok(RollingWindow {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            span,
            sum,
            queue,
            staged_insert: None,
            staged_evictions: Vec::new(),
        })
    }

    pub fn span(&self) -> usize {
        self.span
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The running sum after the last ingestion, if any epoch has arrived.
    pub fn current_sum(&self) -> Option<&Grid> {
        self.sum.as_ref()
    }

    /// Ingests one epoch: evicts and subtracts the oldest epoch when the
    /// queue is at capacity, then adds the new grid. The change is staged;
    /// call `persist` to commit it.
    pub fn ingest(&mut self, grid: &Grid, key: &EpochKey) -> Result<(), MonitorError> {
        if self.staged_insert.is_some() {
            return Err(corrupt(
                &self.dir,
                "previous ingestion not persisted before the next",
            ));
        }
        if let Some(last) = self.queue.last() {
            if key <= last {
                return Err(MonitorError::Acquisition(format!(
                    "epoch {} is not newer than window head {}",
                    key, last
                )));
            }
        }

        match &self.sum {
            Some(sum) if !sum.footprint.approx_eq(&grid.footprint) => {
                return Err(MonitorError::FootprintMismatch {
                    context: format!("window {}", self.name),
                    expected: sum.footprint.to_string(),
                    actual: grid.footprint.to_string(),
                });
            }
            Some(_) => {}
            None => {
                // First-ever ingestion: a zero sum at the incoming shape.
                self.sum = Some(Grid::zeros(&grid.footprint));
            }
        }

        let evicted = if self.queue.len() == self.span {
            let oldest = self.queue.remove(0);
            Some((
                read_queue_grid(&self.dir.join(QUEUE_DIR), &oldest)?,
                oldest,
            ))
        } else {
            None
        };

        let sum = self
            .sum
            .as_mut()
            .ok_or_else(|| corrupt(&self.dir, "running sum missing during ingest"))?;
        if let Some((oldest_grid, oldest)) = evicted {
            sum.sub_assign_checked(&oldest_grid, &format!("window {} eviction", self.name))?;
            self.staged_evictions.push(oldest);
        }
        sum.add_assign_checked(grid, &format!("window {} insertion", self.name))?;
        self.queue.push(key.clone());
        self.staged_insert = Some((key.clone(), grid.clone()));
        Ok(())
    }

    /// Commits the staged ingestion: epoch file, then running sum, then
    /// removal of the evicted epochs.
    pub fn persist(&mut self) -> Result<(), MonitorError> {
        let Some((key, grid)) = self.staged_insert.take() else {
            return Ok(());
        };
        let queue_dir = self.dir.join(QUEUE_DIR);
        codec::write_grid(&queue_dir.join(format!("{}.asc", key)), &grid)?;
        if let Some(sum) = &self.sum {
            codec::write_grid(&self.dir.join(SUM_FILE), sum)?;
        }
        for evicted in self.staged_evictions.drain(..) {
            codec::remove_grid(&queue_dir.join(format!("{}.asc", evicted)))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Maximum window
// ---------------------------------------------------------------------------

pub struct MaxWindow {
    dir: PathBuf,
    span: usize,
    queue: Vec<EpochKey>,
    staged_insert: Option<(EpochKey, Grid)>,
    staged_evictions: Vec<EpochKey>,
}

impl MaxWindow {
    pub fn open(dir: &Path, span: usize) -> Result<MaxWindow, MonitorError> {
        let queue_dir = dir.join(QUEUE_DIR);
        let queue = read_queue_keys(&queue_dir)?;
        if queue.len() > span {
            return Err(corrupt(
                &queue_dir,
                format!("queue holds {} epochs, span is {}", queue.len(), span),
            ));
        }
        Ok(MaxWindow {
            dir: dir.to_path_buf(),
            span,
            queue,
            staged_insert: None,
            staged_evictions: Vec::new(),
        })
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Ingests one epoch and returns the element-wise maximum over the
    /// retained queue (including the new epoch).
    pub fn ingest(&mut self, grid: &Grid, key: &EpochKey) -> Result<Grid, MonitorError> {
        if self.staged_insert.is_some() {
            return Err(corrupt(
                &self.dir,
                "previous ingestion not persisted before the next",
            ));
        }
        if let Some(last) = self.queue.last() {
            if key <= last {
                return Err(MonitorError::Acquisition(format!(
                    "epoch {} is not newer than window head {}",
                    key, last
                )));
            }
        }
        if self.queue.len() == self.span {
            self.staged_evictions.push(self.queue.remove(0));
        }

        let queue_dir = self.dir.join(QUEUE_DIR);
        let mut rolling_max = grid.clone();
        for key in &self.queue {
            let retained = read_queue_grid(&queue_dir, key)?;
            rolling_max.max_assign_checked(&retained, "rolling maximum")?;
        }
        self.queue.push(key.clone());
        self.staged_insert = Some((key.clone(), grid.clone()));
        Ok(rolling_max)
    }

    pub fn persist(&mut self) -> Result<(), MonitorError> {
        let Some((key, grid)) = self.staged_insert.take() else {
            return Ok(());
        };
        let queue_dir = self.dir.join(QUEUE_DIR);
        codec::write_grid(&queue_dir.join(format!("{}.asc", key)), &grid)?;
        for evicted in self.staged_evictions.drain(..) {
            codec::remove_grid(&queue_dir.join(format!("{}.asc", evicted)))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
