/// Precipitation accumulator: the stateful heart of the rainfall pipeline.
///
/// One `ingest` call advances every rolling window, the 16-epoch maximum,
/// and the calendar-day bucket by exactly one epoch, and returns the four
/// co-registered output grids. All mutations are staged; `persist` commits
/// them to the state directory as a unit from the caller's perspective.
///
/// Submodules:
/// - `window` — rolling sum windows with exact eviction, rolling maximum.
/// - `daily` — calendar-day buckets and the day-seal.

pub mod daily;
pub mod window;

use crate::model::{EpochKey, MonitorError, SPAN_24H, SPAN_48H, SPAN_72H, SPAN_MAX};
use crate::raster::Grid;
use crate::state::StatePaths;

use daily::DailyBucket;
use window::{MaxWindow, RollingWindow};

/// Grids produced by one epoch's ingestion, all co-registered with the
/// incoming epoch.
#[derive(Debug)]
pub struct EpochOutputs {
    pub sum24: Grid,
    pub sum48: Grid,
    pub sum72: Grid,
    pub max16: Grid,
    /// Present only when this epoch sealed a calendar day.
    pub sealed_day: Option<Grid>,
}

pub struct Accumulator {
    sum24: RollingWindow,
    sum48: RollingWindow,
    sum72: RollingWindow,
    max16: MaxWindow,
    daily: DailyBucket,
}

impl Accumulator {
    /// Opens all window state under the state directory. Any unreadable
    /// persisted piece aborts here, before ingestion starts.
    pub fn open(paths: &StatePaths) -> Result<Accumulator, MonitorError> {
        Ok(Accumulator {
            sum24: RollingWindow::open(&paths.window_dir("sum24"), "sum24", SPAN_24H)?,
            sum48: RollingWindow::open(&paths.window_dir("sum48"), "sum48", SPAN_48H)?,
            sum72: RollingWindow::open(&paths.window_dir("sum72"), "sum72", SPAN_72H)?,
            max16: MaxWindow::open(&paths.window_dir("max16"), SPAN_MAX)?,
            daily: DailyBucket::open(&paths.daily_dir()),
        })
    }

    /// Ingests one epoch into every window. Each window evicts and inserts
    /// independently; the outputs are snapshots of the updated sums.
    pub fn ingest(&mut self, grid: &Grid, key: &EpochKey) -> Result<EpochOutputs, MonitorError> {
        self.sum24.ingest(grid, key)?;
        self.sum48.ingest(grid, key)?;
        self.sum72.ingest(grid, key)?;
        let max16 = self.max16.ingest(grid, key)?;
        let sealed_day = self.daily.stage(grid, key)?;

        let snapshot = |window: &RollingWindow, name: &str| {
            window.current_sum().cloned().ok_or_else(|| {
                MonitorError::StateCorruption {
                    path: name.to_string(),
                    reason: "window has no sum after ingestion".to_string(),
                }
            })
        };
        Ok(EpochOutputs {
            sum24: snapshot(&self.sum24, "sum24")?,
            sum48: snapshot(&self.sum48, "sum48")?,
            sum72: snapshot(&self.sum72, "sum72")?,
            max16,
            sealed_day,
        })
    }

    /// Commits everything staged by the last `ingest`.
    pub fn persist(&mut self) -> Result<(), MonitorError> {
        self.sum24.persist()?;
        self.sum48.persist()?;
        self.sum72.persist()?;
        self.max16.persist()?;
        self.daily.persist()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
