/// Calendar-day precipitation buckets.
///
/// Each epoch is added into a bucket file keyed by its calendar date.
/// Whether a bucket exists is an explicit check — a missing file means
/// "first epoch of the day" and starts the bucket from the incoming grid;
/// an unreadable file is corruption. The 23:30 epoch seals the day: the
/// completed bucket is handed back to the caller for archiving.

use std::path::{Path, PathBuf};

use crate::codec;
use crate::model::{EpochKey, MonitorError};
use crate::raster::Grid;

pub struct DailyBucket {
    dir: PathBuf,
    staged: Option<(PathBuf, Grid)>,
}

impl DailyBucket {
    pub fn open(dir: &Path) -> DailyBucket {
        DailyBucket {
            dir: dir.to_path_buf(),
            staged: None,
        }
    }

    fn bucket_path(&self, key: &EpochKey) -> PathBuf {
        self.dir.join(format!("{}.asc", key.date().format("%Y%m%d")))
    }

    /// Adds the epoch into its day's bucket (staged until `persist`).
    /// Returns the sealed day total when this epoch closes the day.
    pub fn stage(&mut self, grid: &Grid, key: &EpochKey) -> Result<Option<Grid>, MonitorError> {
        if self.staged.is_some() {
            return Err(MonitorError::StateCorruption {
                path: self.dir.display().to_string(),
                reason: "previous daily stage not persisted".to_string(),
            });
        }
        let path = self.bucket_path(key);
        let bucket = if path.exists() {
            let mut bucket = codec::read_grid(&path).map_err(|e| MonitorError::StateCorruption {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            bucket.add_assign_checked(grid, "daily bucket")?;
            bucket
        } else {
            // First epoch of this date: the bucket starts from the grid.
            grid.clone()
        };
        let sealed = if key.is_last_of_day() {
            Some(bucket.clone())
        } else {
            None
        };
        self.staged = Some((path, bucket));
        Ok(sealed)
    }

    pub fn persist(&mut self) -> Result<(), MonitorError> {
        if let Some((path, bucket)) = self.staged.take() {
            codec::write_grid(&path, &bucket)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Footprint;
    use ndarray::Array2;

    fn grid(value: f32) -> Grid {
        let footprint = Footprint {
            origin_x: 80.0,
            origin_y: 30.5,
            pixel_width: 0.1,
            pixel_height: -0.1,
            rows: 2,
            cols: 2,
            epsg: 4326,
        };
        Grid::new(Array2::from_elem((2, 2), value), footprint).unwrap()
    }

    #[test]
    fn test_first_epoch_starts_bucket_explicitly() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut daily = DailyBucket::open(dir.path());
        let key = EpochKey::parse("20150801-0000").unwrap();
        let sealed = daily.stage(&grid(1.5), &key).unwrap();
        assert!(sealed.is_none());
        daily.persist().unwrap();
        assert!(dir.path().join("20150801.asc").exists());
    }

    #[test]
    fn test_epochs_accumulate_within_a_day() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut daily = DailyBucket::open(dir.path());
        for hhmm in ["0000", "0030", "0100"] {
            let key = EpochKey::parse(&format!("20150801-{}", hhmm)).unwrap();
            daily.stage(&grid(2.0), &key).unwrap();
            daily.persist().unwrap();
        }
        let bucket = codec::read_grid(&dir.path().join("20150801.asc")).unwrap();
        assert!(bucket.data.iter().all(|v| (*v - 6.0).abs() < 1e-6));
    }

    #[test]
    fn test_last_epoch_of_day_seals_bucket() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut daily = DailyBucket::open(dir.path());
        let key = EpochKey::parse("20150801-2300").unwrap();
        assert!(daily.stage(&grid(1.0), &key).unwrap().is_none());
        daily.persist().unwrap();

        let seal_key = EpochKey::parse("20150801-2330").unwrap();
        let sealed = daily
            .stage(&grid(1.0), &seal_key)
            .unwrap()
            .expect("23:30 epoch must seal the day");
        daily.persist().unwrap();
        assert!(sealed.data.iter().all(|v| (*v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_new_date_starts_separate_bucket() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mut daily = DailyBucket::open(dir.path());
        daily
            .stage(&grid(3.0), &EpochKey::parse("20150801-2330").unwrap())
            .unwrap();
        daily.persist().unwrap();
        daily
            .stage(&grid(4.0), &EpochKey::parse("20150802-0000").unwrap())
            .unwrap();
        daily.persist().unwrap();

        let day2 = codec::read_grid(&dir.path().join("20150802.asc")).unwrap();
        assert!(
            day2.data.iter().all(|v| (*v - 4.0).abs() < 1e-6),
            "rollover must not carry the previous day's total"
        );
    }

    #[test]
    fn test_unreadable_bucket_is_corruption() {
        let dir = tempfile::tempdir().expect("tmpdir");
        std::fs::write(dir.path().join("20150801.asc"), "garbage").unwrap();
        let mut daily = DailyBucket::open(dir.path());
        let err = daily
            .stage(&grid(1.0), &EpochKey::parse("20150801-0030").unwrap())
            .unwrap_err();
        assert!(matches!(err, MonitorError::StateCorruption { .. }));
    }
}
