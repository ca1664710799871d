/// Per-cell alert hysteresis over the 24-hour rolling sum.
///
/// Each cell of the persisted alert mask is a two-state machine:
/// NORMAL (0) and ALERTED (1). A cell transitions to ALERTED when the
/// rolling sum reaches the threshold, and that transition — not the state —
/// is what notifies. While the sum stays above threshold the cell remains
/// ALERTED and silent; dropping below re-arms it. Without this, every
/// epoch of a sustained storm would re-send the same alert.
///
/// All functions are pure: grids in, grids out. Mask persistence is the
/// caller's job (see `alert::evaluate_epoch`).

use crate::model::MonitorError;
use crate::raster::Grid;

/// Result of evaluating one epoch against the mask.
#[derive(Debug)]
pub struct AlertTransitions {
    /// Updated mask (1 = ALERTED) to be persisted.
    pub mask: Grid,
    /// Cells that crossed NORMAL -> ALERTED this epoch; these aggregate
    /// into at most one notification for the whole grid.
    pub newly_alerted: Vec<(usize, usize)>,
    /// Cells that fell back to NORMAL this epoch.
    pub recovered: usize,
}

/// A fresh mask with every cell NORMAL.
pub fn initial_mask(like: &Grid) -> Grid {
    Grid::zeros(&like.footprint)
}

/// Applies the hysteresis transition to every cell.
///
/// The persisted mask must be strictly boolean; any other value means the
/// file was damaged or hand-edited, and guessing would either drop or
/// duplicate notifications.
pub fn evaluate(
    sum24: &Grid,
    mask: &Grid,
    threshold: f32,
) -> Result<AlertTransitions, MonitorError> {
    if !sum24.footprint.approx_eq(&mask.footprint) {
        return Err(MonitorError::FootprintMismatch {
            context: "alert mask".to_string(),
            expected: sum24.footprint.to_string(),
            actual: mask.footprint.to_string(),
        });
    }

    let mut updated = mask.clone();
    let mut newly_alerted = Vec::new();
    let mut recovered = 0;
    for ((row, col), value) in sum24.data.indexed_iter() {
        let was_alerted = match mask.data[[row, col]] {
            v if v == 0.0 => false,
            v if v == 1.0 => true,
            other => {
                return Err(MonitorError::StateCorruption {
                    path: "alert_mask".to_string(),
                    reason: format!("cell ({}, {}) holds {}, expected 0 or 1", row, col, other),
                });
            }
        };
        let is_alerted = *value >= threshold;
        updated.data[[row, col]] = if is_alerted { 1.0 } else { 0.0 };
        if is_alerted && !was_alerted {
            newly_alerted.push((row, col));
        } else if !is_alerted && was_alerted {
            recovered += 1;
        }
    }
    Ok(AlertTransitions {
        mask: updated,
        newly_alerted,
        recovered,
    })
}

/// Percent deviation of the rolling sum from the per-cell historical
/// average. Cells whose calibration value is missing or non-positive carry
/// no signal and report 0.
pub fn percent_deviation(sum24: &Grid, averages: &Grid) -> Result<Grid, MonitorError> {
    if !sum24.footprint.approx_eq(&averages.footprint) {
        return Err(MonitorError::FootprintMismatch {
            context: "deviation thresholds".to_string(),
            expected: sum24.footprint.to_string(),
            actual: averages.footprint.to_string(),
        });
    }
    let mut out = Grid::zeros(&sum24.footprint);
    for ((row, col), value) in sum24.data.indexed_iter() {
        let avg = averages.data[[row, col]];
        out.data[[row, col]] = if avg.is_finite() && avg > 0.0 {
            ((value - avg) / avg) * 100.0
        } else {
            0.0
        };
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::T_RAIN;
    use crate::raster::Footprint;
    use ndarray::Array2;

    fn grid_with(values: &[(usize, usize, f32)]) -> Grid {
        let footprint = Footprint {
            origin_x: 80.0,
            origin_y: 30.5,
            pixel_width: 0.1,
            pixel_height: -0.1,
            rows: 3,
            cols: 3,
            epsg: 4326,
        };
        let mut grid = Grid::zeros(&footprint);
        for (r, c, v) in values {
            grid.data[[*r, *c]] = *v;
        }
        grid
    }

    #[test]
    fn test_first_crossing_alerts_once() {
        let sum = grid_with(&[(1, 1, 150.0)]);
        let mask = initial_mask(&sum);
        let first = evaluate(&sum, &mask, T_RAIN).unwrap();
        assert_eq!(first.newly_alerted, vec![(1, 1)]);
        assert_eq!(first.mask.data[[1, 1]], 1.0);

        // Same exceedance next epoch: still alerted, but nothing new.
        let second = evaluate(&sum, &first.mask, T_RAIN).unwrap();
        assert!(
            second.newly_alerted.is_empty(),
            "sustained exceedance must not re-notify"
        );
    }

    #[test]
    fn test_recovery_re_arms_the_cell() {
        let high = grid_with(&[(0, 0, 200.0)]);
        let low = grid_with(&[(0, 0, 10.0)]);
        let mask = initial_mask(&high);

        let alerted = evaluate(&high, &mask, T_RAIN).unwrap();
        let recovered = evaluate(&low, &alerted.mask, T_RAIN).unwrap();
        assert_eq!(recovered.recovered, 1);
        assert_eq!(recovered.mask.data[[0, 0]], 0.0);

        // A second independent episode notifies again.
        let again = evaluate(&high, &recovered.mask, T_RAIN).unwrap();
        assert_eq!(again.newly_alerted, vec![(0, 0)]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let sum = grid_with(&[(0, 0, T_RAIN)]);
        let result = evaluate(&sum, &initial_mask(&sum), T_RAIN).unwrap();
        assert_eq!(result.newly_alerted.len(), 1, ">= threshold must alert");
    }

    #[test]
    fn test_non_boolean_mask_is_corruption() {
        let sum = grid_with(&[]);
        let mask = grid_with(&[(2, 2, 0.5)]);
        let err = evaluate(&sum, &mask, T_RAIN).unwrap_err();
        assert!(matches!(err, MonitorError::StateCorruption { .. }));
    }

    #[test]
    fn test_multiple_crossings_aggregate_into_one_event() {
        let sum = grid_with(&[(0, 0, 150.0), (1, 2, 160.0), (2, 2, 170.0)]);
        let result = evaluate(&sum, &initial_mask(&sum), T_RAIN).unwrap();
        assert_eq!(
            result.newly_alerted.len(),
            3,
            "all transitions collected for a single notification event"
        );
    }

    #[test]
    fn test_percent_deviation_against_averages() {
        let sum = grid_with(&[(0, 0, 30.0)]);
        let averages = grid_with(&[(0, 0, 10.0), (1, 1, 0.0)]);
        let dev = percent_deviation(&sum, &averages).unwrap();
        assert!((dev.data[[0, 0]] - 200.0).abs() < 1e-3);
        assert_eq!(
            dev.data[[1, 1]], 0.0,
            "uncalibrated cells must not divide by zero"
        );
    }
}
