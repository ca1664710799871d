/// Alert evaluation for the rainfall pipeline.
///
/// Wires the pure hysteresis arithmetic to its persisted mask and to the
/// notification collaborator: load mask (or start all-NORMAL explicitly),
/// apply transitions, persist, and turn the set of newly-alerted cells
/// into at most one notification for the epoch. The percent-deviation
/// diagnostic rides along as a purely observational side channel.
///
/// Submodules:
/// - `hysteresis` — the per-cell state machine and deviation arithmetic.
/// - `notify` — the delivery collaborator (SMTP or log-only).

pub mod hysteresis;
pub mod notify;

use std::path::Path;

use crate::codec;
use crate::config::RunContext;
use crate::logging::{self, DataSource};
use crate::model::{DEVIATION_DIAGNOSTIC_PCT, EpochKey, MonitorError, T_RAIN};
use crate::raster::Grid;
use crate::regions::REGION;
use crate::state::StatePaths;

use notify::Notifier;

/// What one epoch's alert evaluation did.
pub struct EpochAlertOutcome {
    pub newly_alerted: usize,
    pub recovered: usize,
    /// Whether a notification was handed to the collaborator and accepted.
    pub notified: bool,
    /// Deviation raster to archive when the diagnostic threshold tripped.
    pub diagnostic: Option<Grid>,
}

/// Evaluates the updated 24h sum against the persisted alert mask.
///
/// `sum24_raster` is the already-written rolling-sum raster for this epoch,
/// attached to the notification so the recipient sees what tripped it.
pub fn evaluate_epoch(
    paths: &StatePaths,
    ctx: &RunContext,
    sum24: &Grid,
    key: &EpochKey,
    sum24_raster: Option<&Path>,
    notifier: &dyn Notifier,
) -> Result<EpochAlertOutcome, MonitorError> {
    // Missing mask is the documented initial state; unreadable is not.
    let mask_path = paths.alert_mask();
    let mask = if mask_path.exists() {
        codec::read_grid(&mask_path).map_err(|e| MonitorError::StateCorruption {
            path: mask_path.display().to_string(),
            reason: e.to_string(),
        })?
    } else {
        hysteresis::initial_mask(sum24)
    };

    let transitions = hysteresis::evaluate(sum24, &mask, T_RAIN)?;
    codec::write_grid(&mask_path, &transitions.mask)?;

    let mut notified = false;
    if !transitions.newly_alerted.is_empty() {
        let subject = format!("Rainfall alert — {}", REGION.name);
        let body = format!(
            "24-hour accumulated rainfall reached {} native units in {} cell(s) \
             at epoch {} (see attachment). {} cell(s) already alerted earlier \
             in this episode remain above threshold.",
            T_RAIN,
            transitions.newly_alerted.len(),
            key,
            transitions.mask.count_nonzero() - transitions.newly_alerted.len(),
        );
        match notifier.send(&ctx.config.recipients, &subject, &body, sum24_raster) {
            Ok(()) => {
                notified = true;
                logging::info(
                    DataSource::Smtp,
                    Some(key.as_str()),
                    &format!("alert sent for {} new cell(s)", transitions.newly_alerted.len()),
                );
            }
            Err(reason) => {
                // Delivery trouble is a warning; mask state is already safe.
                logging::warn(DataSource::Smtp, Some(key.as_str()), &reason);
            }
        }
    }

    let diagnostic = deviation_diagnostic(paths, ctx, sum24, key)?;

    Ok(EpochAlertOutcome {
        newly_alerted: transitions.newly_alerted.len(),
        recovered: transitions.recovered,
        notified,
        diagnostic,
    })
}

/// Computes the percent-deviation side channel when the calibration grid
/// is installed; absent calibration simply disables the diagnostic.
fn deviation_diagnostic(
    paths: &StatePaths,
    ctx: &RunContext,
    sum24: &Grid,
    key: &EpochKey,
) -> Result<Option<Grid>, MonitorError> {
    let grid_path = paths.aux_grid(&ctx.config.threshold_grid_file);
    if !grid_path.exists() {
        logging::debug(
            DataSource::State,
            Some(key.as_str()),
            "historical-average grid not installed; deviation diagnostic off",
        );
        return Ok(None);
    }
    let averages = codec::read_grid(&grid_path).map_err(|e| MonitorError::StateCorruption {
        path: grid_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let deviation = hysteresis::percent_deviation(sum24, &averages)?;
    if deviation.max_value() > DEVIATION_DIAGNOSTIC_PCT {
        logging::warn(
            DataSource::State,
            Some(key.as_str()),
            &format!(
                "24h sum deviates more than {}% from the historical average",
                DEVIATION_DIAGNOSTIC_PCT
            ),
        );
        Ok(Some(deviation))
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
