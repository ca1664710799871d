//! Persisted-State Verification Module
//!
//! Framework for auditing the state directory between runs: does each
//! rolling window still satisfy its running-sum invariant, is the alert
//! mask strictly boolean, is the marker readable. Run via the
//! `state_check` binary after incidents, upgrades, or manual surgery on
//! the state directory, before trusting the next scheduled run.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::model::{SPAN_24H, SPAN_48H, SPAN_72H, SPAN_MAX};
use crate::raster::{Grid, VALUE_EPS};
use crate::state::{self, StatePaths};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    pub timestamp: String,
    pub marker_present: bool,
    pub marker_key: Option<String>,
    pub windows: Vec<WindowVerification>,
    pub alert_mask: MaskVerification,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub windows_total: usize,
    pub windows_ok: usize,
    pub windows_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowVerification {
    pub name: String,
    pub span: usize,
    pub status: VerificationStatus,
    pub queue_len: usize,
    pub sum_present: bool,
    /// Whether the running sum equals the element-wise sum of the queue
    /// (within tolerance). `None` when the window has no sum to check.
    pub sum_matches_queue: Option<bool>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskVerification {
    pub present: bool,
    pub strictly_boolean: bool,
    pub cells_alerted: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    Empty,
    Failed,
}

// ============================================================================
// Window Verification
// ============================================================================

/// Recomputes a sum window from its queue and compares against the stored
/// running sum. The incremental bookkeeping is only trustworthy while
/// this equality holds. Maximum windows (`expects_sum == false`) carry
/// only a queue, so just its shape is checked.
pub fn verify_window(
    paths: &StatePaths,
    name: &str,
    span: usize,
    expects_sum: bool,
) -> WindowVerification {
    let mut result = WindowVerification {
        name: name.to_string(),
        span,
        status: VerificationStatus::Failed,
        queue_len: 0,
        sum_present: false,
        sum_matches_queue: None,
        error_message: None,
    };

    let dir = paths.window_dir(name);
    let queue_dir = dir.join("queue");
    let queue_files = match state::list_grid_files(&queue_dir) {
        Ok(files) => files,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.queue_len = queue_files.len();

    if result.queue_len > span {
        result.error_message = Some(format!(
            "queue holds {} epochs, span is {}",
            result.queue_len, span
        ));
        return result;
    }

    let sum_path = dir.join("running_sum.asc");
    result.sum_present = sum_path.exists();

    if queue_files.is_empty() && !result.sum_present {
        result.status = VerificationStatus::Empty;
        return result;
    }
    if !expects_sum {
        if result.sum_present {
            result.error_message = Some("unexpected running sum in a maximum window".to_string());
        } else {
            result.status = VerificationStatus::Success;
        }
        return result;
    }
    if queue_files.is_empty() != !result.sum_present {
        result.error_message =
            Some("running sum and queue disagree (one present without the other)".to_string());
        return result;
    }

    let stored = match codec::read_grid(&sum_path) {
        Ok(grid) => grid,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    let mut recomputed = Grid::zeros(&stored.footprint);
    for file in &queue_files {
        let epoch = match codec::read_grid(file) {
            Ok(grid) => grid,
            Err(e) => {
                result.error_message = Some(e.to_string());
                return result;
            }
        };
        if let Err(e) = recomputed.add_assign_checked(&epoch, "verification") {
            result.error_message = Some(e.to_string());
            return result;
        }
    }

    let matches = stored
        .data
        .iter()
        .zip(recomputed.data.iter())
        .all(|(a, b)| (a - b).abs() <= VALUE_EPS);
    result.sum_matches_queue = Some(matches);
    if matches {
        result.status = VerificationStatus::Success;
    } else {
        result.error_message = Some("running sum diverged from queue contents".to_string());
    }
    result
}

// ============================================================================
// Alert Mask Verification
// ============================================================================

pub fn verify_alert_mask(paths: &StatePaths) -> MaskVerification {
    let mut result = MaskVerification {
        present: false,
        strictly_boolean: false,
        cells_alerted: 0,
        error_message: None,
    };
    let mask_path = paths.alert_mask();
    if !mask_path.exists() {
        // Legitimate before the first exceedance evaluation.
        result.strictly_boolean = true;
        return result;
    }
    result.present = true;
    match codec::read_grid(&mask_path) {
        Ok(mask) => {
            result.strictly_boolean = mask.data.iter().all(|v| *v == 0.0 || *v == 1.0);
            result.cells_alerted = mask.count_nonzero();
            if !result.strictly_boolean {
                result.error_message = Some("mask holds values outside {0, 1}".to_string());
            }
        }
        Err(e) => {
            result.error_message = Some(e.to_string());
        }
    }
    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn verify_state(paths: &StatePaths) -> StateReport {
    let (marker_present, marker_key) = match state::read_marker(paths) {
        Ok(Some(key)) => (true, Some(key.as_str().to_string())),
        Ok(None) => (false, None),
        Err(e) => (true, Some(format!("UNREADABLE: {}", e))),
    };

    let windows = vec![
        verify_window(paths, "sum24", SPAN_24H, true),
        verify_window(paths, "sum48", SPAN_48H, true),
        verify_window(paths, "sum72", SPAN_72H, true),
        verify_window(paths, "max16", SPAN_MAX, false),
    ];
    let ok = windows
        .iter()
        .filter(|w| w.status != VerificationStatus::Failed)
        .count();

    let summary = VerificationSummary {
        windows_total: windows.len(),
        windows_ok: ok,
        windows_failed: windows.len() - ok,
    };

    StateReport {
        timestamp: Utc::now().to_rfc3339(),
        marker_present,
        marker_key,
        windows,
        alert_mask: verify_alert_mask(paths),
        summary,
    }
}

pub fn print_summary(report: &StateReport) {
    println!("State verification at {}", report.timestamp);
    println!("===========================================================");
    match (&report.marker_present, &report.marker_key) {
        (true, Some(key)) => println!("Marker:      {}", key),
        _ => println!("Marker:      none (fresh state)"),
    }
    for window in &report.windows {
        let status = match window.status {
            VerificationStatus::Success => "OK",
            VerificationStatus::Empty => "empty",
            VerificationStatus::Failed => "FAILED",
        };
        println!(
            "Window {:6} {:6}  queue {:3}/{}{}",
            window.name,
            status,
            window.queue_len,
            window.span,
            window
                .error_message
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    if report.alert_mask.present {
        println!(
            "Alert mask:  {} cell(s) alerted{}",
            report.alert_mask.cells_alerted,
            if report.alert_mask.strictly_boolean {
                ""
            } else {
                "  (NOT BOOLEAN)"
            }
        );
    } else {
        println!("Alert mask:  not yet created");
    }
    println!(
        "Windows:     {}/{} ok ({} failed)",
        report.summary.windows_ok, report.summary.windows_total, report.summary.windows_failed
    );
    println!("===========================================================");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::Accumulator;
    use crate::model::EpochKey;
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
    fn test_fresh_state_verifies_as_empty() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let paths = StatePaths::new(dir.path());
        let report = verify_state(&paths);
        assert_eq!(report.summary.windows_failed, 0);
        assert!(report.windows.iter().all(|w| w.status == VerificationStatus::Empty));
        assert!(!report.alert_mask.present);
    }

    #[test]
    fn test_healthy_accumulator_state_passes() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let paths = StatePaths::new(dir.path());
        let mut acc = Accumulator::open(&paths).unwrap();
        for (i, hhmm) in ["0000", "0030", "0100"].iter().enumerate() {
            let key = EpochKey::parse(&format!("20150801-{}", hhmm)).unwrap();
            acc.ingest(&grid(i as f32 + 1.0), &key).unwrap();
            acc.persist().unwrap();
        }
        let report = verify_state(&paths);
        assert_eq!(report.summary.windows_failed, 0);
        let sum24 = report.windows.iter().find(|w| w.name == "sum24").unwrap();
        assert_eq!(sum24.sum_matches_queue, Some(true));
        assert_eq!(sum24.queue_len, 3);
    }

    #[test]
    fn test_tampered_running_sum_is_caught() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let paths = StatePaths::new(dir.path());
        let mut acc = Accumulator::open(&paths).unwrap();
        let key = EpochKey::parse("20150801-0000").unwrap();
        acc.ingest(&grid(1.0), &key).unwrap();
        acc.persist().unwrap();

        let sum_path = paths.window_dir("sum24").join("running_sum.asc");
        codec::write_grid(&sum_path, &grid(99.0)).unwrap();

        let report = verify_state(&paths);
        let sum24 = report.windows.iter().find(|w| w.name == "sum24").unwrap();
        assert_eq!(sum24.status, VerificationStatus::Failed);
        assert_eq!(sum24.sum_matches_queue, Some(false));
    }

    #[test]
    fn test_report_serializes_for_archival() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let report = verify_state(&StatePaths::new(dir.path()));
        let json = serde_json::to_string_pretty(&report).expect("report must serialize");
        let back: StateReport = serde_json::from_str(&json).expect("and round-trip");
        assert_eq!(back.summary.windows_total, 4);
    }
}
