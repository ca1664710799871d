/// Core data types for the landslide hazard monitoring service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O and no grid arithmetic — only identifiers, constants,
/// and the service-wide error type. Grid and footprint types live in
/// `raster`, which builds on the identifiers defined here.

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

// ---------------------------------------------------------------------------
// Window and threshold constants
// ---------------------------------------------------------------------------

/// Minutes covered by one precipitation epoch.
pub const EPOCH_MINUTES: i64 = 30;

/// Epochs in the 24-hour rolling window.
pub const SPAN_24H: usize = 48;

/// Epochs in the 48-hour rolling window.
pub const SPAN_48H: usize = 96;

/// Epochs in the 72-hour rolling window.
pub const SPAN_72H: usize = 144;

/// Epochs retained for the rolling-maximum window.
pub const SPAN_MAX: usize = 16;

/// 24-hour accumulation (native grid units) at which a cell enters alert.
pub const T_RAIN: f32 = 144.0;

/// Percent deviation from the historical-average grid above which a
/// diagnostic raster is emitted (observational side channel, not an alert).
pub const DEVIATION_DIAGNOSTIC_PCT: f32 = 1000.0;

/// Maximum number of historical scenes consulted during cloud backfill.
pub const BACKFILL_CAP: usize = 10;

/// Rolling-sum rasters retained per window output directory.
pub const OUTPUT_RETENTION: usize = 48;

// ---------------------------------------------------------------------------
// Spectral bands
// ---------------------------------------------------------------------------

/// The five bands carried by every scene.
///
/// `Pan` is delivered pre-registered to the multispectral footprint by the
/// acquisition side; the compositor treats any residual footprint mismatch
/// as fatal rather than resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BandId {
    /// Visible red — drives the reflectance-jump criterion.
    Red,
    /// Near infrared — numerator partner of the moisture index.
    Nir,
    /// Shortwave infrared — denominator partner of the moisture index.
    Swir,
    /// Panchromatic — brightness-percentile cloud screening.
    Pan,
    /// Per-pixel quality flags from the scene producer.
    Qa,
}

impl BandId {
    /// All bands, in the order scene files are named and read.
    pub const ALL: [BandId; 5] = [
        BandId::Red,
        BandId::Nir,
        BandId::Swir,
        BandId::Pan,
        BandId::Qa,
    ];

    /// Short code used in scene file names (matches the upstream product).
    pub fn code(self) -> &'static str {
        match self {
            BandId::Red => "B4",
            BandId::Nir => "B5",
            BandId::Swir => "B7",
            BandId::Pan => "B8",
            BandId::Qa => "BQA",
        }
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Epoch keys
// ---------------------------------------------------------------------------

/// Identifier of one half-hourly precipitation epoch: `YYYYMMDD-HHMM`
/// (UTC, start of the half hour).
///
/// The zero-padded format makes lexicographic order equal chronological
/// order, so keys can be compared and sorted as strings. The queue
/// directories and the "most recently processed" marker rely on this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochKey(String);

impl EpochKey {
    /// Parses and validates a key. The minute must be 00 or 30.
    pub fn parse(s: &str) -> Result<Self, MonitorError> {
        let bad = |why: &str| MonitorError::Acquisition(format!("bad epoch key '{}': {}", s, why));
        if s.len() != 13 {
            return Err(bad("expected 13 characters (YYYYMMDD-HHMM)"));
        }
        let (date_part, rest) = s.split_at(8);
        let (dash, time_part) = rest.split_at(1);
        if dash != "-" {
            return Err(bad("expected '-' separator"));
        }
        if !date_part.chars().all(|c| c.is_ascii_digit())
            || !time_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(bad("expected digits"));
        }
        let stamp = format!("{} {}", date_part, time_part);
        let parsed = NaiveDateTime::parse_from_str(&stamp, "%Y%m%d %H%M")
            .map_err(|e| bad(&e.to_string()))?;
        if !matches!(parsed.format("%M").to_string().as_str(), "00" | "30") {
            return Err(bad("minute must be 00 or 30"));
        }
        Ok(EpochKey(s.to_string()))
    }

    /// Builds the key for the half-hour starting at `start`.
    pub fn from_datetime(start: NaiveDateTime) -> Self {
        EpochKey(start.format("%Y%m%d-%H%M").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar date of the epoch (used for the daily bucket).
    pub fn date(&self) -> NaiveDate {
        // Infallible by construction: parse() and from_datetime() only ever
        // store a valid YYYYMMDD prefix.
        NaiveDate::parse_from_str(&self.0[..8], "%Y%m%d").unwrap_or_default()
    }

    /// True for the 23:30 epoch, which closes out the calendar day.
    pub fn is_last_of_day(&self) -> bool {
        self.0.ends_with("-2330")
    }
}

impl fmt::Display for EpochKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a monitoring run.
///
/// Every variant is fatal to the current run; none is retried internally.
/// Notification delivery failures are deliberately *not* represented here —
/// they are logged as warnings and the run continues (see `alert::notify`).
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// The acquisition service was unreachable or a payload was missing
    /// or malformed. No state has been mutated.
    Acquisition(String),
    /// An incoming grid's geometry disagrees with the established window or
    /// scene geometry. Configuration-level; never silently reconciled.
    FootprintMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    /// A persisted window/mask file was unreadable or malformed. The run
    /// must not substitute a default state: doing so would silently
    /// discard accumulated history.
    StateCorruption { path: String, reason: String },
    /// A gridded file could not be read or written.
    Codec { path: String, reason: String },
    /// The run configuration file or environment was invalid.
    Config(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Acquisition(msg) => write!(f, "acquisition failed: {}", msg),
            MonitorError::FootprintMismatch {
                context,
                expected,
                actual,
            } => write!(
                f,
                "footprint mismatch in {}: expected {}, got {}",
                context, expected, actual
            ),
            MonitorError::StateCorruption { path, reason } => {
                write!(f, "persisted state corrupt at {}: {}", path, reason)
            }
            MonitorError::Codec { path, reason } => {
                write!(f, "raster codec error at {}: {}", path, reason)
            }
            MonitorError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_epoch_key_round_trips_through_datetime() {
        let dt = NaiveDate::from_ymd_opt(2015, 8, 1)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let key = EpochKey::from_datetime(dt);
        assert_eq!(key.as_str(), "20150801-1430");
        assert_eq!(EpochKey::parse("20150801-1430").unwrap(), key);
    }

    #[test]
    fn test_epoch_key_order_is_chronological() {
        let a = EpochKey::parse("20150801-2330").unwrap();
        let b = EpochKey::parse("20150802-0000").unwrap();
        assert!(a < b, "lexicographic order must match time order");
    }

    #[test]
    fn test_epoch_key_rejects_off_schedule_minutes() {
        assert!(EpochKey::parse("20150801-1415").is_err());
        assert!(EpochKey::parse("20150801-14300").is_err());
        assert!(EpochKey::parse("2015-08-01T14").is_err());
    }

    #[test]
    fn test_epoch_key_date_and_day_seal() {
        let key = EpochKey::parse("20150801-2330").unwrap();
        assert_eq!(key.date(), NaiveDate::from_ymd_opt(2015, 8, 1).unwrap());
        assert!(key.is_last_of_day());
        assert!(!EpochKey::parse("20150801-2300").unwrap().is_last_of_day());
    }

    #[test]
    fn test_spans_are_consistent_with_epoch_length() {
        // 48 half-hour epochs == 24 hours, and so on up the windows.
        assert_eq!(SPAN_24H as i64 * EPOCH_MINUTES, 24 * 60);
        assert_eq!(SPAN_48H as i64 * EPOCH_MINUTES, 48 * 60);
        assert_eq!(SPAN_72H as i64 * EPOCH_MINUTES, 72 * 60);
    }

    #[test]
    fn test_band_codes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for band in BandId::ALL {
            assert!(seen.insert(band.code()), "duplicate band code {}", band);
        }
    }
}
