/// Half-hourly precipitation acquisition client.
///
/// The service publishes one regional grid per half hour and a monthly
/// listing of available payload names. A run asks for every key newer
/// than the "most recently processed" marker; when the marker is older
/// than the current month's listing, the walk continues into previous
/// months' listings until the marker is found.
///
/// The raw payload carries a precipitation *rate* in units per hour;
/// `decode_payload` halves it into the per-epoch accumulation depth before
/// anything downstream sees the grid.

use chrono::{Datelike, NaiveDate};
use std::path::Path;

use crate::codec;
use crate::model::{EpochKey, MonitorError};
use crate::raster::{Footprint, Grid};

/// Months of listings consulted before giving up on finding the marker.
const MAX_MONTHS_BACK: u32 = 3;

const PAYLOAD_PREFIX: &str = "precip_";
const PAYLOAD_SUFFIX: &str = ".asc";

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Listing of payload names published during a month (`YYYYMM`).
pub fn build_listing_url(base: &str, yyyymm: &str) -> String {
    format!("{}/listing/{}.txt", base, yyyymm)
}

pub fn build_payload_url(base: &str, key: &EpochKey) -> String {
    format!("{}/grids/{}{}{}", base, PAYLOAD_PREFIX, key, PAYLOAD_SUFFIX)
}

// ---------------------------------------------------------------------------
// Listing handling
// ---------------------------------------------------------------------------

/// Extracts epoch keys from a listing document. Lines may be bare names
/// or full paths; entries that are not payload names are skipped.
pub fn parse_listing(text: &str) -> Vec<EpochKey> {
    let mut keys: Vec<EpochKey> = text
        .lines()
        .filter_map(|line| {
            let name = line.trim().rsplit('/').next()?;
            let stem = name.strip_prefix(PAYLOAD_PREFIX)?.strip_suffix(PAYLOAD_SUFFIX)?;
            EpochKey::parse(stem).ok()
        })
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Splits a month's (sorted) listing against the marker: the keys to
/// process from it, and whether the marker epoch lies within or before
/// this month (meaning the backwards walk can stop).
pub fn keys_after_marker(listing: &[EpochKey], marker: &EpochKey) -> (Vec<EpochKey>, bool) {
    let newer: Vec<EpochKey> = listing.iter().filter(|k| *k > marker).cloned().collect();
    let reached = listing.iter().any(|k| k <= marker);
    (newer, reached)
}

fn fetch_listing(
    client: &reqwest::blocking::Client,
    base: &str,
    yyyymm: &str,
) -> Result<Vec<EpochKey>, MonitorError> {
    let url = build_listing_url(base, yyyymm);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| MonitorError::Acquisition(format!("listing request failed: {}", e)))?;
    if response.status().as_u16() == 404 {
        // A month with no listing yet (or archived away) is simply empty.
        return Ok(Vec::new());
    }
    if !response.status().is_success() {
        return Err(MonitorError::Acquisition(format!(
            "HTTP {} from listing {}",
            response.status(),
            url
        )));
    }
    let text = response
        .text()
        .map_err(|e| MonitorError::Acquisition(format!("listing read failed: {}", e)))?;
    Ok(parse_listing(&text))
}

fn previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Every key newer than the marker, oldest first, walking month listings
/// backwards until the marker's month is reached.
///
/// With no marker (first run) only the single newest key is returned:
/// there is no history to catch up on, and processing an arbitrary amount
/// of backlog on a fresh install would skew the young windows.
pub fn new_keys_since(
    client: &reqwest::blocking::Client,
    base: &str,
    marker: Option<&EpochKey>,
    today: NaiveDate,
) -> Result<Vec<EpochKey>, MonitorError> {
    let mut month = today.with_day(1).unwrap_or(today);
    let mut collected: Vec<EpochKey> = Vec::new();

    for _ in 0..MAX_MONTHS_BACK {
        let listing = fetch_listing(client, base, &month.format("%Y%m").to_string())?;
        match marker {
            None => {
                if let Some(latest) = listing.last() {
                    return Ok(vec![latest.clone()]);
                }
            }
            Some(marker) => {
                let (newer, reached) = keys_after_marker(&listing, marker);
                // This month is older than anything collected so far.
                let mut merged = newer;
                merged.extend(collected);
                collected = merged;
                if reached {
                    return Ok(collected);
                }
            }
        }
        month = previous_month(month);
    }

    match marker {
        Some(marker) => Err(MonitorError::Acquisition(format!(
            "marker {} not found within {} months of listings; refusing to guess the gap",
            marker, MAX_MONTHS_BACK
        ))),
        None => Ok(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Payload handling
// ---------------------------------------------------------------------------

/// Parses a raw payload document and converts the half-hourly rate into
/// an accumulation depth (rate / 2).
pub fn decode_payload(
    text: &str,
    label: &Path,
    expected: &Footprint,
) -> Result<Grid, MonitorError> {
    let grid = codec::parse_grid(text, label, None)?;
    if !grid.footprint.approx_eq(expected) {
        return Err(MonitorError::FootprintMismatch {
            context: "precipitation payload".to_string(),
            expected: expected.to_string(),
            actual: grid.footprint.to_string(),
        });
    }
    Ok(grid.map_cells(|v| v / 2.0))
}

/// Fetches and decodes one epoch's grid.
pub fn fetch_epoch(
    client: &reqwest::blocking::Client,
    base: &str,
    key: &EpochKey,
    expected: &Footprint,
) -> Result<Grid, MonitorError> {
    let url = build_payload_url(base, key);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| MonitorError::Acquisition(format!("payload request failed: {}", e)))?;
    if response.status().as_u16() == 404 {
        return Err(MonitorError::Acquisition(format!(
            "payload not found for {}",
            key
        )));
    }
    if !response.status().is_success() {
        return Err(MonitorError::Acquisition(format!(
            "HTTP {} from payload {}",
            response.status(),
            url
        )));
    }
    let text = response
        .text()
        .map_err(|e| MonitorError::Acquisition(format!("payload read failed: {}", e)))?;
    decode_payload(&text, Path::new(&url), expected)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::REGION;

    #[test]
    fn test_parse_listing_handles_paths_and_junk() {
        let text = "\
            /pub/2015/precip_20150801-0000.asc\n\
            precip_20150801-0030.asc\n\
            \n\
            readme.txt\n\
            precip_not-a-key.asc\n\
            precip_20150801-0100.asc\n";
        let keys = parse_listing(text);
        let strs: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            strs,
            vec!["20150801-0000", "20150801-0030", "20150801-0100"]
        );
    }

    #[test]
    fn test_parse_listing_sorts_and_dedups() {
        let text = "precip_20150801-0030.asc\nprecip_20150801-0000.asc\nprecip_20150801-0030.asc\n";
        let keys = parse_listing(text);
        assert_eq!(keys.len(), 2);
        assert!(keys[0] < keys[1]);
    }

    #[test]
    fn test_keys_after_marker_splits_correctly() {
        let listing = parse_listing(
            "precip_20150801-0000.asc\nprecip_20150801-0030.asc\nprecip_20150801-0100.asc\n",
        );
        let marker = EpochKey::parse("20150801-0030").unwrap();
        let (newer, reached) = keys_after_marker(&listing, &marker);
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].as_str(), "20150801-0100");
        assert!(reached, "marker's epoch is inside this listing");
    }

    #[test]
    fn test_keys_after_marker_when_whole_month_is_newer() {
        let listing = parse_listing("precip_20150901-0000.asc\n");
        let marker = EpochKey::parse("20150815-1200").unwrap();
        let (newer, reached) = keys_after_marker(&listing, &marker);
        assert_eq!(newer.len(), 1);
        assert!(!reached, "walk must continue into the previous month");
    }

    #[test]
    fn test_decode_payload_halves_rate_into_depth() {
        let footprint = REGION.precip_footprint();
        let grid = Grid::zeros(&footprint).map_cells(|_| 3.0);
        let text = codec::format_grid(&grid);
        let decoded = decode_payload(&text, Path::new("payload"), &footprint).unwrap();
        assert!(decoded.data.iter().all(|v| (*v - 1.5).abs() < 1e-6));
    }

    #[test]
    fn test_decode_payload_rejects_foreign_footprint() {
        let mut wrong = REGION.precip_footprint();
        wrong.origin_x += 5.0;
        let grid = Grid::zeros(&wrong);
        let text = codec::format_grid(&grid);
        let err = decode_payload(&text, Path::new("payload"), &REGION.precip_footprint())
            .unwrap_err();
        assert!(matches!(err, MonitorError::FootprintMismatch { .. }));
    }

    #[test]
    fn test_url_builders() {
        let key = EpochKey::parse("20150801-0230").unwrap();
        assert_eq!(
            build_payload_url("https://svc/precip", &key),
            "https://svc/precip/grids/precip_20150801-0230.asc"
        );
        assert_eq!(
            build_listing_url("https://svc/precip", "201508"),
            "https://svc/precip/listing/201508.txt"
        );
    }
}
