/// Region registry for the hazard monitoring service.
///
/// Defines the canonical study region — its precipitation grid window and
/// the orbital paths/rows whose scenes cover it — along with the 16-day
/// acquisition cycle that says which path is observed on which day.
/// This is the single source of truth for footprints and path/row codes;
/// other modules should reference the registry rather than hardcoding them.

use chrono::NaiveDate;

use crate::raster::Footprint;

// ---------------------------------------------------------------------------
// Study region
// ---------------------------------------------------------------------------

/// EPSG code of the half-hourly precipitation product (geographic).
pub const PRECIP_EPSG: u32 = 4326;

/// EPSG code of the optical scenes over the region (projected, UTM 45N).
pub const SCENE_EPSG: u32 = 32645;

/// The monitored region: the central Himalayan front, where monsoon
/// rainfall and steep terrain combine into the highest landslide exposure.
pub struct Region {
    pub name: &'static str,
    /// Western and eastern bounds, degrees east.
    pub lon_bounds: (f64, f64),
    /// Southern and northern bounds, degrees north.
    pub lat_bounds: (f64, f64),
    /// Precipitation grid pixel size, degrees.
    pub precip_pixel_deg: f64,
    /// File stem of the precomputed slope-exceedance mask (slope > 15 deg)
    /// expected in the state directory.
    pub slope_mask_file: &'static str,
}

pub static REGION: Region = Region {
    name: "Central Himalaya",
    lon_bounds: (80.0, 88.3),
    lat_bounds: (26.3, 30.5),
    precip_pixel_deg: 0.1,
    slope_mask_file: "slope_over15.asc",
};

impl Region {
    /// Footprint every incoming precipitation epoch must match. The
    /// accumulator treats any disagreement as a configuration error.
    pub fn precip_footprint(&self) -> Footprint {
        let cols = ((self.lon_bounds.1 - self.lon_bounds.0) / self.precip_pixel_deg).round() as usize;
        let rows = ((self.lat_bounds.1 - self.lat_bounds.0) / self.precip_pixel_deg).round() as usize;
        Footprint {
            origin_x: self.lon_bounds.0,
            origin_y: self.lat_bounds.1,
            pixel_width: self.precip_pixel_deg,
            pixel_height: -self.precip_pixel_deg,
            rows,
            cols,
            epsg: PRECIP_EPSG,
        }
    }
}

// ---------------------------------------------------------------------------
// Scene acquisition cycle
// ---------------------------------------------------------------------------

/// First day of a known acquisition cycle; offsets below count from here.
pub const CYCLE_START: (i32, u32, u32) = (2015, 6, 8);

/// Length of the repeat cycle in days.
pub const CYCLE_DAYS: i64 = 16;

/// One orbital path crossing the region, with the rows that cover it.
pub struct ScenePath {
    /// Three-digit path code.
    pub path: &'static str,
    /// Day offset within the repeat cycle on which this path is observed.
    pub cycle_offset: i64,
    /// Row codes imaged on this path, north to south.
    pub rows: &'static [&'static str],
    pub description: &'static str,
}

/// All paths covering the region, ordered by cycle offset. Days whose
/// offset is absent here have no overpass — a normal "nothing new" exit
/// for the scene pipeline.
pub static SCENE_PATHS: &[ScenePath] = &[
    ScenePath {
        path: "142",
        cycle_offset: 0,
        rows: &["40", "41"],
        description: "Central corridor over the Kathmandu valley and the \
                      adjoining mid-hills; the most landslide-active strip.",
    },
    ScenePath {
        path: "140",
        cycle_offset: 2,
        rows: &["41"],
        description: "Eastern foothills; single row reaches the monitored front.",
    },
    ScenePath {
        path: "143",
        cycle_offset: 7,
        rows: &["39", "40", "41"],
        description: "Western coverage, three rows spanning high Himalaya \
                      down to the Terai margin.",
    },
    ScenePath {
        path: "141",
        cycle_offset: 9,
        rows: &["40", "41"],
        description: "East-central corridor between paths 140 and 142.",
    },
    ScenePath {
        path: "139",
        cycle_offset: 11,
        rows: &["41"],
        description: "Far-eastern edge of the study region.",
    },
    ScenePath {
        path: "144",
        cycle_offset: 14,
        rows: &["39", "40"],
        description: "Far-western edge; row 41 falls outside the region here.",
    },
];

fn cycle_start_date() -> NaiveDate {
    let (y, m, d) = CYCLE_START;
    // Compile-time constant; always a valid calendar date.
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// The path observed on `date`, or `None` when no path crosses the region
/// that day.
pub fn path_for_date(date: NaiveDate) -> Option<&'static ScenePath> {
    let offset = (date - cycle_start_date()).num_days().rem_euclid(CYCLE_DAYS);
    SCENE_PATHS.iter().find(|p| p.cycle_offset == offset)
}

/// Looks up a path by its code.
pub fn find_path(path: &str) -> Option<&'static ScenePath> {
    SCENE_PATHS.iter().find(|p| p.path == path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
