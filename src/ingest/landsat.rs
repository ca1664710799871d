/// Scene acquisition and the local scene library.
///
/// The scene service publishes, per path/row, a listing of scene ids and
/// one gridded document per band. Downloads land in the library's
/// `current/` slot; the historical backfill stock and the promoted
/// reference composite live beside it:
///
/// ```text
/// scenes/<path>/<row>/
///   current/<id>_<band>.asc      today's overpass, five bands
///   historic/<id>_<band>.asc     backfill stock, many scenes
///   reference/<id>_<band>.asc    the previously promoted composite
/// ```
///
/// After a successful detection run the composite is promoted: it becomes
/// the new reference, the current scene moves into the historic stock, and
/// the oldest historic scene beyond the configured depth is evicted.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::composite::{CompositeResult, Scene};
use crate::model::{BandId, MonitorError};
use crate::state;

// ---------------------------------------------------------------------------
// Scene ids and URLs
// ---------------------------------------------------------------------------

/// Scene identifier: `<path>_<row>_<YYYYMMDD>`. Lexicographic order within
/// one path/row equals capture order.
pub fn scene_id(path: &str, row: &str, date: NaiveDate) -> String {
    format!("{}_{}_{}", path, row, date.format("%Y%m%d"))
}

/// Capture date embedded in a scene id.
pub fn scene_date(id: &str) -> Result<NaiveDate, MonitorError> {
    let stamp = id.rsplit('_').next().ok_or_else(|| {
        MonitorError::Acquisition(format!("malformed scene id '{}'", id))
    })?;
    NaiveDate::parse_from_str(stamp, "%Y%m%d")
        .map_err(|e| MonitorError::Acquisition(format!("malformed scene id '{}': {}", id, e)))
}

pub fn build_listing_url(base: &str, path: &str, row: &str) -> String {
    format!("{}/listing/{}_{}.txt", base, path, row)
}

pub fn build_band_url(base: &str, id: &str, band: BandId) -> String {
    format!("{}/scenes/{}_{}.asc", base, id, band.code())
}

// ---------------------------------------------------------------------------
// Remote client
// ---------------------------------------------------------------------------

/// The newest scene id published for a path/row, if any.
pub fn latest_scene_id(
    client: &reqwest::blocking::Client,
    base: &str,
    path: &str,
    row: &str,
) -> Result<Option<String>, MonitorError> {
    let url = build_listing_url(base, path, row);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| MonitorError::Acquisition(format!("scene listing request failed: {}", e)))?;
    if response.status().as_u16() == 404 {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(MonitorError::Acquisition(format!(
            "HTTP {} from scene listing {}",
            response.status(),
            url
        )));
    }
    let text = response
        .text()
        .map_err(|e| MonitorError::Acquisition(format!("scene listing read failed: {}", e)))?;
    let mut ids: Vec<String> = text
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && scene_date(l).is_ok())
        .collect();
    ids.sort();
    Ok(ids.pop())
}

/// Downloads all five bands of a scene into `dest`, validating each
/// payload through the codec on the way in.
pub fn fetch_scene(
    client: &reqwest::blocking::Client,
    base: &str,
    id: &str,
    dest: &Path,
) -> Result<(), MonitorError> {
    for band in BandId::ALL {
        let url = build_band_url(base, id, band);
        let response = client
            .get(&url)
            .send()
            .map_err(|e| MonitorError::Acquisition(format!("band request failed: {}", e)))?;
        if response.status().as_u16() == 404 {
            return Err(MonitorError::Acquisition(format!(
                "no scene published: band {} missing for {}",
                band, id
            )));
        }
        if !response.status().is_success() {
            return Err(MonitorError::Acquisition(format!(
                "HTTP {} from band {}",
                response.status(),
                url
            )));
        }
        let text = response
            .text()
            .map_err(|e| MonitorError::Acquisition(format!("band read failed: {}", e)))?;
        let grid = codec::parse_grid(&text, Path::new(&url), None)?;
        codec::write_grid(&dest.join(format!("{}_{}.asc", id, band.code())), &grid)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scene library
// ---------------------------------------------------------------------------

pub struct SceneLibrary {
    root: PathBuf,
}

impl SceneLibrary {
    pub fn open(root: &Path) -> SceneLibrary {
        SceneLibrary {
            root: root.to_path_buf(),
        }
    }

    pub fn current_dir(&self, path: &str, row: &str) -> PathBuf {
        self.root.join(path).join(row).join("current")
    }

    pub fn historic_dir(&self, path: &str, row: &str) -> PathBuf {
        self.root.join(path).join(row).join("historic")
    }

    pub fn reference_dir(&self, path: &str, row: &str) -> PathBuf {
        self.root.join(path).join(row).join("reference")
    }

    /// Scene ids present in a directory, oldest first.
    fn scene_ids(dir: &Path) -> Result<Vec<String>, MonitorError> {
        let mut ids = BTreeSet::new();
        for file in state::list_grid_files(dir)? {
            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            // <path>_<row>_<date>_<band>
            if let Some(id) = stem.rsplit_once('_').map(|(id, _)| id.to_string()) {
                if scene_date(&id).is_ok() {
                    ids.insert(id);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    fn load_scene(dir: &Path, id: &str) -> Result<Scene, MonitorError> {
        let mut bands = BTreeMap::new();
        for band in BandId::ALL {
            let path = dir.join(format!("{}_{}.asc", id, band.code()));
            if !path.exists() {
                return Err(MonitorError::Acquisition(format!(
                    "scene {} is missing band {} on disk",
                    id, band
                )));
            }
            bands.insert(band, codec::read_grid(&path)?);
        }
        Ok(Scene {
            id: id.to_string(),
            captured: scene_date(id)?,
            bands,
        })
    }

    /// The newest scene in the current slot, if one has been downloaded.
    pub fn load_current(&self, path: &str, row: &str) -> Result<Option<Scene>, MonitorError> {
        let dir = self.current_dir(path, row);
        let ids = Self::scene_ids(&dir)?;
        match ids.last() {
            Some(id) => Ok(Some(Self::load_scene(&dir, id)?)),
            None => Ok(None),
        }
    }

    /// All historic scenes, nearest in time first — the backfill order.
    pub fn load_historicals(&self, path: &str, row: &str) -> Result<Vec<Scene>, MonitorError> {
        let dir = self.historic_dir(path, row);
        let mut ids = Self::scene_ids(&dir)?;
        ids.reverse();
        ids.iter().map(|id| Self::load_scene(&dir, id)).collect()
    }

    /// The promoted reference composite from the previous cycle.
    pub fn load_reference(&self, path: &str, row: &str) -> Result<Option<Scene>, MonitorError> {
        let dir = self.reference_dir(path, row);
        let ids = Self::scene_ids(&dir)?;
        match ids.last() {
            Some(id) => Ok(Some(Self::load_scene(&dir, id)?)),
            None => Ok(None),
        }
    }

    /// Promotes a finished composite: it becomes the reference for the
    /// next cycle, the current scene joins the historic stock, and the
    /// stock is trimmed back to `depth` scenes.
    pub fn promote(
        &self,
        path: &str,
        row: &str,
        scene_id: &str,
        composite: &CompositeResult,
        depth: usize,
    ) -> Result<(), MonitorError> {
        // New reference replaces the old one.
        let reference_dir = self.reference_dir(path, row);
        for id in Self::scene_ids(&reference_dir)? {
            Self::remove_scene(&reference_dir, &id)?;
        }
        for (band, grid) in &composite.bands {
            codec::write_grid(
                &reference_dir.join(format!("{}_{}.asc", scene_id, band.code())),
                grid,
            )?;
        }

        // Current scene moves into the historic stock.
        let current_dir = self.current_dir(path, row);
        let historic_dir = self.historic_dir(path, row);
        fs::create_dir_all(&historic_dir).map_err(|e| MonitorError::StateCorruption {
            path: historic_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        for file in state::list_grid_files(&current_dir)? {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let target = historic_dir.join(&name);
            fs::rename(&file, &target).map_err(|e| MonitorError::StateCorruption {
                path: file.display().to_string(),
                reason: e.to_string(),
            })?;
            let prj = file.with_extension("prj");
            if prj.exists() {
                let _ = fs::rename(&prj, target.with_extension("prj"));
            }
        }

        // Evict the oldest scenes beyond the stock depth.
        let ids = Self::scene_ids(&historic_dir)?;
        if ids.len() > depth {
            for id in &ids[..ids.len() - depth] {
                Self::remove_scene(&historic_dir, id)?;
            }
        }
        Ok(())
    }

    fn remove_scene(dir: &Path, id: &str) -> Result<(), MonitorError> {
        for band in BandId::ALL {
            let path = dir.join(format!("{}_{}.asc", id, band.code()));
            if path.exists() {
                codec::remove_grid(&path)?;
            }
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
    use crate::raster::{Footprint, Grid};
    use ndarray::Array2;

    fn footprint() -> Footprint {
        Footprint {
            origin_x: 300000.0,
            origin_y: 3100000.0,
            pixel_width: 30.0,
            pixel_height: -30.0,
            rows: 2,
            cols: 2,
            epsg: 32645,
        }
    }

    fn write_scene(dir: &Path, id: &str, value: f32) {
        for band in BandId::ALL {
            let grid = Grid::new(Array2::from_elem((2, 2), value), footprint()).unwrap();
            codec::write_grid(&dir.join(format!("{}_{}.asc", id, band.code())), &grid).unwrap();
        }
    }

    #[test]
    fn test_scene_id_embeds_capture_date() {
        let date = NaiveDate::from_ymd_opt(2015, 8, 20).unwrap();
        let id = scene_id("142", "41", date);
        assert_eq!(id, "142_41_20150820");
        assert_eq!(scene_date(&id).unwrap(), date);
        assert!(scene_date("142_41_notadate").is_err());
    }

    #[test]
    fn test_library_loads_historicals_nearest_first() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let library = SceneLibrary::open(dir.path());
        let historic = library.historic_dir("142", "41");
        write_scene(&historic, "142_41_20150601", 1.0);
        write_scene(&historic, "142_41_20150804", 3.0);
        write_scene(&historic, "142_41_20150703", 2.0);

        let scenes = library.load_historicals("142", "41").unwrap();
        let ids: Vec<&str> = scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["142_41_20150804", "142_41_20150703", "142_41_20150601"],
            "backfill consults the nearest scene first"
        );
    }

    #[test]
    fn test_missing_band_on_disk_is_reported() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let library = SceneLibrary::open(dir.path());
        let current = library.current_dir("142", "41");
        write_scene(&current, "142_41_20150820", 1.0);
        std::fs::remove_file(current.join("142_41_20150820_B7.asc")).unwrap();
        let err = library.load_current("142", "41").unwrap_err();
        assert!(matches!(err, MonitorError::Acquisition(_)));
    }

    #[test]
    fn test_promote_rotates_current_into_historic_and_evicts() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let library = SceneLibrary::open(dir.path());
        let historic = library.historic_dir("142", "41");
        for day in ["20150601", "20150617", "20150703"] {
            write_scene(&historic, &format!("142_41_{}", day), 1.0);
        }
        write_scene(&library.current_dir("142", "41"), "142_41_20150820", 9.0);

        // Promote a composite built from the current scene, stock depth 3.
        let current = library.load_current("142", "41").unwrap().unwrap();
        let result = crate::composite::composite(&current, &[], 10).unwrap();
        library
            .promote("142", "41", "142_41_20150820", &result, 3)
            .unwrap();

        let reference = library.load_reference("142", "41").unwrap().unwrap();
        assert_eq!(reference.id, "142_41_20150820");

        let ids: Vec<String> = SceneLibrary::scene_ids(&historic).unwrap();
        assert_eq!(
            ids,
            vec![
                "142_41_20150617".to_string(),
                "142_41_20150703".to_string(),
                "142_41_20150820".to_string()
            ],
            "oldest stock scene evicted, current scene joined"
        );
        assert!(library.load_current("142", "41").unwrap().is_none());
    }
}
