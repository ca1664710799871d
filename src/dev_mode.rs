/// Development mode utilities for working with historical data
///
/// When the live precipitation service is unavailable, use this module to
/// replay archived payload files for testing and development. The archive
/// directory holds raw payload documents exactly as the service would
/// deliver them (`precip_<key>.asc`), so the rest of the pipeline —
/// decode, windowing, alerting — runs unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::gpm;
use crate::model::{EpochKey, MonitorError};
use crate::raster::{Footprint, Grid};
use crate::state;

/// Replays archived epoch payloads in place of the remote service.
pub struct ReplaySource {
    archive_dir: PathBuf,
}

impl ReplaySource {
    pub fn new(archive_dir: &Path) -> ReplaySource {
        ReplaySource {
            archive_dir: archive_dir.to_path_buf(),
        }
    }

    /// Keys newer than the marker present in the archive, oldest first.
    /// With no marker, the whole archive replays from the beginning —
    /// unlike the live source, replay exists precisely to rebuild state.
    pub fn new_keys_since(
        &self,
        marker: Option<&EpochKey>,
    ) -> Result<Vec<EpochKey>, MonitorError> {
        let mut keys = Vec::new();
        for file in state::list_grid_files(&self.archive_dir)? {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let Some(stem) = name.strip_prefix("precip_").and_then(|n| n.strip_suffix(".asc"))
            else {
                continue;
            };
            let key = EpochKey::parse(stem)?;
            if marker.map(|m| &key > m).unwrap_or(true) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Loads and decodes one archived epoch, exactly as the live client
    /// would.
    pub fn load_epoch(&self, key: &EpochKey, expected: &Footprint) -> Result<Grid, MonitorError> {
        let path = self.archive_dir.join(format!("precip_{}.asc", key));
        let text = fs::read_to_string(&path).map_err(|e| {
            MonitorError::Acquisition(format!("payload not found for {}: {}", key, e))
        })?;
        gpm::decode_payload(&text, &path, expected)
    }
}
