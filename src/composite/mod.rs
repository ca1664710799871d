/// Scene compositing: cloud-free reconstruction of the current overpass.
///
/// The current scene's obscured cells are backfilled from a ranked list of
/// historical scenes of the same footprint, nearest in time first, up to a
/// fixed cap. A cell is only ever filled from a historical scene if it is
/// obscured in the current scene AND clear in that historical scene; a
/// cell no scene ever clears stays zero in the output, and the detector
/// discounts it via the unresolved mask.
///
/// The nearest-first order favors temporal proximity over exhaustiveness;
/// choosing by global cloud cover instead is a known alternative that was
/// deliberately not adopted (see DESIGN.md).
///
/// Submodules:
/// - `cloud` — per-scene cloud mask derivation.

pub mod cloud;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{BandId, MonitorError};
use crate::raster::{self, Footprint, Grid};

/// One multi-band scene: bands, capture date, and (implicitly) the common
/// footprint all its bands share.
#[derive(Debug)]
pub struct Scene {
    pub id: String,
    pub captured: NaiveDate,
    pub bands: BTreeMap<BandId, Grid>,
}

impl Scene {
    pub fn band(&self, id: BandId) -> Result<&Grid, MonitorError> {
        self.bands.get(&id).ok_or_else(|| {
            MonitorError::Acquisition(format!("scene {} is missing band {}", self.id, id))
        })
    }

    /// The footprint shared by every band. The panchromatic band arrives
    /// pre-registered to the multispectral grid; any residual disagreement
    /// here is fatal, never resampled away.
    pub fn footprint(&self) -> Result<&Footprint, MonitorError> {
        let reference = self.band(BandId::Red)?;
        for id in BandId::ALL {
            let band = self.band(id)?;
            if !band.footprint.approx_eq(&reference.footprint) {
                return Err(MonitorError::FootprintMismatch {
                    context: format!("scene {} band {}", self.id, id),
                    expected: reference.footprint.to_string(),
                    actual: band.footprint.to_string(),
                });
            }
        }
        Ok(&reference.footprint)
    }

    fn cropped_bands(&self, target: &Footprint) -> Result<BTreeMap<BandId, Grid>, MonitorError> {
        let mut out = BTreeMap::new();
        for id in BandId::ALL {
            out.insert(id, self.band(id)?.crop(target)?);
        }
        Ok(out)
    }
}

/// Output of one compositing run.
pub struct CompositeResult {
    /// All five bands over the intersection footprint, cloud-backfilled.
    pub bands: BTreeMap<BandId, Grid>,
    /// The intersection footprint everything was cropped to.
    pub footprint: Footprint,
    /// Cells still obscured after the backfill (1 = unresolved).
    pub unresolved: Grid,
    /// Historical scenes actually consulted.
    pub scenes_used: usize,
}

/// Builds the cloud-free composite of `current`, consulting at most `cap`
/// of the `historicals` (which the caller supplies nearest-in-time first).
pub fn composite(
    current: &Scene,
    historicals: &[Scene],
    cap: usize,
) -> Result<CompositeResult, MonitorError> {
    // Tightest common box across every input, then crop before any
    // arithmetic — grids of differing footprints never mix.
    let mut footprints = vec![current.footprint()?];
    for scene in historicals {
        footprints.push(scene.footprint()?);
    }
    let common = raster::intersection(&footprints)?;

    let mut bands = current.cropped_bands(&common)?;
    let current_mask = cloud::cloud_mask(
        bands
            .get(&BandId::Qa)
            .ok_or_else(|| MonitorError::Acquisition("current scene lost QA band".to_string()))?,
        bands
            .get(&BandId::Pan)
            .ok_or_else(|| MonitorError::Acquisition("current scene lost pan band".to_string()))?,
    )?;

    // Obscured cells start from zero; clear cells keep today's values.
    for grid in bands.values_mut() {
        grid.data.zip_mut_with(&current_mask.data, |v, &m| {
            if m == 1.0 {
                *v = 0.0;
            }
        });
    }
    let mut unresolved = current_mask;

    let mut scenes_used = 0;
    for scene in historicals.iter().take(cap) {
        if unresolved.count_nonzero() == 0 {
            break;
        }
        scenes_used += 1;
        let hist_bands = scene.cropped_bands(&common)?;
        let hist_mask = cloud::cloud_mask(
            hist_bands
                .get(&BandId::Qa)
                .ok_or_else(|| MonitorError::Acquisition(format!("scene {} lost QA band", scene.id)))?,
            hist_bands
                .get(&BandId::Pan)
                .ok_or_else(|| MonitorError::Acquisition(format!("scene {} lost pan band", scene.id)))?,
        )?;

        // Fillable: still unresolved here, clear in this historical scene.
        let mut fillable = unresolved.clone();
        fillable.data.zip_mut_with(&hist_mask.data, |f, &h| {
            if h == 1.0 {
                *f = 0.0;
            }
        });
        if fillable.count_nonzero() == 0 {
            continue;
        }

        for (id, grid) in bands.iter_mut() {
            let hist = hist_bands
                .get(id)
                .ok_or_else(|| MonitorError::Acquisition(format!("scene {} lost band {}", scene.id, id)))?;
            for ((row, col), flag) in fillable.data.indexed_iter() {
                if *flag == 1.0 {
                    grid.data[[row, col]] = hist.data[[row, col]];
                }
            }
        }
        unresolved.data.zip_mut_with(&fillable.data, |u, &f| {
            if f == 1.0 {
                *u = 0.0;
            }
        });
    }

    Ok(CompositeResult {
        bands,
        footprint: common,
        unresolved,
        scenes_used,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
