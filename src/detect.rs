/// Change detection between the cloud-free composite and the historical
/// reference scene.
///
/// Three independent boolean criteria are computed on the common footprint
/// and summed per cell: a moisture-class transition, a bounded jump in red
/// reflectance, and the static steep-slope gate. Cells the compositor
/// could not resolve are discounted by one so corrupted input can never
/// reach full confidence. A 3x3 neighbor-density filter then drops
/// isolated single-cell artifacts — it changes acceptance, not values.
/// A detection raster is emitted only when some cell holds the maximum
/// combined score; there is no partial-confidence output.

use crate::composite::{CompositeResult, Scene};
use crate::model::{BandId, MonitorError};
use crate::raster::{self, Grid, VALUE_EPS, focal_sum3};

/// Moisture-index interval classified as "wet".
pub const WET_INDEX_MIN: f32 = -0.2;
pub const WET_INDEX_MAX: f32 = 0.2;

/// Red-band percent-change window accepted as candidate signal. Both
/// tails are excluded: below is noise, above is a saturation artifact.
pub const RED_JUMP_MIN_PCT: f32 = 40.0;
pub const RED_JUMP_MAX_PCT: f32 = 200.0;

/// Minimum 3x3 neighborhood score for a cell to survive the filter.
pub const NEIGHBOR_MIN_SCORE: f32 = 4.0;

/// Combined score required for a detection to be emitted at all.
pub const FULL_CONFIDENCE: f32 = 3.0;

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// Normalized-difference moisture index, (nir - swir) / (nir + swir).
/// Cells with no spectral contrast (zero denominator) carry no class.
fn moisture_index(nir: &Grid, swir: &Grid) -> Result<Grid, MonitorError> {
    let mut index = nir.clone();
    index.sub_assign_checked(swir, "moisture index numerator")?;
    let mut denom = nir.clone();
    denom.add_assign_checked(swir, "moisture index denominator")?;
    index.data.zip_mut_with(&denom.data, |n, &d| {
        *n = if d != 0.0 { *n / d } else { f32::NAN };
    });
    Ok(index)
}

fn wet_class(index: &Grid) -> Grid {
    index.map_cells(|v| {
        if v.is_finite() && (WET_INDEX_MIN..=WET_INDEX_MAX).contains(&v) {
            1.0
        } else {
            0.0
        }
    })
}

/// Criterion 1: the composite classifies wet where the reference did not.
pub fn moisture_transition(
    comp_nir: &Grid,
    comp_swir: &Grid,
    ref_nir: &Grid,
    ref_swir: &Grid,
) -> Result<Grid, MonitorError> {
    let comp_wet = wet_class(&moisture_index(comp_nir, comp_swir)?);
    let ref_wet = wet_class(&moisture_index(ref_nir, ref_swir)?);
    let mut transition = comp_wet;
    transition.data.zip_mut_with(&ref_wet.data, |t, &r| {
        if r == 1.0 {
            *t = 0.0;
        }
    });
    Ok(transition)
}

/// Criterion 2: red reflectance rose by strictly more than 40% and
/// strictly less than 200% against the reference.
pub fn reflectance_jump(comp_red: &Grid, ref_red: &Grid) -> Result<Grid, MonitorError> {
    let mut jump = comp_red.clone();
    jump.sub_assign_checked(ref_red, "reflectance jump")?;
    jump.data.zip_mut_with(&ref_red.data, |d, &r| {
        let pct = if r != 0.0 && r.is_finite() {
            (*d / r) * 100.0
        } else {
            0.0
        };
        *d = if pct > RED_JUMP_MIN_PCT && pct < RED_JUMP_MAX_PCT {
            1.0
        } else {
            0.0
        };
    });
    Ok(jump)
}

/// Criterion 3 is the precomputed slope mask, taken as a strict boolean
/// gate: any value outside {0, 1} is damaged calibration data, and
/// summing it would quietly fabricate confidence.
pub fn validate_slope_mask(slope: &Grid) -> Result<(), MonitorError> {
    for ((row, col), value) in slope.data.indexed_iter() {
        if *value != 0.0 && *value != 1.0 {
            return Err(MonitorError::StateCorruption {
                path: "slope mask".to_string(),
                reason: format!("cell ({}, {}) holds {}, expected 0 or 1", row, col, value),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Combination and filtering
// ---------------------------------------------------------------------------

/// Sums the criteria, discounts unresolved-cloud cells by one, clamps at
/// zero.
pub fn combine(
    moisture: &Grid,
    jump: &Grid,
    slope: &Grid,
    unresolved: &Grid,
) -> Result<Grid, MonitorError> {
    let mut combined = moisture.clone();
    combined.add_assign_checked(jump, "criteria sum")?;
    combined.add_assign_checked(slope, "criteria sum")?;
    combined.sub_assign_checked(unresolved, "cloud discount")?;
    Ok(combined.map_cells(|v| v.max(0.0)))
}

/// The neighbor-density filter: each cell's 3x3 neighborhood sum, doubled
/// and quartered, must reach the minimum score or the cell is zeroed.
pub fn neighbor_filter(combined: &Grid) -> Grid {
    let counts = focal_sum3(combined);
    let mut filtered = combined.clone();
    filtered.data.zip_mut_with(&counts, |v, &sum| {
        if sum * 2.0 / 4.0 < NEIGHBOR_MIN_SCORE {
            *v = 0.0;
        }
    });
    filtered
}

// ---------------------------------------------------------------------------
// Full detection
// ---------------------------------------------------------------------------

/// Runs the detector over a composite against the reference scene.
/// Everything is cropped to the common intersection first. Returns the
/// detection raster only when at least one cell reaches full confidence.
pub fn detect(
    composite: &CompositeResult,
    reference: &Scene,
    slope: &Grid,
) -> Result<Option<Grid>, MonitorError> {
    let common = raster::intersection(&[
        &composite.footprint,
        reference.footprint()?,
        &slope.footprint,
    ])?;

    let band = |id: BandId| -> Result<Grid, MonitorError> {
        composite
            .bands
            .get(&id)
            .ok_or_else(|| MonitorError::Acquisition(format!("composite missing band {}", id)))?
            .crop(&common)
    };
    let comp_red = band(BandId::Red)?;
    let comp_nir = band(BandId::Nir)?;
    let comp_swir = band(BandId::Swir)?;
    let ref_red = reference.band(BandId::Red)?.crop(&common)?;
    let ref_nir = reference.band(BandId::Nir)?.crop(&common)?;
    let ref_swir = reference.band(BandId::Swir)?.crop(&common)?;
    let unresolved = composite.unresolved.crop(&common)?;
    let slope = slope.crop(&common)?;
    validate_slope_mask(&slope)?;

    let moisture = moisture_transition(&comp_nir, &comp_swir, &ref_nir, &ref_swir)?;
    let jump = reflectance_jump(&comp_red, &ref_red)?;
    let combined = combine(&moisture, &jump, &slope, &unresolved)?;
    let filtered = neighbor_filter(&combined);

    let full_confidence = filtered
        .data
        .iter()
        .any(|v| (*v - FULL_CONFIDENCE).abs() < VALUE_EPS);
    Ok(if full_confidence { Some(filtered) } else { None })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Footprint;
    use ndarray::Array2;

    fn footprint(rows: usize, cols: usize) -> Footprint {
        Footprint {
            origin_x: 300000.0,
            origin_y: 3100000.0,
            pixel_width: 30.0,
            pixel_height: -30.0,
            rows,
            cols,
            epsg: 32645,
        }
    }

    fn uniform(rows: usize, cols: usize, value: f32) -> Grid {
        Grid::new(Array2::from_elem((rows, cols), value), footprint(rows, cols)).unwrap()
    }

    #[test]
    fn test_moisture_transition_fires_on_newly_wet_cells() {
        // Composite: nir == swir, index 0 (wet). Reference: strong
        // contrast, index 0.5 (not wet).
        let comp_nir = uniform(1, 3, 100.0);
        let comp_swir = uniform(1, 3, 100.0);
        let ref_nir = uniform(1, 3, 300.0);
        let ref_swir = uniform(1, 3, 100.0);
        let fired = moisture_transition(&comp_nir, &comp_swir, &ref_nir, &ref_swir).unwrap();
        assert!(fired.data.iter().all(|v| *v == 1.0));

        // Both wet: no transition.
        let same = moisture_transition(&comp_nir, &comp_swir, &comp_nir, &comp_swir).unwrap();
        assert!(same.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_zero_contrast_cells_carry_no_moisture_class() {
        let zeros = uniform(1, 2, 0.0);
        let index = moisture_index(&zeros, &zeros).unwrap();
        assert!(index.data.iter().all(|v| v.is_nan()));
        assert!(wet_class(&index).data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_reflectance_jump_excludes_both_tails() {
        let reference = uniform(1, 5, 100.0);
        let mut composite = uniform(1, 5, 100.0);
        composite.data[[0, 0]] = 140.0; // +40%: boundary, excluded
        composite.data[[0, 1]] = 141.0; // just inside
        composite.data[[0, 2]] = 299.0; // just inside
        composite.data[[0, 3]] = 300.0; // +200%: boundary, excluded
        composite.data[[0, 4]] = 50.0; // darkening, excluded
        let fired = reflectance_jump(&composite, &reference).unwrap();
        assert_eq!(fired.data[[0, 0]], 0.0);
        assert_eq!(fired.data[[0, 1]], 1.0);
        assert_eq!(fired.data[[0, 2]], 1.0);
        assert_eq!(fired.data[[0, 3]], 0.0);
        assert_eq!(fired.data[[0, 4]], 0.0);
    }

    #[test]
    fn test_zero_reference_cells_never_fire() {
        let reference = uniform(1, 2, 0.0);
        let composite = uniform(1, 2, 150.0);
        let fired = reflectance_jump(&composite, &reference).unwrap();
        assert!(fired.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_slope_mask_must_be_strictly_boolean() {
        let mut slope = uniform(2, 2, 1.0);
        assert!(validate_slope_mask(&slope).is_ok());
        slope.data[[0, 1]] = 0.5;
        let err = validate_slope_mask(&slope).unwrap_err();
        assert!(matches!(err, MonitorError::StateCorruption { .. }));
    }

    #[test]
    fn test_unresolved_cloud_discounts_below_full_confidence() {
        let ones = uniform(1, 1, 1.0);
        let mut unresolved = uniform(1, 1, 0.0);
        let clear = combine(&ones, &ones, &ones, &unresolved).unwrap();
        assert_eq!(clear.data[[0, 0]], 3.0);
        unresolved.data[[0, 0]] = 1.0;
        let masked = combine(&ones, &ones, &ones, &unresolved).unwrap();
        assert_eq!(masked.data[[0, 0]], 2.0, "obscured cells lose one point");
    }

    #[test]
    fn test_discount_clamps_at_zero() {
        let zeros = uniform(1, 1, 0.0);
        let unresolved = uniform(1, 1, 1.0);
        let combined = combine(&zeros, &zeros, &zeros, &unresolved).unwrap();
        assert_eq!(combined.data[[0, 0]], 0.0);
    }

    #[test]
    fn test_isolated_full_confidence_cell_is_suppressed() {
        let mut combined = uniform(5, 5, 0.0);
        combined.data[[2, 2]] = 3.0;
        let filtered = neighbor_filter(&combined);
        // Neighborhood sum 3, score 1.5 — below the floor of 4.
        assert_eq!(filtered.data[[2, 2]], 0.0);
    }

    #[test]
    fn test_three_supporting_neighbors_rescue_the_cell() {
        let mut combined = uniform(5, 5, 0.0);
        combined.data[[2, 2]] = 3.0;
        combined.data[[1, 1]] = 3.0;
        combined.data[[1, 2]] = 3.0;
        combined.data[[1, 3]] = 3.0;
        let filtered = neighbor_filter(&combined);
        // Neighborhood sum 12, score 6 — the detection stands.
        assert_eq!(filtered.data[[2, 2]], 3.0);
    }
}
