/// Cloud mask derivation, per scene, from that scene's own bands.
///
/// Two independent criteria are OR-combined: the producer's quality flags
/// (values in the fill/cloud ranges), and panchromatic brightness above the
/// scene's own 98th percentile. The brightness threshold is deliberately
/// self-referential — no global calibration survives the atmospheric
/// differences between scenes, so each scene screens itself.

use crate::model::MonitorError;
use crate::raster::Grid;

/// Quality flags at or below this mark dropped/fill pixels.
pub const QA_FILL_MAX: f32 = 1.0;

/// Quality flags at or above this mark cloud-contaminated pixels.
pub const QA_CLOUD_MIN: f32 = 20515.0;

/// Brightness percentile above which panchromatic cells count as cloud.
pub const PAN_BRIGHT_PERCENTILE: f64 = 98.0;

/// Mask from the quality band alone: 1 = obscured.
pub fn qa_mask(qa: &Grid) -> Grid {
    qa.map_cells(|v| {
        if v <= QA_FILL_MAX || v >= QA_CLOUD_MIN {
            1.0
        } else {
            0.0
        }
    })
}

/// Mask from panchromatic brightness alone: 1 = obscured.
///
/// Zero-radiance cells never count as bright, even when the percentile
/// threshold collapses to zero on a mostly-dark crop.
pub fn pan_mask(pan: &Grid) -> Grid {
    let threshold = pan.percentile(PAN_BRIGHT_PERCENTILE);
    pan.map_cells(|v| if v >= threshold && v > 0.0 { 1.0 } else { 0.0 })
}

/// Full per-scene cloud mask: either criterion marks the cell.
pub fn cloud_mask(qa: &Grid, pan: &Grid) -> Result<Grid, MonitorError> {
    if !qa.footprint.approx_eq(&pan.footprint) {
        return Err(MonitorError::FootprintMismatch {
            context: "cloud mask bands".to_string(),
            expected: qa.footprint.to_string(),
            actual: pan.footprint.to_string(),
        });
    }
    let brightness = pan_mask(pan);
    let mut mask = qa_mask(qa);
    mask.data.zip_mut_with(&brightness.data, |m, &b| {
        if b == 1.0 {
            *m = 1.0;
        }
    });
    Ok(mask)
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

    #[test]
    fn test_qa_mask_flags_both_bad_ranges() {
        let mut qa = Grid::new(Array2::from_elem((1, 5), 5000.0), footprint(1, 5)).unwrap();
        qa.data[[0, 0]] = 0.0; // fill
        qa.data[[0, 1]] = 1.0; // dropped
        qa.data[[0, 2]] = 20515.0; // cloud range start
        qa.data[[0, 3]] = 60000.0; // deep in cloud range
        let mask = qa_mask(&qa);
        assert_eq!(mask.data[[0, 0]], 1.0);
        assert_eq!(mask.data[[0, 1]], 1.0);
        assert_eq!(mask.data[[0, 2]], 1.0);
        assert_eq!(mask.data[[0, 3]], 1.0);
        assert_eq!(mask.data[[0, 4]], 0.0, "mid-range flags are clear");
    }

    #[test]
    fn test_pan_mask_threshold_is_scene_relative() {
        // A gradient 1..=100: the nearest-rank 98th percentile is 98, so
        // exactly the cells valued 98, 99 and 100 trip.
        let data = Array2::from_shape_fn((1, 100), |(_, c)| (c + 1) as f32);
        let pan = Grid::new(data, footprint(1, 100)).unwrap();
        let mask = pan_mask(&pan);
        assert_eq!(mask.count_nonzero(), 3);
        assert_eq!(mask.data[[0, 99]], 1.0);
        assert_eq!(mask.data[[0, 0]], 0.0);
    }

    #[test]
    fn test_dark_cells_never_count_as_bright() {
        // Mostly-zero crop collapses the percentile to zero; the dark
        // cells must stay clear, only the lit outlier trips.
        let mut pan = Grid::zeros(&footprint(1, 100));
        pan.data[[0, 7]] = 900.0;
        let mask = pan_mask(&pan);
        assert_eq!(mask.count_nonzero(), 1);
        assert_eq!(mask.data[[0, 7]], 1.0);
    }

    #[test]
    fn test_combined_mask_is_union_of_criteria() {
        let mut qa = Grid::new(Array2::from_elem((1, 100), 5000.0), footprint(1, 100)).unwrap();
        qa.data[[0, 10]] = 0.0;
        let pan = Grid::new(
            Array2::from_shape_fn((1, 100), |(_, c)| c as f32),
            footprint(1, 100),
        )
        .unwrap();
        let mask = cloud_mask(&qa, &pan).unwrap();
        assert_eq!(mask.data[[0, 10]], 1.0, "qa criterion");
        assert_eq!(mask.data[[0, 99]], 1.0, "brightness criterion");
        assert_eq!(mask.data[[0, 50]], 0.0);
    }

    #[test]
    fn test_mask_rejects_misregistered_bands() {
        let qa = Grid::zeros(&footprint(2, 2));
        let pan = Grid::zeros(&footprint(3, 3));
        assert!(cloud_mask(&qa, &pan).is_err());
    }
}
