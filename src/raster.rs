/// Grid and footprint algebra.
///
/// A `Grid` is a 2-D `f32` array tied to a `Footprint`: the geographic
/// extent, pixel size, and coordinate reference that map cells to ground.
/// All arithmetic in the pipelines goes through the checked operations here,
/// which refuse to combine grids whose footprints differ — co-registration
/// is established by an explicit `crop`, never implicitly.

use ndarray::{Array2, s};

use crate::model::MonitorError;

/// Tolerance for comparing footprint coordinates (map units).
pub const GEO_EPS: f64 = 1e-6;

/// Tolerance for comparing cell values (native grid units).
pub const VALUE_EPS: f32 = 1e-3;

// ---------------------------------------------------------------------------
// Footprint
// ---------------------------------------------------------------------------

/// Geographic extent and pixel geometry of a grid, north-up.
///
/// `origin_x`/`origin_y` locate the outer corner of the top-left pixel;
/// `pixel_height` is negative (rows run north to south).
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub rows: usize,
    pub cols: usize,
    pub epsg: u32,
}

impl Footprint {
    /// Eastern edge of the covered extent.
    pub fn right(&self) -> f64 {
        self.origin_x + self.pixel_width * self.cols as f64
    }

    /// Southern edge of the covered extent.
    pub fn bottom(&self) -> f64 {
        self.origin_y + self.pixel_height * self.rows as f64
    }

    /// True when the two footprints describe the same cells (within
    /// `GEO_EPS`), i.e. grids over them are co-registered.
    pub fn approx_eq(&self, other: &Footprint) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.epsg == other.epsg
            && (self.origin_x - other.origin_x).abs() < GEO_EPS
            && (self.origin_y - other.origin_y).abs() < GEO_EPS
            && (self.pixel_width - other.pixel_width).abs() < GEO_EPS
            && (self.pixel_height - other.pixel_height).abs() < GEO_EPS
    }

    fn same_pixel_size(&self, other: &Footprint) -> bool {
        (self.pixel_width - other.pixel_width).abs() < GEO_EPS
            && (self.pixel_height - other.pixel_height).abs() < GEO_EPS
    }
}

impl std::fmt::Display for Footprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} px at ({}, {}) dx={} dy={} EPSG:{}",
            self.rows,
            self.cols,
            self.origin_x,
            self.origin_y,
            self.pixel_width,
            self.pixel_height,
            self.epsg
        )
    }
}

/// Tightest common bounding box of several footprints, at the coarsest
/// shared pixel size. Fails if the reference systems differ or the extents
/// do not overlap.
pub fn intersection(footprints: &[&Footprint]) -> Result<Footprint, MonitorError> {
    let first = footprints
        .first()
        .ok_or_else(|| MonitorError::Config("intersection of zero footprints".to_string()))?;
    let mut left = f64::MIN;
    let mut right = f64::MAX;
    let mut bottom = f64::MIN;
    let mut top = f64::MAX;
    let mut pixel_width: f64 = 0.0;
    let mut pixel_height: f64 = 0.0;
    for fp in footprints {
        if fp.epsg != first.epsg {
            return Err(MonitorError::FootprintMismatch {
                context: "footprint intersection".to_string(),
                expected: format!("EPSG:{}", first.epsg),
                actual: format!("EPSG:{}", fp.epsg),
            });
        }
        left = left.max(fp.origin_x);
        right = right.min(fp.right());
        bottom = bottom.max(fp.bottom());
        top = top.min(fp.origin_y);
        // Coarsest pixel wins: widest, and tallest in magnitude (negative).
        pixel_width = pixel_width.max(fp.pixel_width);
        pixel_height = pixel_height.min(fp.pixel_height);
    }
    if right - left <= GEO_EPS || top - bottom <= GEO_EPS {
        return Err(MonitorError::FootprintMismatch {
            context: "footprint intersection".to_string(),
            expected: "overlapping extents".to_string(),
            actual: format!("empty overlap [{} {} {} {}]", left, right, bottom, top),
        });
    }
    let cols = ((right - left) / pixel_width).ceil() as usize;
    let rows = ((top - bottom) / -pixel_height).ceil() as usize;
    Ok(Footprint {
        origin_x: left,
        origin_y: top,
        pixel_width,
        pixel_height,
        rows,
        cols,
        epsg: first.epsg,
    })
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// A 2-D measurement grid bound to its footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub data: Array2<f32>,
    pub footprint: Footprint,
}

impl Grid {
    /// Binds data to a footprint, rejecting shape disagreements.
    pub fn new(data: Array2<f32>, footprint: Footprint) -> Result<Grid, MonitorError> {
        let (rows, cols) = data.dim();
        if rows != footprint.rows || cols != footprint.cols {
            return Err(MonitorError::FootprintMismatch {
                context: "grid construction".to_string(),
                expected: format!("{}x{}", footprint.rows, footprint.cols),
                actual: format!("{}x{}", rows, cols),
            });
        }
        Ok(Grid { data, footprint })
    }

    /// Zero-filled grid over a footprint.
    pub fn zeros(footprint: &Footprint) -> Grid {
        Grid {
            data: Array2::from_elem((footprint.rows, footprint.cols), 0.0),
            footprint: footprint.clone(),
        }
    }

    fn ensure_co_registered(&self, other: &Grid, context: &str) -> Result<(), MonitorError> {
        if self.footprint.approx_eq(&other.footprint) {
            Ok(())
        } else {
            Err(MonitorError::FootprintMismatch {
                context: context.to_string(),
                expected: self.footprint.to_string(),
                actual: other.footprint.to_string(),
            })
        }
    }

    /// Element-wise `self += other`; footprints must agree.
    pub fn add_assign_checked(&mut self, other: &Grid, context: &str) -> Result<(), MonitorError> {
        self.ensure_co_registered(other, context)?;
        self.data.zip_mut_with(&other.data, |a, &b| *a += b);
        Ok(())
    }

    /// Element-wise `self -= other`; footprints must agree.
    pub fn sub_assign_checked(&mut self, other: &Grid, context: &str) -> Result<(), MonitorError> {
        self.ensure_co_registered(other, context)?;
        self.data.zip_mut_with(&other.data, |a, &b| *a -= b);
        Ok(())
    }

    /// Element-wise `self = max(self, other)`; footprints must agree.
    pub fn max_assign_checked(&mut self, other: &Grid, context: &str) -> Result<(), MonitorError> {
        self.ensure_co_registered(other, context)?;
        self.data.zip_mut_with(&other.data, |a, &b| *a = a.max(b));
        Ok(())
    }

    /// New grid with `f` applied to every cell, same footprint.
    pub fn map_cells<F: Fn(f32) -> f32>(&self, f: F) -> Grid {
        Grid {
            data: self.data.mapv(f),
            footprint: self.footprint.clone(),
        }
    }

    /// Largest finite cell value; negative infinity for an all-NaN grid,
    /// which compares below every threshold.
    pub fn max_value(&self) -> f32 {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Number of cells with a non-zero value.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    /// Nearest-rank percentile of the finite cell values.
    pub fn percentile(&self, pct: f64) -> f32 {
        let mut values: Vec<f32> = self.data.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((pct / 100.0) * values.len() as f64).ceil() as usize;
        values[rank.clamp(1, values.len()) - 1]
    }

    /// Cuts this grid down to `target`, which must lie inside the current
    /// footprint and share its pixel size. Offsets are computed the same
    /// way extents are intersected: whole pixels, rounded up.
    pub fn crop(&self, target: &Footprint) -> Result<Grid, MonitorError> {
        let fp = &self.footprint;
        let mismatch = |why: &str| MonitorError::FootprintMismatch {
            context: format!("crop ({})", why),
            expected: target.to_string(),
            actual: fp.to_string(),
        };
        if fp.epsg != target.epsg {
            return Err(mismatch("reference system"));
        }
        if !fp.same_pixel_size(target) {
            return Err(mismatch("pixel size"));
        }
        // Whole pixels, rounded up; the epsilon keeps an exact multiple
        // from spilling into the next pixel through float noise.
        let col0 =
            ((target.origin_x - fp.origin_x).abs() / fp.pixel_width - GEO_EPS).ceil() as usize;
        let row0 =
            ((fp.origin_y - target.origin_y).abs() / -fp.pixel_height - GEO_EPS).ceil() as usize;
        if row0 + target.rows > fp.rows || col0 + target.cols > fp.cols {
            return Err(mismatch("target exceeds source extent"));
        }
        let data = self
            .data
            .slice(s![row0..row0 + target.rows, col0..col0 + target.cols])
            .to_owned();
        Ok(Grid {
            data,
            footprint: target.clone(),
        })
    }
}

/// Sum of each cell's 3x3 neighborhood (center included), zero-padded at
/// the edges. The change detector's neighbor-density filter builds on this.
pub fn focal_sum3(grid: &Grid) -> Array2<f32> {
    let (rows, cols) = grid.data.dim();
    let mut out = Array2::from_elem((rows, cols), 0.0_f32);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for dr in -1_isize..=1 {
                for dc in -1_isize..=1 {
                    let rr = r as isize + dr;
                    let cc = c as isize + dc;
                    if rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols {
                        acc += grid.data[[rr as usize, cc as usize]];
                    }
                }
            }
            out[[r, c]] = acc;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn footprint(ox: f64, oy: f64, rows: usize, cols: usize) -> Footprint {
        Footprint {
            origin_x: ox,
            origin_y: oy,
            pixel_width: 1.0,
            pixel_height: -1.0,
            rows,
            cols,
            epsg: 32645,
        }
    }

    #[test]
    fn test_add_sub_round_trip_restores_original() {
        let fp = footprint(0.0, 10.0, 3, 3);
        let mut a = Grid::new(Array2::from_elem((3, 3), 5.0), fp.clone()).unwrap();
        let b = Grid::new(Array2::from_elem((3, 3), 2.0), fp).unwrap();
        a.add_assign_checked(&b, "test").unwrap();
        a.sub_assign_checked(&b, "test").unwrap();
        assert!(a.data.iter().all(|v| (*v - 5.0).abs() < VALUE_EPS));
    }

    #[test]
    fn test_arithmetic_rejects_differing_footprints() {
        let mut a = Grid::zeros(&footprint(0.0, 10.0, 3, 3));
        let b = Grid::zeros(&footprint(1.0, 10.0, 3, 3));
        let err = a.add_assign_checked(&b, "test").unwrap_err();
        assert!(matches!(err, MonitorError::FootprintMismatch { .. }));
    }

    #[test]
    fn test_intersection_takes_tightest_box() {
        let a = footprint(0.0, 10.0, 10, 10);
        let b = footprint(2.0, 8.0, 10, 10); // shifted east and south
        let common = intersection(&[&a, &b]).unwrap();
        assert_eq!(common.origin_x, 2.0);
        assert_eq!(common.origin_y, 8.0);
        assert_eq!(common.cols, 8);
        assert_eq!(common.rows, 8);
    }

    #[test]
    fn test_intersection_rejects_disjoint_extents() {
        let a = footprint(0.0, 10.0, 5, 5);
        let b = footprint(100.0, 10.0, 5, 5);
        assert!(intersection(&[&a, &b]).is_err());
    }

    #[test]
    fn test_crop_selects_expected_cells() {
        let fp = footprint(0.0, 4.0, 4, 4);
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let grid = Grid::new(data, fp).unwrap();
        let target = footprint(1.0, 3.0, 2, 2);
        let cropped = grid.crop(&target).unwrap();
        // Rows 1..3, cols 1..3 of the source.
        assert_eq!(cropped.data[[0, 0]], 5.0);
        assert_eq!(cropped.data[[1, 1]], 10.0);
        assert_eq!(cropped.footprint, target);
    }

    #[test]
    fn test_crop_rejects_target_outside_source() {
        let grid = Grid::zeros(&footprint(0.0, 4.0, 4, 4));
        let target = footprint(3.0, 4.0, 4, 4);
        assert!(grid.crop(&target).is_err());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let fp = footprint(0.0, 10.0, 1, 100);
        let data = Array2::from_shape_fn((1, 100), |(_, c)| (c + 1) as f32);
        let grid = Grid::new(data, fp).unwrap();
        assert_eq!(grid.percentile(98.0), 98.0);
        assert_eq!(grid.percentile(100.0), 100.0);
    }

    #[test]
    fn test_focal_sum_includes_center_and_pads_edges() {
        let fp = footprint(0.0, 3.0, 3, 3);
        let mut grid = Grid::zeros(&fp);
        grid.data[[1, 1]] = 1.0;
        let sums = focal_sum3(&grid);
        // Every cell sees the center's 1.0 exactly once.
        assert!(sums.iter().all(|v| (*v - 1.0).abs() < VALUE_EPS));
        let mut corner = Grid::zeros(&fp);
        corner.data[[0, 0]] = 2.0;
        let sums = focal_sum3(&corner);
        assert_eq!(sums[[0, 0]], 2.0);
        assert_eq!(sums[[1, 1]], 2.0);
        assert_eq!(sums[[2, 2]], 0.0);
    }
}
