/// Raster codec: ESRI ASCII grid files with an EPSG sidecar.
///
/// Every grid the service persists — window sums, queue epochs, masks,
/// daily buckets, detections — goes through this module. Cell values are
/// written with Rust's shortest-round-trip float formatting, so a write
/// followed by a read yields bit-identical values. The coordinate
/// reference is declared in a `.prj` sidecar holding the EPSG code;
/// in-memory payload documents may instead carry an `epsg` header line.
///
/// Writes are atomic: the document lands in a temporary file which is then
/// renamed over the target, so a crashed run never leaves a half-written
/// grid where a complete one is expected.

use ndarray::Array2;
use std::fs;
use std::path::Path;

use crate::model::MonitorError;
use crate::raster::{Footprint, Grid};

const NODATA: &str = "-9999";

fn codec_err(path: &Path, reason: impl Into<String>) -> MonitorError {
    MonitorError::Codec {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Renders a grid as an ASCII grid document, including the `epsg` header
/// line (harmless to standard readers, sufficient for `parse_grid`).
pub fn format_grid(grid: &Grid) -> String {
    let fp = &grid.footprint;
    let mut out = String::new();
    out.push_str(&format!("ncols {}\n", fp.cols));
    out.push_str(&format!("nrows {}\n", fp.rows));
    out.push_str(&format!("xllcorner {}\n", fp.origin_x));
    out.push_str(&format!("yllcorner {}\n", fp.bottom()));
    if (fp.pixel_width - -fp.pixel_height).abs() < f64::EPSILON {
        out.push_str(&format!("cellsize {}\n", fp.pixel_width));
    } else {
        out.push_str(&format!("dx {}\n", fp.pixel_width));
        out.push_str(&format!("dy {}\n", -fp.pixel_height));
    }
    out.push_str(&format!("NODATA_value {}\n", NODATA));
    out.push_str(&format!("epsg {}\n", fp.epsg));
    for row in grid.data.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{}", v)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses an ASCII grid document. `epsg_hint` supplies the reference code
/// when the document has no `epsg` header (e.g. it came with a sidecar).
pub fn parse_grid(
    text: &str,
    label: &Path,
    epsg_hint: Option<u32>,
) -> Result<Grid, MonitorError> {
    let mut ncols: Option<usize> = None;
    let mut nrows: Option<usize> = None;
    let mut xll: Option<f64> = None;
    let mut yll: Option<f64> = None;
    let mut dx: Option<f64> = None;
    let mut dy: Option<f64> = None;
    let mut epsg = epsg_hint;
    let mut values: Vec<f32> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first = trimmed.split_whitespace().next().unwrap_or_default();
        // Header lines lead with a keyword; "nan"/"inf" tokens are cells.
        let is_header = first
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && first.parse::<f32>().is_err();
        if is_header {
            let mut parts = trimmed.split_whitespace();
            let key = parts.next().unwrap_or_default().to_ascii_lowercase();
            let value = parts
                .next()
                .ok_or_else(|| codec_err(label, format!("header '{}' missing value", key)))?;
            match key.as_str() {
                "ncols" => ncols = Some(parse_num(label, &key, value)?),
                "nrows" => nrows = Some(parse_num(label, &key, value)?),
                "xllcorner" => xll = Some(parse_num(label, &key, value)?),
                "yllcorner" => yll = Some(parse_num(label, &key, value)?),
                "cellsize" => {
                    let size: f64 = parse_num(label, &key, value)?;
                    dx = Some(size);
                    dy = Some(size);
                }
                "dx" => dx = Some(parse_num(label, &key, value)?),
                "dy" => dy = Some(parse_num(label, &key, value)?),
                "epsg" => epsg = Some(parse_num(label, &key, value)?),
                "nodata_value" => {}
                other => {
                    return Err(codec_err(label, format!("unknown header '{}'", other)));
                }
            }
        } else {
            for token in trimmed.split_whitespace() {
                let v: f32 = token
                    .parse()
                    .map_err(|_| codec_err(label, format!("bad cell value '{}'", token)))?;
                values.push(v);
            }
        }
    }

    let cols = ncols.ok_or_else(|| codec_err(label, "missing ncols"))?;
    let rows = nrows.ok_or_else(|| codec_err(label, "missing nrows"))?;
    let xll = xll.ok_or_else(|| codec_err(label, "missing xllcorner"))?;
    let yll = yll.ok_or_else(|| codec_err(label, "missing yllcorner"))?;
    let dx = dx.ok_or_else(|| codec_err(label, "missing cellsize/dx"))?;
    let dy = dy.ok_or_else(|| codec_err(label, "missing cellsize/dy"))?;
    let epsg = epsg.ok_or_else(|| codec_err(label, "missing epsg (no header, no sidecar)"))?;

    if values.len() != rows * cols {
        return Err(codec_err(
            label,
            format!("expected {} cells, found {}", rows * cols, values.len()),
        ));
    }
    let data = Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| codec_err(label, e.to_string()))?;
    let footprint = Footprint {
        origin_x: xll,
        origin_y: yll + dy * rows as f64,
        pixel_width: dx,
        pixel_height: -dy,
        rows,
        cols,
        epsg,
    };
    Grid::new(data, footprint)
}

fn parse_num<T: std::str::FromStr>(label: &Path, key: &str, value: &str) -> Result<T, MonitorError> {
    value
        .parse::<T>()
        .map_err(|_| codec_err(label, format!("bad value '{}' for header '{}'", value, key)))
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Reads a gridded file, taking the EPSG code from the document itself or
/// from the `.prj` sidecar.
pub fn read_grid(path: &Path) -> Result<Grid, MonitorError> {
    let text = fs::read_to_string(path).map_err(|e| codec_err(path, e.to_string()))?;
    let sidecar = read_sidecar_epsg(path)?;
    parse_grid(&text, path, sidecar)
}

/// Writes a grid plus its `.prj` sidecar, atomically.
pub fn write_grid(path: &Path, grid: &Grid) -> Result<(), MonitorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| codec_err(path, e.to_string()))?;
    }
    let document = format_grid(grid);
    atomic_write(path, document.as_bytes())?;
    let prj = path.with_extension("prj");
    atomic_write(&prj, format!("EPSG:{}\n", grid.footprint.epsg).as_bytes())?;
    Ok(())
}

/// Removes a grid file and its sidecar if present.
pub fn remove_grid(path: &Path) -> Result<(), MonitorError> {
    fs::remove_file(path).map_err(|e| codec_err(path, e.to_string()))?;
    let prj = path.with_extension("prj");
    if prj.exists() {
        fs::remove_file(&prj).map_err(|e| codec_err(&prj, e.to_string()))?;
    }
    Ok(())
}

fn read_sidecar_epsg(path: &Path) -> Result<Option<u32>, MonitorError> {
    let prj = path.with_extension("prj");
    if !prj.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&prj).map_err(|e| codec_err(&prj, e.to_string()))?;
    let code = text
        .trim()
        .strip_prefix("EPSG:")
        .ok_or_else(|| codec_err(&prj, "expected 'EPSG:<code>'"))?;
    let epsg: u32 = code
        .parse()
        .map_err(|_| codec_err(&prj, format!("bad EPSG code '{}'", code)))?;
    Ok(Some(epsg))
}

/// Write-then-rename so readers never observe a partial file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), MonitorError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| codec_err(path, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, bytes).map_err(|e| codec_err(&tmp, e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| codec_err(path, e.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sample_grid() -> Grid {
        let footprint = Footprint {
            origin_x: 85.05,
            origin_y: 28.45,
            pixel_width: 0.1,
            pixel_height: -0.1,
            rows: 3,
            cols: 4,
            epsg: 4326,
        };
        let data = Array2::from_shape_fn((3, 4), |(r, c)| (r as f32) * 1.25 + (c as f32) * 0.333);
        Grid::new(data, footprint).unwrap()
    }

    #[test]
    fn test_format_parse_round_trip_is_bit_identical() {
        let grid = sample_grid();
        let text = format_grid(&grid);
        let back = parse_grid(&text, Path::new("test.asc"), None).unwrap();
        assert_eq!(back.data, grid.data, "cell values must survive exactly");
        assert!(back.footprint.approx_eq(&grid.footprint));
        assert_eq!(back.footprint.epsg, 4326);
    }

    #[test]
    fn test_square_pixels_use_cellsize_header() {
        let text = format_grid(&sample_grid());
        assert!(text.contains("cellsize 0.1"));
        assert!(!text.contains("\ndx "));
    }

    #[test]
    fn test_parse_rejects_wrong_cell_count() {
        let mut text = format_grid(&sample_grid());
        text.push_str("1 2 3\n");
        let err = parse_grid(&text, Path::new("test.asc"), None).unwrap_err();
        assert!(matches!(err, MonitorError::Codec { .. }));
    }

    #[test]
    fn test_parse_requires_reference_code() {
        let text = format_grid(&sample_grid());
        let stripped: String = text
            .lines()
            .filter(|l| !l.starts_with("epsg"))
            .map(|l| format!("{}\n", l))
            .collect();
        assert!(parse_grid(&stripped, Path::new("test.asc"), None).is_err());
        assert!(parse_grid(&stripped, Path::new("test.asc"), Some(4326)).is_ok());
    }

    #[test]
    fn test_file_round_trip_with_sidecar() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("sum24.asc");
        let grid = sample_grid();
        write_grid(&path, &grid).unwrap();
        assert!(path.with_extension("prj").exists());
        let back = read_grid(&path).unwrap();
        assert_eq!(back.data, grid.data);
        assert!(back.footprint.approx_eq(&grid.footprint));
    }

    #[test]
    fn test_remove_grid_takes_sidecar_with_it() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("epoch.asc");
        write_grid(&path, &sample_grid()).unwrap();
        remove_grid(&path).unwrap();
        assert!(!path.exists());
        assert!(!path.with_extension("prj").exists());
    }
}
