use super::tolerance::{PixelTolerance, compare_with_tolerance, non_finite_values_match};
use crate::domain::{CellLocation, ComparisonResult, PixelMismatchSummary, RasterArtifact};
use crate::raster::{RasterError, RasterGrid, extract_metadata, read_grid};
use tracing::debug;

/// Cell-by-cell comparison of a candidate grid against its reference. Shape
/// differences short-circuit before any cell is visited.
pub fn compare_grids(
    candidate: &RasterGrid,
    reference: &RasterGrid,
    tolerance: &PixelTolerance,
) -> ComparisonResult {
    if let Some(reason) = shape_difference(
        (candidate.width(), candidate.height(), candidate.bands()),
        (reference.width(), reference.height(), reference.bands()),
    ) {
        return ComparisonResult::shape_mismatch(reason);
    }

    let width = candidate.width() as usize;
    let bands = candidate.bands() as usize;
    let mut summary = PixelMismatchSummary {
        band_count: candidate.bands(),
        compared_cells: 0,
        nodata_cells: 0,
        value_mismatches: 0,
        nodata_mask_mismatches: 0,
        max_abs_diff: 0.0,
        first_mismatch: None,
    };

    for (index, (&actual, &expected)) in candidate
        .samples()
        .iter()
        .zip(reference.samples())
        .enumerate()
    {
        let actual_nodata = candidate.is_nodata(actual);
        let expected_nodata = reference.is_nodata(expected);
        if actual_nodata && expected_nodata {
            summary.nodata_cells += 1;
            continue;
        }

        let location = || {
            let pixel = index / bands;
            CellLocation {
                band: (index % bands) as u16,
                row: (pixel / width) as u32,
                column: (pixel % width) as u32,
            }
        };

        if actual_nodata != expected_nodata {
            summary.nodata_mask_mismatches += 1;
            summary.first_mismatch.get_or_insert_with(location);
            continue;
        }

        summary.compared_cells += 1;
        let passes = if expected.is_finite() && actual.is_finite() {
            let comparison = compare_with_tolerance(expected, actual, *tolerance);
            summary.max_abs_diff = summary.max_abs_diff.max(comparison.abs_diff);
            comparison.passes
        } else {
            non_finite_values_match(expected, actual)
        };
        if !passes {
            summary.value_mismatches += 1;
            summary.first_mismatch.get_or_insert_with(location);
        }
    }

    debug!(
        compared = summary.compared_cells,
        value_mismatches = summary.value_mismatches,
        nodata_mask_mismatches = summary.nodata_mask_mismatches,
        "compared pixel grids"
    );
    ComparisonResult::from_pixel_summary(summary)
}

/// Compares two raster files. Shapes are checked from the headers first so
/// a mismatch never pays for decoding either grid.
pub fn compare_pixel_files(
    candidate: &RasterArtifact,
    reference: &RasterArtifact,
    tolerance: &PixelTolerance,
) -> Result<ComparisonResult, RasterError> {
    let candidate_metadata = extract_metadata(candidate)?;
    let reference_metadata = extract_metadata(reference)?;
    if let Some(reason) = shape_difference(
        (
            candidate_metadata.width,
            candidate_metadata.height,
            candidate_metadata.count,
        ),
        (
            reference_metadata.width,
            reference_metadata.height,
            reference_metadata.count,
        ),
    ) {
        return Ok(ComparisonResult::shape_mismatch(reason));
    }

    let candidate_grid = read_grid(candidate)?;
    let reference_grid = read_grid(reference)?;
    Ok(compare_grids(&candidate_grid, &reference_grid, tolerance))
}

fn shape_difference(candidate: (u32, u32, u16), reference: (u32, u32, u16)) -> Option<String> {
    (candidate != reference).then(|| {
        format!(
            "candidate is {}x{} with {} band(s) but reference is {}x{} with {} band(s)",
            candidate.0, candidate.1, candidate.2, reference.0, reference.1, reference.2
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{compare_grids, compare_pixel_files};
    use crate::compare::PixelTolerance;
    use crate::domain::{CellLocation, FailureKind, RasterArtifact};
    use crate::raster::RasterGrid;
    use crate::test_fixtures::GeoTiffBuilder;
    use tempfile::TempDir;

    fn grid(width: u32, height: u32, nodata: Option<f64>, samples: Vec<f64>) -> RasterGrid {
        RasterGrid::new(width, height, 1, nodata, samples).expect("grid should build")
    }

    #[test]
    fn identical_grids_have_no_deviation() {
        let reference = grid(3, 2, Some(-9999.0), vec![1.0, 2.0, -9999.0, 4.0, f64::NAN, 6.0]);
        let result = compare_grids(&reference, &reference.clone(), &PixelTolerance::default());

        assert!(result.passed);
        let summary = result.pixels.expect("pixel summary should be present");
        assert_eq!(summary.value_mismatches, 0);
        assert_eq!(summary.nodata_mask_mismatches, 0);
        assert_eq!(summary.max_abs_diff, 0.0);
        assert_eq!(summary.compared_cells, 5);
        assert_eq!(summary.nodata_cells, 1);
    }

    #[test]
    fn single_cell_beyond_tolerance_is_one_mismatch() {
        let reference = grid(3, 2, None, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let candidate = grid(3, 2, None, vec![1.0, 2.0, 3.0, 4.0, 5.5, 6.000_001]);
        let result = compare_grids(&candidate, &reference, &PixelTolerance::default());

        assert!(!result.passed);
        assert_eq!(result.failure, Some(FailureKind::ContentMismatch));
        let summary = result.pixels.expect("pixel summary should be present");
        assert_eq!(summary.value_mismatches, 1);
        assert_eq!(summary.max_abs_diff, 0.5);
        assert_eq!(
            summary.first_mismatch,
            Some(CellLocation {
                band: 0,
                row: 1,
                column: 1
            })
        );
    }

    #[test]
    fn shape_mismatch_short_circuits() {
        let reference = grid(2, 2, None, vec![0.0; 4]);
        let candidate = grid(4, 1, None, vec![0.0; 4]);
        let result = compare_grids(&candidate, &reference, &PixelTolerance::default());

        assert_eq!(result.failure, Some(FailureKind::ShapeMismatch));
        assert!(result.pixels.is_none());
        assert!(result.reason.expect("reason").contains("4x1"));
    }

    #[test]
    fn nodata_in_one_grid_only_is_a_mask_mismatch() {
        let reference = grid(2, 1, Some(-9999.0), vec![-9999.0, 1.0]);
        let candidate = grid(2, 1, Some(-9999.0), vec![0.0, -9999.0]);
        let result = compare_grids(&candidate, &reference, &PixelTolerance::default());

        let summary = result.pixels.expect("pixel summary should be present");
        assert_eq!(summary.nodata_mask_mismatches, 2);
        assert_eq!(summary.value_mismatches, 0);
        assert_eq!(summary.compared_cells, 0);
    }

    #[test]
    fn nan_nodata_matches_nan_cells_and_non_finite_values_match_exactly() {
        let reference = grid(3, 1, Some(f64::NAN), vec![f64::NAN, f64::INFINITY, 1.0]);
        let candidate = grid(3, 1, Some(f64::NAN), vec![f64::NAN, f64::INFINITY, 1.0]);
        assert!(compare_grids(&candidate, &reference, &PixelTolerance::default()).passed);

        let flipped = grid(3, 1, Some(f64::NAN), vec![f64::NAN, f64::NEG_INFINITY, 1.0]);
        let result = compare_grids(&flipped, &reference, &PixelTolerance::default());
        assert_eq!(result.pixels.expect("summary").value_mismatches, 1);
    }

    #[test]
    fn multi_band_locations_name_the_band() {
        let reference =
            RasterGrid::new(2, 1, 2, None, vec![0.0, 10.0, 1.0, 11.0]).expect("grid should build");
        let candidate =
            RasterGrid::new(2, 1, 2, None, vec![0.0, 10.0, 1.0, 12.0]).expect("grid should build");
        let result = compare_grids(&candidate, &reference, &PixelTolerance::default());
        assert_eq!(
            result.pixels.expect("summary").first_mismatch,
            Some(CellLocation {
                band: 1,
                row: 0,
                column: 1
            })
        );
    }

    #[test]
    fn compares_written_files() {
        let temp = TempDir::new().expect("tempdir should be created");
        let reference_path = temp.path().join("reference.tif");
        let candidate_path = temp.path().join("candidate.tif");
        let resized_path = temp.path().join("resized.tif");
        GeoTiffBuilder::new(32, 32)
            .tiled(16, 16)
            .write_to(&reference_path)
            .expect("reference should be written");
        GeoTiffBuilder::new(32, 32)
            .set_value(0, 31, 0, -1.0)
            .write_to(&candidate_path)
            .expect("candidate should be written");
        GeoTiffBuilder::new(16, 32)
            .write_to(&resized_path)
            .expect("resized should be written");

        let reference = RasterArtifact::from_path(&reference_path).expect("artifact");
        let candidate = RasterArtifact::from_path(&candidate_path).expect("artifact");
        let resized = RasterArtifact::from_path(&resized_path).expect("artifact");

        let tolerance = PixelTolerance::default();
        assert!(
            compare_pixel_files(&reference, &reference, &tolerance)
                .expect("comparison should run")
                .passed
        );

        let result =
            compare_pixel_files(&candidate, &reference, &tolerance).expect("comparison should run");
        let summary = result.pixels.expect("summary");
        assert_eq!(summary.value_mismatches, 1);
        assert_eq!(summary.first_mismatch.map(|cell| cell.row), Some(31));

        let result =
            compare_pixel_files(&resized, &reference, &tolerance).expect("comparison should run");
        assert_eq!(result.failure, Some(FailureKind::ShapeMismatch));
    }

    #[test]
    fn float32_nodata_not_representable_exactly_still_masks_cells() {
        let temp = TempDir::new().expect("tempdir should be created");
        let reference_path = temp.path().join("reference.tif");
        let candidate_path = temp.path().join("candidate.tif");
        GeoTiffBuilder::new(2, 2)
            .samples(vec![0.1, 0.1, 1.0, 2.0])
            .nodata("0.1")
            .write_to(&reference_path)
            .expect("reference should be written");
        GeoTiffBuilder::new(2, 2)
            .samples(vec![0.1, 0.100_000_1, 1.0, 2.0])
            .nodata("0.1")
            .write_to(&candidate_path)
            .expect("candidate should be written");

        let reference = RasterArtifact::from_path(&reference_path).expect("artifact");
        let candidate = RasterArtifact::from_path(&candidate_path).expect("artifact");
        let tolerance = PixelTolerance::default();

        let itself = compare_pixel_files(&reference, &reference, &tolerance)
            .expect("comparison should run");
        assert!(itself.passed);
        assert_eq!(itself.pixels.expect("summary").nodata_cells, 2);

        let result =
            compare_pixel_files(&candidate, &reference, &tolerance).expect("comparison should run");
        assert!(!result.passed);
        let summary = result.pixels.expect("summary");
        assert_eq!(summary.nodata_cells, 1);
        assert_eq!(summary.nodata_mask_mismatches, 1);
        assert_eq!(summary.compared_cells, 2);
        assert_eq!(
            summary.first_mismatch,
            Some(CellLocation {
                band: 0,
                row: 0,
                column: 1
            })
        );
    }
}
