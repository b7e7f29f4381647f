use super::tolerance::format_numeric;
use crate::domain::{ComparisonResult, ExpectedSpec, FieldMismatch, RasterMetadata};
use tracing::debug;

pub const DEFAULT_TRANSFORM_TOLERANCE: f64 = 1e-9;

/// Checks every field present in `expected` against the extracted profile
/// and reports all of the mismatches, not just the first.
pub fn compare_metadata(
    actual: &RasterMetadata,
    expected: &ExpectedSpec,
    transform_tolerance: f64,
) -> ComparisonResult {
    let mut mismatches = Vec::new();
    let mut check = |field: &'static str, matches: bool, expected: String, actual: String| {
        if !matches {
            mismatches.push(FieldMismatch {
                field,
                expected,
                actual,
            });
        }
    };

    if let Some(driver) = &expected.driver {
        check("driver", *driver == actual.driver, driver.clone(), actual.driver.clone());
    }
    if let Some(dtype) = expected.dtype {
        check(
            "dtype",
            dtype == actual.dtype,
            dtype.to_string(),
            actual.dtype.to_string(),
        );
    }
    if let Some(nodata) = expected.nodata {
        check(
            "nodata",
            nodata_equal(nodata, actual.nodata),
            format_nodata(nodata),
            format_nodata(actual.nodata),
        );
    }
    if let Some(width) = expected.width {
        check("width", width == actual.width, width.to_string(), actual.width.to_string());
    }
    if let Some(height) = expected.height {
        check(
            "height",
            height == actual.height,
            height.to_string(),
            actual.height.to_string(),
        );
    }
    if let Some(count) = expected.count {
        check("count", count == actual.count, count.to_string(), actual.count.to_string());
    }
    if let Some(crs) = &expected.crs {
        check(
            "crs",
            actual.crs.as_ref() == Some(crs),
            crs.to_string(),
            actual
                .crs
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string),
        );
    }
    if let Some(coefficients) = expected.transform {
        let actual_coefficients = actual.transform.coefficients();
        let within = coefficients
            .iter()
            .zip(actual_coefficients.iter())
            .all(|(expected, actual)| (expected - actual).abs() <= transform_tolerance);
        check(
            "transform",
            within,
            format_coefficients(&coefficients),
            format_coefficients(&actual_coefficients),
        );
    }

    debug!(
        checked = expected.field_count(),
        mismatched = mismatches.len(),
        "compared raster metadata"
    );
    ComparisonResult::from_field_mismatches(mismatches)
}

fn nodata_equal(expected: Option<f64>, actual: Option<f64>) -> bool {
    match (expected, actual) {
        (None, None) => true,
        (Some(expected), Some(actual)) if expected.is_nan() || actual.is_nan() => {
            expected.is_nan() && actual.is_nan()
        }
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

fn format_nodata(value: Option<f64>) -> String {
    value.map_or_else(|| "null".to_string(), format_numeric)
}

fn format_coefficients(coefficients: &[f64; 6]) -> String {
    let values = coefficients
        .iter()
        .map(|value| format_numeric(*value))
        .collect::<Vec<_>>();
    format!("({})", values.join(", "))
}
