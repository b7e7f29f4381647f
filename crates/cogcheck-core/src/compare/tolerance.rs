use serde::{Deserialize, Serialize};

/// Absolute/relative tolerance for one pixel comparison. A relative
/// tolerance of zero disables the relative check.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PixelTolerance {
    #[serde(rename = "absTol")]
    pub abs_tol: f64,
    #[serde(rename = "relTol")]
    pub rel_tol: f64,
    #[serde(rename = "relativeFloor")]
    pub relative_floor: f64,
}

impl Default for PixelTolerance {
    fn default() -> Self {
        Self {
            abs_tol: 1e-5,
            rel_tol: 0.0,
            relative_floor: 1e-12,
        }
    }
}

impl PixelTolerance {
    pub const fn exact() -> Self {
        Self {
            abs_tol: 0.0,
            rel_tol: 0.0,
            relative_floor: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceComparison {
    pub abs_diff: f64,
    pub rel_diff: f64,
    pub passes: bool,
}

pub fn compare_with_tolerance(
    reference: f64,
    candidate: f64,
    tolerance: PixelTolerance,
) -> ToleranceComparison {
    let abs_diff = (candidate - reference).abs();
    let rel_denominator = reference.abs().max(tolerance.relative_floor);
    let rel_diff = abs_diff / rel_denominator;
    let passes = abs_diff <= tolerance.abs_tol || abs_diff <= tolerance.rel_tol * rel_denominator;

    ToleranceComparison {
        abs_diff,
        rel_diff,
        passes,
    }
}

/// Non-finite values match only the identical non-finite value.
pub fn non_finite_values_match(left: f64, right: f64) -> bool {
    if left.is_nan() || right.is_nan() {
        return left.is_nan() && right.is_nan();
    }

    if left.is_infinite() || right.is_infinite() {
        return left.is_infinite() && right.is_infinite() && left.signum() == right.signum();
    }

    true
}

pub fn format_numeric(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }

    if value == f64::INFINITY {
        return "inf".to_string();
    }

    if value == f64::NEG_INFINITY {
        return "-inf".to_string();
    }

    format!("{value}")
}
