//! Metadata and pixel comparators.

pub mod metadata;
pub mod pixels;
pub mod tolerance;

pub use metadata::{DEFAULT_TRANSFORM_TOLERANCE, compare_metadata};
pub use pixels::{compare_grids, compare_pixel_files};
pub use tolerance::{
    PixelTolerance, ToleranceComparison, compare_with_tolerance, format_numeric,
    non_finite_values_match,
};
