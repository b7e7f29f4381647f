pub mod crs;
pub mod errors;

pub use crs::{Crs, CrsParseError};
pub use errors::{CogCheckError, CogCheckResult, ErrorCategory, ExitMapping, FailureKind};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

/// A produced raster file on local storage. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterArtifact {
    path: PathBuf,
    byte_size: u64,
}

impl RasterArtifact {
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let byte_size = fs::metadata(&path)?.len();
        Ok(Self { path, byte_size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelDataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

impl PixelDataType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub const fn bits(self) -> u16 {
        match self {
            Self::Uint8 | Self::Int8 => 8,
            Self::Uint16 | Self::Int16 => 16,
            Self::Uint32 | Self::Int32 | Self::Float32 => 32,
            Self::Uint64 | Self::Int64 | Self::Float64 => 64,
        }
    }
}

impl Display for PixelDataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Pixel-to-map affine transform in `a, b, c, d, e, f` order:
/// `x = a * col + b * row + c`, `y = d * col + e * row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 1.0,
        f: 0.0,
    };

    pub const fn from_coefficients(coefficients: [f64; 6]) -> Self {
        Self {
            a: coefficients[0],
            b: coefficients[1],
            c: coefficients[2],
            d: coefficients[3],
            e: coefficients[4],
            f: coefficients[5],
        }
    }

    pub const fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    pub fn apply(&self, column: f64, row: f64) -> (f64, f64) {
        (
            self.a * column + self.b * row + self.c,
            self.d * column + self.e * row + self.f,
        )
    }
}

impl Display for AffineTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {}, {})",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterMetadata {
    pub driver: String,
    pub dtype: PixelDataType,
    pub nodata: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub count: u16,
    pub crs: Option<Crs>,
    pub transform: AffineTransform,
}

impl RasterMetadata {
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize * self.count as usize
    }
}

/// Expected metadata for one test case. Keys follow the rasterio profile
/// names; a field left out of the oracle is not checked.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedSpec {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub dtype: Option<PixelDataType>,
    /// `Some(None)` expects the artifact to declare no nodata value.
    #[serde(default, deserialize_with = "deserialize_expected_nodata")]
    pub nodata: Option<Option<f64>>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub count: Option<u16>,
    #[serde(default)]
    pub crs: Option<Crs>,
    #[serde(default)]
    pub transform: Option<[f64; 6]>,
}

impl ExpectedSpec {
    pub fn field_count(&self) -> usize {
        [
            self.driver.is_some(),
            self.dtype.is_some(),
            self.nodata.is_some(),
            self.width.is_some(),
            self.height.is_some(),
            self.count.is_some(),
            self.crs.is_some(),
            self.transform.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNodata {
    Number(f64),
    Text(String),
}

fn deserialize_expected_nodata<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawNodata>::deserialize(deserializer)?;
    let value = match raw {
        None => None,
        Some(RawNodata::Number(value)) => Some(value),
        Some(RawNodata::Text(text)) => Some(parse_nodata_text(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid nodata value '{}'", text))
        })?),
    };
    Ok(Some(value))
}

/// Parses nodata the way GDAL writes it into the `GDAL_NODATA` tag.
pub fn parse_nodata_text(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('\0').trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => trimmed.parse::<f64>().ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellLocation {
    pub band: u16,
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelMismatchSummary {
    pub band_count: u16,
    pub compared_cells: usize,
    pub nodata_cells: usize,
    pub value_mismatches: usize,
    pub nodata_mask_mismatches: usize,
    pub max_abs_diff: f64,
    pub first_mismatch: Option<CellLocation>,
}

impl PixelMismatchSummary {
    pub fn is_clean(&self) -> bool {
        self.value_mismatches == 0 && self.nodata_mask_mismatches == 0
    }
}

/// Outcome of one validation pass over one artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub passed: bool,
    pub failure: Option<FailureKind>,
    pub field_mismatches: Vec<FieldMismatch>,
    pub pixels: Option<PixelMismatchSummary>,
    pub reason: Option<String>,
}

impl ComparisonResult {
    pub fn from_field_mismatches(field_mismatches: Vec<FieldMismatch>) -> Self {
        let passed = field_mismatches.is_empty();
        let reason = (!passed).then(|| {
            let fields = field_mismatches
                .iter()
                .map(|mismatch| {
                    format!(
                        "{} (expected {}, actual {})",
                        mismatch.field, mismatch.expected, mismatch.actual
                    )
                })
                .collect::<Vec<_>>();
            format!(
                "{} metadata field(s) differ: {}",
                field_mismatches.len(),
                fields.join("; ")
            )
        });

        Self {
            passed,
            failure: (!passed).then_some(FailureKind::MetadataMismatch),
            field_mismatches,
            pixels: None,
            reason,
        }
    }

    pub fn shape_mismatch(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure: Some(FailureKind::ShapeMismatch),
            field_mismatches: Vec::new(),
            pixels: None,
            reason: Some(reason.into()),
        }
    }

    pub fn from_pixel_summary(summary: PixelMismatchSummary) -> Self {
        let passed = summary.is_clean();
        let reason = (!passed).then(|| {
            let location = summary
                .first_mismatch
                .map(|cell| {
                    format!(
                        " First mismatch at band {} row {} column {}.",
                        cell.band, cell.row, cell.column
                    )
                })
                .unwrap_or_default();
            format!(
                "{} value mismatch(es) and {} nodata-mask mismatch(es) across {} compared cells (max abs diff {:e}).{}",
                summary.value_mismatches,
                summary.nodata_mask_mismatches,
                summary.compared_cells,
                summary.max_abs_diff,
                location
            )
        });

        Self {
            passed,
            failure: (!passed).then_some(FailureKind::ContentMismatch),
            field_mismatches: Vec::new(),
            pixels: Some(summary),
            reason,
        }
    }
}
