use super::geotiff::read_nodata;
use super::{RasterError, open_decoder};
use crate::domain::RasterArtifact;
use tiff::decoder::DecodingResult;
use tiff::tags::Tag;

const PLANAR_CONFIGURATION_SEPARATE: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decoded {actual} samples but {width}x{height}x{bands} requires {expected}")]
pub struct GridShapeError {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub expected: usize,
    pub actual: usize,
}

/// Fully decoded pixel grid of one raster, pixel-interleaved
/// (`(row * width + column) * bands + band`).
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    width: u32,
    height: u32,
    bands: u16,
    nodata: Option<f64>,
    samples: Vec<f64>,
}

impl RasterGrid {
    pub fn new(
        width: u32,
        height: u32,
        bands: u16,
        nodata: Option<f64>,
        samples: Vec<f64>,
    ) -> Result<Self, GridShapeError> {
        let expected = width as usize * height as usize * bands as usize;
        if samples.len() != expected {
            return Err(GridShapeError {
                width,
                height,
                bands,
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bands,
            nodata,
            samples,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn bands(&self) -> u16 {
        self.bands
    }

    pub const fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn value(&self, band: u16, row: u32, column: u32) -> Option<f64> {
        if band >= self.bands || row >= self.height || column >= self.width {
            return None;
        }
        let index = (row as usize * self.width as usize + column as usize) * self.bands as usize
            + band as usize;
        self.samples.get(index).copied()
    }

    /// NaN nodata marks NaN cells; otherwise the cell must equal nodata exactly.
    pub fn is_nodata(&self, value: f64) -> bool {
        match self.nodata {
            Some(nodata) if nodata.is_nan() => value.is_nan(),
            Some(nodata) => value == nodata,
            None => false,
        }
    }
}

/// Decodes every band of the first image into a grid.
pub fn read_grid(artifact: &RasterArtifact) -> Result<RasterGrid, RasterError> {
    let mut decoder = open_decoder(artifact)?;
    let decode = |source| RasterError::decode(artifact, source);

    let (width, height) = decoder.dimensions().map_err(decode)?;
    let bands = decoder
        .find_tag(Tag::SamplesPerPixel)
        .map_err(decode)?
        .map(|value| value.into_u16())
        .transpose()
        .map_err(decode)?
        .unwrap_or(1);
    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)
        .map_err(decode)?
        .map(|value| value.into_u16())
        .transpose()
        .map_err(decode)?
        .unwrap_or(1);
    if planar == PLANAR_CONFIGURATION_SEPARATE && bands > 1 {
        return Err(RasterError::unsupported(
            artifact,
            "band-separate planar configuration",
        ));
    }

    let nodata = read_nodata(&mut decoder).map_err(decode)?;
    let decoded = decoder.read_image().map_err(decode)?;
    let nodata = nodata.map(|nodata| nodata_in_sample_type(nodata, &decoded));
    let samples = decoding_result_to_f64(decoded);

    RasterGrid::new(width, height, bands, nodata, samples).map_err(|source| RasterError::Shape {
        path: artifact.path().to_path_buf(),
        source,
    })
}

/// Casts nodata to the band's sample type, so a float32 band declaring
/// `0.1` matches cells stored as `0.1_f32`.
fn nodata_in_sample_type(nodata: f64, decoded: &DecodingResult) -> f64 {
    match decoded {
        DecodingResult::F32(_) => f64::from(nodata as f32),
        _ => nodata,
    }
}

fn decoding_result_to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U16(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::U64(values) => values.into_iter().map(|value| value as f64).collect(),
        DecodingResult::I8(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I16(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::I64(values) => values.into_iter().map(|value| value as f64).collect(),
        DecodingResult::F32(values) => values.into_iter().map(f64::from).collect(),
        DecodingResult::F64(values) => values,
    }
}
