use super::geotiff::{read_georeferencing, read_nodata, short_values};
use super::{ArtifactDecoder, GTIFF_DRIVER, RasterError, open_decoder};
use crate::domain::{PixelDataType, RasterArtifact, RasterMetadata};
use tiff::tags::Tag;
use tracing::debug;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_IEEE_FP: u16 = 3;
const SAMPLE_FORMAT_VOID: u16 = 4;

/// Reads the profile of the first image directory. Pixel blocks are never
/// decoded here.
pub fn extract_metadata(artifact: &RasterArtifact) -> Result<RasterMetadata, RasterError> {
    let mut decoder = open_decoder(artifact)?;
    let metadata = read_metadata(artifact, &mut decoder)?;
    debug!(
        artifact = %artifact.path().display(),
        dtype = %metadata.dtype,
        width = metadata.width,
        height = metadata.height,
        count = metadata.count,
        "extracted raster metadata"
    );
    Ok(metadata)
}

pub(crate) fn read_metadata(
    artifact: &RasterArtifact,
    decoder: &mut ArtifactDecoder,
) -> Result<RasterMetadata, RasterError> {
    let decode = |source| RasterError::decode(artifact, source);

    let (width, height) = decoder.dimensions().map_err(decode)?;
    let count = decoder
        .find_tag(Tag::SamplesPerPixel)
        .map_err(decode)?
        .map(|value| value.into_u16())
        .transpose()
        .map_err(decode)?
        .unwrap_or(1);
    if width == 0 || height == 0 || count == 0 {
        return Err(RasterError::unsupported(
            artifact,
            format!("empty raster {}x{} with {} band(s)", width, height, count),
        ));
    }

    let bits = uniform_sample_value(artifact, decoder, Tag::BitsPerSample, 1, "BitsPerSample")?;
    let sample_format = uniform_sample_value(
        artifact,
        decoder,
        Tag::SampleFormat,
        SAMPLE_FORMAT_UINT,
        "SampleFormat",
    )?;
    let dtype = pixel_data_type(bits, sample_format).ok_or_else(|| {
        RasterError::unsupported(
            artifact,
            format!(
                "{}-bit samples with SampleFormat {} have no pixel data type",
                bits, sample_format
            ),
        )
    })?;

    let nodata = read_nodata(decoder).map_err(decode)?;
    let (crs, transform) = read_georeferencing(decoder).map_err(decode)?;

    Ok(RasterMetadata {
        driver: GTIFF_DRIVER.to_string(),
        dtype,
        nodata,
        width,
        height,
        count,
        crs,
        transform,
    })
}

/// Maps `BitsPerSample` + `SampleFormat` onto a pixel data type.
pub fn pixel_data_type(bits: u16, sample_format: u16) -> Option<PixelDataType> {
    match (sample_format, bits) {
        (SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_VOID, 8) => Some(PixelDataType::Uint8),
        (SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_VOID, 16) => Some(PixelDataType::Uint16),
        (SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_VOID, 32) => Some(PixelDataType::Uint32),
        (SAMPLE_FORMAT_UINT | SAMPLE_FORMAT_VOID, 64) => Some(PixelDataType::Uint64),
        (SAMPLE_FORMAT_INT, 8) => Some(PixelDataType::Int8),
        (SAMPLE_FORMAT_INT, 16) => Some(PixelDataType::Int16),
        (SAMPLE_FORMAT_INT, 32) => Some(PixelDataType::Int32),
        (SAMPLE_FORMAT_INT, 64) => Some(PixelDataType::Int64),
        (SAMPLE_FORMAT_IEEE_FP, 32) => Some(PixelDataType::Float32),
        (SAMPLE_FORMAT_IEEE_FP, 64) => Some(PixelDataType::Float64),
        _ => None,
    }
}

// Per-sample tags must agree across bands; mixed layouts have no single dtype.
fn uniform_sample_value(
    artifact: &RasterArtifact,
    decoder: &mut ArtifactDecoder,
    tag: Tag,
    default: u16,
    name: &str,
) -> Result<u16, RasterError> {
    let values = decoder
        .find_tag(tag)
        .map_err(|source| RasterError::decode(artifact, source))?
        .map(short_values)
        .transpose()
        .map_err(|source| RasterError::decode(artifact, source))?
        .unwrap_or_default();

    let Some(&first) = values.first() else {
        return Ok(default);
    };
    if values.iter().any(|value| *value != first) {
        return Err(RasterError::unsupported(
            artifact,
            format!("{} differs between bands: {:?}", name, values),
        ));
    }
    Ok(first)
}
