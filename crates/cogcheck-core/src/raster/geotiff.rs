//! GeoTIFF tag decoding: GeoKey directory, model tie points and transforms,
//! and the GDAL nodata tag.

use super::ArtifactDecoder;
use crate::domain::{AffineTransform, Crs, parse_nodata_text};
use tiff::TiffResult;
use tiff::decoder::ifd::Value;
use tiff::tags::Tag;

pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub const MODEL_TIEPOINT_TAG: u16 = 33922;
pub const MODEL_TRANSFORMATION_TAG: u16 = 34264;
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
pub const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
pub const GEO_ASCII_PARAMS_TAG: u16 = 34737;
pub const GDAL_NODATA_TAG: u16 = 42113;

pub const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

pub const MODEL_TYPE_PROJECTED: u16 = 1;
pub const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub const RASTER_PIXEL_IS_AREA: u16 = 1;
pub const RASTER_PIXEL_IS_POINT: u16 = 2;
pub const USER_DEFINED_KEY_VALUE: u16 = 32767;

/// Resolves a numeric tag code to the decoder's tag type, named or not.
pub fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoKeyEntry {
    pub key_id: u16,
    pub location: u16,
    pub count: u16,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoKeyDirectory {
    entries: Vec<GeoKeyEntry>,
}

impl GeoKeyDirectory {
    pub fn parse(raw: &[u16]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }

        let declared = raw[3] as usize;
        let entries = raw[4..]
            .chunks_exact(4)
            .take(declared)
            .map(|chunk| GeoKeyEntry {
                key_id: chunk[0],
                location: chunk[1],
                count: chunk[2],
                value: chunk[3],
            })
            .collect::<Vec<_>>();
        Some(Self { entries })
    }

    pub fn entries(&self) -> &[GeoKeyEntry] {
        &self.entries
    }

    /// Value of a key stored inline in the directory (location 0).
    pub fn short_value(&self, key_id: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.key_id == key_id && entry.location == 0)
            .map(|entry| entry.value)
    }

    pub fn crs(&self) -> Option<Crs> {
        let code = self
            .short_value(PROJECTED_CS_TYPE_GEO_KEY)
            .or_else(|| self.short_value(GEOGRAPHIC_TYPE_GEO_KEY))?;
        (code != 0 && code != USER_DEFINED_KEY_VALUE).then(|| Crs::epsg(u32::from(code)))
    }

    pub fn pixel_is_point(&self) -> bool {
        self.short_value(GT_RASTER_TYPE_GEO_KEY) == Some(RASTER_PIXEL_IS_POINT)
    }
}

/// Builds the pixel-to-map transform from whichever model tags are present,
/// preferring the full transformation matrix over tie point + scale.
pub fn transform_from_tags(
    pixel_scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
    transformation: Option<&[f64]>,
    pixel_is_point: bool,
) -> AffineTransform {
    let mut transform = match (transformation, pixel_scale, tiepoint) {
        (Some(matrix), _, _) if matrix.len() >= 16 => AffineTransform {
            a: matrix[0],
            b: matrix[1],
            c: matrix[3],
            d: matrix[4],
            e: matrix[5],
            f: matrix[7],
        },
        (_, Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let a = scale[0];
            let e = -scale[1];
            AffineTransform {
                a,
                b: 0.0,
                c: tie[3] - tie[0] * a,
                d: 0.0,
                e,
                f: tie[4] - tie[1] * e,
            }
        }
        _ => AffineTransform::IDENTITY,
    };

    if pixel_is_point {
        transform.c -= 0.5 * transform.a + 0.5 * transform.b;
        transform.f -= 0.5 * transform.d + 0.5 * transform.e;
    }
    transform
}

pub(crate) fn find_f64_vec(decoder: &mut ArtifactDecoder, code: u16) -> TiffResult<Option<Vec<f64>>> {
    decoder
        .find_tag(tag(code))?
        .map(|value| value.into_f64_vec())
        .transpose()
}

pub(crate) fn find_u16_vec(decoder: &mut ArtifactDecoder, code: u16) -> TiffResult<Option<Vec<u16>>> {
    decoder
        .find_tag(tag(code))?
        .map(short_values)
        .transpose()
}

/// Widens a SHORT tag to a vector. A single-count SHORT decodes as
/// `Value::Unsigned`, which `Value::into_u16_vec` rejects.
pub(crate) fn short_values(value: Value) -> TiffResult<Vec<u16>> {
    if let Value::Short(single) = value {
        return Ok(vec![single]);
    }
    value
        .into_u32_vec()?
        .into_iter()
        .map(|raw| Ok(u16::try_from(raw)?))
        .collect()
}

pub(crate) fn read_geokeys(decoder: &mut ArtifactDecoder) -> TiffResult<GeoKeyDirectory> {
    Ok(find_u16_vec(decoder, GEO_KEY_DIRECTORY_TAG)?
        .and_then(|raw| GeoKeyDirectory::parse(&raw))
        .unwrap_or_default())
}

pub(crate) fn read_georeferencing(
    decoder: &mut ArtifactDecoder,
) -> TiffResult<(Option<Crs>, AffineTransform)> {
    let geokeys = read_geokeys(decoder)?;
    let pixel_scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE_TAG)?;
    let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT_TAG)?;
    let transformation = find_f64_vec(decoder, MODEL_TRANSFORMATION_TAG)?;

    let transform = transform_from_tags(
        pixel_scale.as_deref(),
        tiepoint.as_deref(),
        transformation.as_deref(),
        geokeys.pixel_is_point(),
    );
    Ok((geokeys.crs(), transform))
}

pub(crate) fn read_nodata(decoder: &mut ArtifactDecoder) -> TiffResult<Option<f64>> {
    let Some(value) = decoder.find_tag(tag(GDAL_NODATA_TAG))? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    Ok(parse_nodata_text(&text))
}
