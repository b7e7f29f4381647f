//! Image file directory layout: which IFDs exist, how they are blocked and
//! where their data starts.

use super::{ArtifactDecoder, RasterError, open_decoder};
use crate::domain::RasterArtifact;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use tiff::tags::Tag;

const SUBFILE_REDUCED_RESOLUTION: u32 = 0x1;
const SUBFILE_MASK: u32 = 0x4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub tiled: bool,
    pub block_width: u32,
    pub block_height: u32,
    pub block_count: u64,
    pub first_block_offset: Option<u64>,
}

impl ImageLayout {
    pub fn max_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn is_single_block(&self) -> bool {
        self.block_count <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterLayout {
    pub big_tiff: bool,
    pub main_ifd_offset: u64,
    pub main: ImageLayout,
    /// Reduced resolution levels in file order.
    pub overviews: Vec<ImageLayout>,
    pub mask_count: usize,
}

/// Walks every IFD of the artifact. The first directory is the full
/// resolution image; later reduced resolution directories are overviews and
/// mask directories are counted but otherwise ignored.
pub fn inspect_layout(artifact: &RasterArtifact) -> Result<RasterLayout, RasterError> {
    let mut decoder = open_decoder(artifact)?;
    let (big_tiff, main_ifd_offset) = read_header(artifact)?;
    let main = read_image_layout(artifact, &mut decoder)?;

    let mut overviews = Vec::new();
    let mut mask_count = 0;
    while decoder.more_images() {
        decoder
            .next_image()
            .map_err(|source| RasterError::decode(artifact, source))?;
        let subfile_type = decoder
            .find_tag(Tag::NewSubfileType)
            .map_err(|source| RasterError::decode(artifact, source))?
            .map(|value| value.into_u32())
            .transpose()
            .map_err(|source| RasterError::decode(artifact, source))?
            .unwrap_or(0);

        if subfile_type & SUBFILE_MASK != 0 {
            mask_count += 1;
        } else if subfile_type & SUBFILE_REDUCED_RESOLUTION != 0 {
            overviews.push(read_image_layout(artifact, &mut decoder)?);
        }
    }

    Ok(RasterLayout {
        big_tiff,
        main_ifd_offset,
        main,
        overviews,
        mask_count,
    })
}

fn read_image_layout(
    artifact: &RasterArtifact,
    decoder: &mut ArtifactDecoder,
) -> Result<ImageLayout, RasterError> {
    let decode = |source| RasterError::decode(artifact, source);

    let (width, height) = decoder.dimensions().map_err(decode)?;
    let tiled = decoder.find_tag(Tag::TileWidth).map_err(decode)?.is_some();
    let (block_width, block_height) = decoder.chunk_dimensions();
    let offsets_tag = if tiled {
        Tag::TileOffsets
    } else {
        Tag::StripOffsets
    };
    let first_block_offset = decoder
        .find_tag(offsets_tag)
        .map_err(decode)?
        .map(|value| value.into_u64_vec())
        .transpose()
        .map_err(decode)?
        .and_then(|offsets| offsets.first().copied());

    let block_count = if block_width == 0 || block_height == 0 {
        0
    } else {
        u64::from(width.div_ceil(block_width)) * u64::from(height.div_ceil(block_height))
    };

    Ok(ImageLayout {
        width,
        height,
        tiled,
        block_width,
        block_height,
        block_count,
        first_block_offset,
    })
}

// The decoder does not expose directory offsets, so read them off the header.
fn read_header(artifact: &RasterArtifact) -> Result<(bool, u64), RasterError> {
    let mut header = Vec::with_capacity(16);
    File::open(artifact.path())
        .and_then(|file| file.take(16).read_to_end(&mut header))
        .map_err(|source| RasterError::Open {
            path: artifact.path().to_path_buf(),
            source,
        })?;

    parse_header(&header)
        .ok_or_else(|| RasterError::unsupported(artifact, "malformed TIFF header"))
}

/// Returns `(is_big_tiff, first_ifd_offset)` from the raw file header.
pub fn parse_header(header: &[u8]) -> Option<(bool, u64)> {
    let little_endian = match header.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let read_u16 = |bytes: &[u8]| -> Option<u16> {
        let bytes: [u8; 2] = bytes.try_into().ok()?;
        Some(if little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    };

    match read_u16(header.get(2..4)?)? {
        42 => {
            let bytes: [u8; 4] = header.get(4..8)?.try_into().ok()?;
            let offset = if little_endian {
                u32::from_le_bytes(bytes)
            } else {
                u32::from_be_bytes(bytes)
            };
            Some((false, u64::from(offset)))
        }
        43 => {
            let bytes: [u8; 8] = header.get(8..16)?.try_into().ok()?;
            let offset = if little_endian {
                u64::from_le_bytes(bytes)
            } else {
                u64::from_be_bytes(bytes)
            };
            Some((true, offset))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{inspect_layout, parse_header};
    use crate::domain::RasterArtifact;
    use crate::test_fixtures::GeoTiffBuilder;
    use tempfile::TempDir;

    #[test]
    fn header_parsing_handles_both_byte_orders_and_bigtiff() {
        assert_eq!(parse_header(b"II\x2a\x00\x08\x00\x00\x00"), Some((false, 8)));
        assert_eq!(parse_header(b"MM\x00\x2a\x00\x00\x01\x00"), Some((false, 256)));
        assert_eq!(
            parse_header(b"II\x2b\x00\x08\x00\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00"),
            Some((true, 16))
        );
        assert_eq!(parse_header(b"GIF89a"), None);
        assert_eq!(parse_header(b"II"), None);
    }

    #[test]
    fn tiled_image_with_overviews_is_walked_in_file_order() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("cog.tif");
        GeoTiffBuilder::new(128, 64)
            .tiled(32, 32)
            .overview(64, 32)
            .overview(32, 16)
            .write_to(&path)
            .expect("fixture should be written");

        let artifact = RasterArtifact::from_path(&path).expect("artifact should exist");
        let layout = inspect_layout(&artifact).expect("layout should be inspected");

        assert!(!layout.big_tiff);
        assert_eq!(layout.main_ifd_offset, 8);
        assert!(layout.main.tiled);
        assert_eq!((layout.main.block_width, layout.main.block_height), (32, 32));
        assert_eq!(layout.main.block_count, 8);
        assert_eq!(layout.overviews.len(), 2);
        assert_eq!(
            (layout.overviews[0].width, layout.overviews[0].height),
            (64, 32)
        );
        assert_eq!(layout.overviews[1].block_count, 1);
        assert_eq!(layout.mask_count, 0);

        let main_offset = layout.main.first_block_offset.expect("main has blocks");
        let overview_offset = layout.overviews[0]
            .first_block_offset
            .expect("overview has blocks");
        assert!(overview_offset < main_offset);
    }

    #[test]
    fn stripped_image_reports_strip_blocks() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("strips.tif");
        GeoTiffBuilder::new(40, 30)
            .rows_per_strip(8)
            .write_to(&path)
            .expect("fixture should be written");

        let artifact = RasterArtifact::from_path(&path).expect("artifact should exist");
        let layout = inspect_layout(&artifact).expect("layout should be inspected");
        assert!(!layout.main.tiled);
        assert_eq!((layout.main.block_width, layout.main.block_height), (40, 8));
        assert_eq!(layout.main.block_count, 4);
        assert!(layout.overviews.is_empty());
    }
}
