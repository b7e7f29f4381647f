//! Raster artifact readers built on the `tiff` decoder.
//!
//! Everything here reads GeoTIFF headers and blocks directly; no GDAL.

pub mod geotiff;
pub mod layout;
pub mod metadata;
pub mod pixels;
pub mod structure;

pub use layout::{ImageLayout, RasterLayout, inspect_layout};
pub use metadata::extract_metadata;
pub use pixels::{GridShapeError, RasterGrid, read_grid};
pub use structure::{StructuralPolicy, StructuralReason, StructuralReport, validate_structure};

use crate::domain::{CogCheckError, FailureKind, RasterArtifact};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tiff::decoder::Decoder;

/// Driver name reported for every artifact that decodes as (Big)TIFF,
/// matching GDAL's short name.
pub const GTIFF_DRIVER: &str = "GTiff";

pub(crate) type ArtifactDecoder = Decoder<BufReader<File>>;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("artifact '{}' is empty", path.display())]
    Empty { path: PathBuf },
    #[error("failed to open artifact '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("artifact '{}' is not a readable TIFF: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: tiff::TiffError,
    },
    #[error("artifact '{}' uses an unsupported layout: {detail}", path.display())]
    Unsupported { path: PathBuf, detail: String },
    #[error("artifact '{}': {source}", path.display())]
    Shape {
        path: PathBuf,
        source: GridShapeError,
    },
}

impl RasterError {
    pub(crate) fn decode(artifact: &RasterArtifact, source: tiff::TiffError) -> Self {
        Self::Decode {
            path: artifact.path().to_path_buf(),
            source,
        }
    }

    pub(crate) fn unsupported(artifact: &RasterArtifact, detail: impl Into<String>) -> Self {
        Self::Unsupported {
            path: artifact.path().to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Every reader failure means the artifact cannot be trusted as a raster.
    pub const fn failure_kind(&self) -> FailureKind {
        FailureKind::UnreadableArtifact
    }
}

impl From<RasterError> for CogCheckError {
    fn from(error: RasterError) -> Self {
        let message = error.to_string();
        match error {
            RasterError::Open { .. } => CogCheckError::io_system("IO.ARTIFACT_OPEN", message),
            _ => CogCheckError::verification(FailureKind::UnreadableArtifact, message),
        }
    }
}

pub(crate) fn open_decoder(artifact: &RasterArtifact) -> Result<ArtifactDecoder, RasterError> {
    if artifact.byte_size() == 0 {
        return Err(RasterError::Empty {
            path: artifact.path().to_path_buf(),
        });
    }

    let file = File::open(artifact.path()).map_err(|source| RasterError::Open {
        path: artifact.path().to_path_buf(),
        source,
    })?;
    Decoder::new(BufReader::new(file)).map_err(|source| RasterError::decode(artifact, source))
}
