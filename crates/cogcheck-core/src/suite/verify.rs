use crate::compare::{compare_metadata, compare_pixel_files};
use crate::config::VerificationPolicy;
use crate::domain::{
    ComparisonResult, ExpectedSpec, FailureKind, RasterArtifact, RasterMetadata,
};
use crate::raster::{StructuralReason, StructuralReport, extract_metadata, validate_structure};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Result of running every check over one produced file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactVerdict {
    pub artifact_path: String,
    pub byte_size: u64,
    pub reference_path: String,
    pub passed: bool,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
    pub structure: StructuralReport,
    pub metadata: Option<RasterMetadata>,
    pub metadata_comparison: Option<ComparisonResult>,
    pub pixel_comparison: Option<ComparisonResult>,
}

impl ArtifactVerdict {
    fn fail(mut self, kind: FailureKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(
            artifact = %self.artifact_path,
            failure = %kind,
            "artifact failed verification: {}",
            reason
        );
        self.passed = false;
        self.failure = Some(kind);
        self.reason = Some(reason);
        self
    }
}

/// Structure, then metadata extraction, then the metadata comparison, then
/// the pixel comparison against `reference`. Stops at the first failing step.
pub fn verify_artifact(
    artifact: &RasterArtifact,
    expected: &ExpectedSpec,
    reference: &Path,
    policy: &VerificationPolicy,
) -> ArtifactVerdict {
    let structure = validate_structure(artifact, &policy.structure);
    let mut verdict = ArtifactVerdict {
        artifact_path: normalize_path(artifact.path()),
        byte_size: artifact.byte_size(),
        reference_path: normalize_path(reference),
        passed: false,
        failure: None,
        reason: None,
        structure,
        metadata: None,
        metadata_comparison: None,
        pixel_comparison: None,
    };

    if !verdict.structure.passed {
        let kind = if verdict.structure.reason == StructuralReason::Unreadable {
            FailureKind::UnreadableArtifact
        } else {
            FailureKind::StructuralMismatch
        };
        let reason = format!(
            "{}: {}",
            verdict.structure.reason,
            verdict.structure.detail.as_deref().unwrap_or("no detail")
        );
        return verdict.fail(kind, reason);
    }

    let metadata = match extract_metadata(artifact) {
        Ok(metadata) => metadata,
        Err(error) => return verdict.fail(error.failure_kind(), error.to_string()),
    };
    let metadata_comparison = compare_metadata(&metadata, expected, policy.transform_tolerance);
    verdict.metadata = Some(metadata);
    let metadata_failure = failure_of(&metadata_comparison);
    verdict.metadata_comparison = Some(metadata_comparison);
    if let Some((kind, reason)) = metadata_failure {
        return verdict.fail(kind, reason);
    }

    let reference_artifact = match RasterArtifact::from_path(reference) {
        Ok(reference_artifact) => reference_artifact,
        Err(error) => {
            return verdict.fail(
                FailureKind::UnreadableArtifact,
                format!(
                    "reference raster '{}' is unavailable: {}",
                    reference.display(),
                    error
                ),
            );
        }
    };
    let pixel_comparison =
        match compare_pixel_files(artifact, &reference_artifact, &policy.pixel_tolerance) {
            Ok(comparison) => comparison,
            Err(error) => return verdict.fail(error.failure_kind(), error.to_string()),
        };
    let pixel_failure = failure_of(&pixel_comparison);
    verdict.pixel_comparison = Some(pixel_comparison);
    if let Some((kind, reason)) = pixel_failure {
        return verdict.fail(kind, reason);
    }

    debug!(artifact = %verdict.artifact_path, "artifact passed every check");
    verdict.passed = true;
    verdict
}

fn failure_of(comparison: &ComparisonResult) -> Option<(FailureKind, String)> {
    if comparison.passed {
        return None;
    }
    let kind = comparison.failure.unwrap_or(FailureKind::ContentMismatch);
    let reason = comparison
        .reason
        .clone()
        .unwrap_or_else(|| format!("{} without a reason", kind));
    Some((kind, reason))
}

pub(crate) fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::verify_artifact;
    use crate::config::VerificationPolicy;
    use crate::domain::{Crs, ExpectedSpec, FailureKind, PixelDataType, RasterArtifact};
    use crate::test_fixtures::GeoTiffBuilder;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn cog() -> GeoTiffBuilder {
        GeoTiffBuilder::new(64, 32)
            .tiled(16, 16)
            .geographic(4326)
            .pixel_scale_and_tiepoint(0.25, 0.25, 0.0, -90.0)
            .nodata("-9999")
    }

    fn expected() -> ExpectedSpec {
        ExpectedSpec {
            driver: Some("GTiff".to_string()),
            dtype: Some(PixelDataType::Float32),
            nodata: Some(Some(-9999.0)),
            width: Some(64),
            height: Some(32),
            count: Some(1),
            crs: Some(Crs::epsg(4326)),
            transform: Some([0.25, 0.0, 0.0, 0.0, -0.25, -90.0]),
        }
    }

    fn write(dir: &Path, name: &str, builder: GeoTiffBuilder) -> std::path::PathBuf {
        let path = dir.join(name);
        builder.write_to(&path).expect("fixture should be written");
        path
    }

    #[test]
    fn matching_artifact_passes_every_step() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = write(temp.path(), "candidate.tif", cog());
        let reference = write(temp.path(), "reference.tif", cog());
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &reference,
            &VerificationPolicy::default(),
        );

        assert!(verdict.passed, "{:?}", verdict.reason);
        assert_eq!(verdict.failure, None);
        let pixels = verdict
            .pixel_comparison
            .and_then(|comparison| comparison.pixels)
            .expect("pixel summary should be recorded");
        assert_eq!(pixels.value_mismatches, 0);
        assert_eq!(pixels.max_abs_diff, 0.0);
    }

    #[test]
    fn stripped_artifact_stops_at_structure() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = write(temp.path(), "candidate.tif", cog().rows_per_strip(8));
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &temp.path().join("missing.tif"),
            &VerificationPolicy::default(),
        );

        assert_eq!(verdict.failure, Some(FailureKind::StructuralMismatch));
        assert!(verdict.metadata.is_none());
        assert!(verdict.reason.as_deref().is_some_and(|reason| reason.starts_with("NOT_TILED")));
    }

    #[test]
    fn garbage_file_is_unreadable() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = temp.path().join("candidate.tif");
        fs::write(&candidate, b"<html>not a raster</html>").expect("file should be written");
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &candidate,
            &VerificationPolicy::default(),
        );
        assert_eq!(verdict.failure, Some(FailureKind::UnreadableArtifact));
    }

    #[test]
    fn metadata_mismatch_skips_pixel_comparison() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = write(temp.path(), "candidate.tif", cog().nodata("nan"));
        let reference = write(temp.path(), "reference.tif", cog());
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &reference,
            &VerificationPolicy::default(),
        );

        assert_eq!(verdict.failure, Some(FailureKind::MetadataMismatch));
        assert!(verdict.pixel_comparison.is_none());
        assert!(verdict.reason.as_deref().is_some_and(|reason| reason.contains("nodata")));
    }

    #[test]
    fn single_changed_cell_is_a_content_mismatch() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = write(
            temp.path(),
            "candidate.tif",
            cog().set_value(0, 3, 5, 12345.0),
        );
        let reference = write(temp.path(), "reference.tif", cog());
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &reference,
            &VerificationPolicy::default(),
        );

        assert_eq!(verdict.failure, Some(FailureKind::ContentMismatch));
        let pixels = verdict
            .pixel_comparison
            .and_then(|comparison| comparison.pixels)
            .expect("pixel summary should be recorded");
        assert_eq!(pixels.value_mismatches, 1);
        let first = pixels.first_mismatch.expect("location should be recorded");
        assert_eq!((first.band, first.row, first.column), (0, 3, 5));
    }

    #[test]
    fn missing_reference_fails_the_artifact() {
        let temp = TempDir::new().expect("tempdir should be created");
        let candidate = write(temp.path(), "candidate.tif", cog());
        let artifact = RasterArtifact::from_path(&candidate).expect("artifact should exist");

        let verdict = verify_artifact(
            &artifact,
            &expected(),
            &temp.path().join("missing.tif"),
            &VerificationPolicy::default(),
        );
        assert_eq!(verdict.failure, Some(FailureKind::UnreadableArtifact));
        assert!(verdict.reason.as_deref().is_some_and(|reason| reason.contains("reference raster")));
    }
}
