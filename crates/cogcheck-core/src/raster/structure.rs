use super::layout::{ImageLayout, RasterLayout, inspect_layout};
use crate::domain::RasterArtifact;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::debug;

const TILE_SIZE_QUANTUM: u32 = 16;
const MAIN_IFD_OFFSET_LIMIT: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct StructuralPolicy {
    pub min_tile_size: u32,
    pub max_tile_size: u32,
    /// Images whose larger side exceeds this must carry overviews and more
    /// than one tile.
    pub overview_threshold: u32,
}

impl Default for StructuralPolicy {
    fn default() -> Self {
        Self {
            min_tile_size: 16,
            max_tile_size: 4096,
            overview_threshold: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructuralReason {
    Ok,
    Unreadable,
    NotTiled,
    TileSizeOutOfRange,
    SingleTile,
    MissingOverviews,
    OverviewNotTiled,
    OverviewNotDecreasing,
}

impl StructuralReason {
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Unreadable => "UNREADABLE",
            Self::NotTiled => "NOT_TILED",
            Self::TileSizeOutOfRange => "TILE_SIZE_OUT_OF_RANGE",
            Self::SingleTile => "SINGLE_TILE",
            Self::MissingOverviews => "MISSING_OVERVIEWS",
            Self::OverviewNotTiled => "OVERVIEW_NOT_TILED",
            Self::OverviewNotDecreasing => "OVERVIEW_NOT_DECREASING",
        }
    }
}

impl Display for StructuralReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralReport {
    pub passed: bool,
    pub reason: StructuralReason,
    pub detail: Option<String>,
    pub layout: Option<RasterLayout>,
    /// Cloud-optimized ordering hints; never fail the check.
    pub warnings: Vec<String>,
}

impl StructuralReport {
    fn failed(reason: StructuralReason, detail: String, layout: Option<RasterLayout>) -> Self {
        Self {
            passed: false,
            reason,
            detail: Some(detail),
            layout,
            warnings: Vec::new(),
        }
    }
}

pub fn validate_structure(artifact: &RasterArtifact, policy: &StructuralPolicy) -> StructuralReport {
    let report = match inspect_layout(artifact) {
        Ok(layout) => evaluate_layout(layout, policy),
        Err(error) => StructuralReport::failed(StructuralReason::Unreadable, error.to_string(), None),
    };
    debug!(
        artifact = %artifact.path().display(),
        reason = %report.reason,
        warnings = report.warnings.len(),
        "structural validation finished"
    );
    report
}

/// Applies the COG structural rules to an inspected layout, stopping at the
/// first violated rule.
pub fn evaluate_layout(layout: RasterLayout, policy: &StructuralPolicy) -> StructuralReport {
    match first_violation(&layout, policy) {
        Some((reason, detail)) => StructuralReport::failed(reason, detail, Some(layout)),
        None => StructuralReport {
            passed: true,
            reason: StructuralReason::Ok,
            detail: None,
            warnings: layout_warnings(&layout),
            layout: Some(layout),
        },
    }
}

fn first_violation(
    layout: &RasterLayout,
    policy: &StructuralPolicy,
) -> Option<(StructuralReason, String)> {
    let main = &layout.main;
    if !main.tiled {
        return Some((
            StructuralReason::NotTiled,
            format!("main image {}x{} is stored in strips", main.width, main.height),
        ));
    }
    if let Some(detail) = tile_size_violation(main, policy) {
        return Some((StructuralReason::TileSizeOutOfRange, detail));
    }

    let needs_overviews = main.max_side() > policy.overview_threshold;
    if needs_overviews && main.is_single_block() {
        return Some((
            StructuralReason::SingleTile,
            format!(
                "main image {}x{} is a single {}x{} tile",
                main.width, main.height, main.block_width, main.block_height
            ),
        ));
    }
    if needs_overviews && layout.overviews.is_empty() {
        return Some((
            StructuralReason::MissingOverviews,
            format!(
                "main image {}x{} exceeds {} pixels but has no overviews",
                main.width, main.height, policy.overview_threshold
            ),
        ));
    }

    let mut previous = main;
    for (level, overview) in layout.overviews.iter().enumerate() {
        if !overview.tiled {
            return Some((
                StructuralReason::OverviewNotTiled,
                format!(
                    "overview {} ({}x{}) is stored in strips",
                    level + 1,
                    overview.width,
                    overview.height
                ),
            ));
        }
        let shrinks = overview.width <= previous.width
            && overview.height <= previous.height
            && overview.max_side() < previous.max_side();
        if !shrinks {
            return Some((
                StructuralReason::OverviewNotDecreasing,
                format!(
                    "overview {} ({}x{}) is not smaller than {}x{}",
                    level + 1,
                    overview.width,
                    overview.height,
                    previous.width,
                    previous.height
                ),
            ));
        }
        previous = overview;
    }

    None
}

fn tile_size_violation(image: &ImageLayout, policy: &StructuralPolicy) -> Option<String> {
    let valid = |side: u32| {
        side % TILE_SIZE_QUANTUM == 0 && (policy.min_tile_size..=policy.max_tile_size).contains(&side)
    };
    if valid(image.block_width) && valid(image.block_height) {
        return None;
    }
    Some(format!(
        "tile {}x{} must be a multiple of {} within [{}, {}]",
        image.block_width,
        image.block_height,
        TILE_SIZE_QUANTUM,
        policy.min_tile_size,
        policy.max_tile_size
    ))
}

fn layout_warnings(layout: &RasterLayout) -> Vec<String> {
    let mut warnings = Vec::new();
    if layout.main_ifd_offset > MAIN_IFD_OFFSET_LIMIT {
        warnings.push(format!(
            "main IFD starts at byte {}, beyond the first {} bytes",
            layout.main_ifd_offset, MAIN_IFD_OFFSET_LIMIT
        ));
    }

    let mut larger = &layout.main;
    for (level, overview) in layout.overviews.iter().enumerate() {
        if let (Some(offset), Some(larger_offset)) =
            (overview.first_block_offset, larger.first_block_offset)
        {
            if offset > larger_offset {
                warnings.push(format!(
                    "overview {} data starts at byte {}, after the next larger level at byte {}",
                    level + 1,
                    offset,
                    larger_offset
                ));
            }
        }
        larger = overview;
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::{StructuralPolicy, StructuralReason, evaluate_layout, validate_structure};
    use crate::domain::RasterArtifact;
    use crate::raster::layout::{ImageLayout, RasterLayout};
    use crate::test_fixtures::GeoTiffBuilder;
    use std::fs;
    use tempfile::TempDir;

    fn image(width: u32, height: u32, tile: Option<u32>, offset: u64) -> ImageLayout {
        let (tiled, block_width, block_height) = match tile {
            Some(side) => (true, side, side),
            None => (false, width, 1),
        };
        ImageLayout {
            width,
            height,
            tiled,
            block_width,
            block_height,
            block_count: u64::from(width.div_ceil(block_width))
                * u64::from(height.div_ceil(block_height)),
            first_block_offset: Some(offset),
        }
    }

    fn layout(main: ImageLayout, overviews: Vec<ImageLayout>) -> RasterLayout {
        RasterLayout {
            big_tiff: false,
            main_ifd_offset: 8,
            main,
            overviews,
            mask_count: 0,
        }
    }

    fn reason_for(layout: RasterLayout) -> StructuralReason {
        evaluate_layout(layout, &StructuralPolicy::default()).reason
    }

    #[test]
    fn well_formed_cog_passes_without_warnings() {
        let report = evaluate_layout(
            layout(
                image(1440, 720, Some(256), 9000),
                vec![image(720, 360, Some(256), 5000), image(360, 180, Some(256), 1000)],
            ),
            &StructuralPolicy::default(),
        );
        assert!(report.passed);
        assert_eq!(report.reason, StructuralReason::Ok);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn each_rule_reports_its_reason_code() {
        assert_eq!(
            reason_for(layout(image(1440, 720, None, 100), vec![])),
            StructuralReason::NotTiled
        );
        assert_eq!(
            reason_for(layout(image(1440, 720, Some(200), 100), vec![])),
            StructuralReason::TileSizeOutOfRange
        );
        assert_eq!(
            reason_for(layout(image(1440, 720, Some(8192), 100), vec![])),
            StructuralReason::TileSizeOutOfRange
        );
        assert_eq!(
            reason_for(layout(image(1024, 1024, Some(1024), 100), vec![])),
            StructuralReason::SingleTile
        );
        assert_eq!(
            reason_for(layout(image(1440, 720, Some(256), 100), vec![])),
            StructuralReason::MissingOverviews
        );
        assert_eq!(
            reason_for(layout(
                image(1440, 720, Some(256), 100),
                vec![image(720, 360, None, 50)]
            )),
            StructuralReason::OverviewNotTiled
        );
        assert_eq!(
            reason_for(layout(
                image(1440, 720, Some(256), 100),
                vec![image(720, 360, Some(256), 60), image(720, 360, Some(256), 50)]
            )),
            StructuralReason::OverviewNotDecreasing
        );
    }

    #[test]
    fn small_raster_without_overviews_passes() {
        let report = evaluate_layout(
            layout(image(256, 128, Some(256), 100), vec![]),
            &StructuralPolicy::default(),
        );
        assert!(report.passed, "{:?}", report.detail);
    }

    #[test]
    fn ordering_problems_are_warnings_only() {
        let mut misordered = layout(
            image(1440, 720, Some(256), 1000),
            vec![image(720, 360, Some(256), 5000)],
        );
        misordered.main_ifd_offset = 4096;
        let report = evaluate_layout(misordered, &StructuralPolicy::default());

        assert!(report.passed);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("main IFD starts at byte 4096"));
        assert!(report.warnings[1].contains("overview 1"));
    }

    #[test]
    fn validates_written_files_end_to_end() {
        let temp = TempDir::new().expect("tempdir should be created");
        let policy = StructuralPolicy {
            overview_threshold: 64,
            ..StructuralPolicy::default()
        };

        let cog = temp.path().join("cog.tif");
        GeoTiffBuilder::new(128, 96)
            .tiled(32, 32)
            .overview(64, 48)
            .write_to(&cog)
            .expect("fixture should be written");
        let report = validate_structure(
            &RasterArtifact::from_path(&cog).expect("artifact should exist"),
            &policy,
        );
        assert!(report.passed, "{:?}", report.detail);

        let stripped = temp.path().join("stripped.tif");
        GeoTiffBuilder::new(128, 96)
            .write_to(&stripped)
            .expect("fixture should be written");
        let report = validate_structure(
            &RasterArtifact::from_path(&stripped).expect("artifact should exist"),
            &policy,
        );
        assert_eq!(report.reason, StructuralReason::NotTiled);

        let late_ifd = temp.path().join("late-ifd.tif");
        GeoTiffBuilder::new(32, 32)
            .tiled(16, 16)
            .ifds_after_data()
            .write_to(&late_ifd)
            .expect("fixture should be written");
        let report = validate_structure(
            &RasterArtifact::from_path(&late_ifd).expect("artifact should exist"),
            &policy,
        );
        assert!(report.passed);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn unreadable_file_fails_first_check() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("broken.tif");
        fs::write(&path, b"II*\0garbage").expect("file should be written");

        let report = validate_structure(
            &RasterArtifact::from_path(&path).expect("artifact should exist"),
            &StructuralPolicy::default(),
        );
        assert!(!report.passed);
        assert_eq!(report.reason, StructuralReason::Unreadable);
        assert!(report.layout.is_none());
    }

    #[test]
    fn policy_keys_are_camel_case_with_defaults() {
        let policy: StructuralPolicy =
            serde_json::from_str(r#"{ "overviewThreshold": 1024 }"#).expect("policy should parse");
        assert_eq!(policy.overview_threshold, 1024);
        assert_eq!(policy.min_tile_size, 16);
        assert_eq!(policy.max_tile_size, 4096);
    }
}
