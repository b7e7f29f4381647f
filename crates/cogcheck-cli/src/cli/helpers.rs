use super::CliError;
use anyhow::Context;
use cogcheck_core::config::{
    VERIFICATION_POLICY_PATH, VerificationPolicy, load_verification_policy,
};
use cogcheck_core::domain::CogCheckError;
use cogcheck_core::suite::ArtifactVerdict;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub(super) fn compute_error(error: impl Into<CogCheckError>) -> CliError {
    CliError::Compute(error.into())
}

/// An explicit policy path must load. Without one the default policy file
/// is used when present, otherwise the built-in defaults.
pub(super) fn load_policy(explicit: Option<&Path>) -> Result<VerificationPolicy, CliError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(VERIFICATION_POLICY_PATH)).filter(|path| path.is_file()),
    };
    match path {
        Some(path) => {
            debug!(policy = %path.display(), "loading verification policy");
            load_verification_policy(&path).map_err(compute_error)
        }
        None => Ok(VerificationPolicy::default()),
    }
}

pub(super) fn to_pretty_json<T: Serialize>(value: &T, what: &str) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", what))
        .map_err(CliError::from)
}

pub(super) fn render_verdict(verdict: &ArtifactVerdict) -> String {
    let mut lines = Vec::new();
    let status = if verdict.passed { "PASS" } else { "FAIL" };
    lines.push(format!("Verification status: {}", status));
    lines.push(format!(
        "Artifact: {} ({} bytes)",
        verdict.artifact_path, verdict.byte_size
    ));
    lines.push(format!("Reference: {}", verdict.reference_path));
    lines.push(format!("Structure: {}", verdict.structure.reason));
    for warning in &verdict.structure.warnings {
        lines.push(format!("  warning: {}", warning));
    }
    if let Some(comparison) = &verdict.metadata_comparison {
        lines.push(format!(
            "Metadata: {} ({} mismatch(es))",
            if comparison.passed { "PASS" } else { "FAIL" },
            comparison.field_mismatches.len()
        ));
    }
    if let Some(comparison) = &verdict.pixel_comparison {
        let cells = comparison
            .pixels
            .as_ref()
            .map_or(0, |summary| summary.compared_cells);
        lines.push(format!(
            "Pixels: {} ({} cells compared)",
            if comparison.passed { "PASS" } else { "FAIL" },
            cells
        ));
    }
    if let (Some(kind), Some(reason)) = (verdict.failure, &verdict.reason) {
        lines.push(format!("  failure: {} ({})", kind, reason));
    }
    lines.join("\n")
}
