use crate::compare::{DEFAULT_TRANSFORM_TOLERANCE, PixelTolerance};
use crate::domain::CogCheckError;
use crate::raster::StructuralPolicy;
use crate::service::PollPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const VERIFICATION_POLICY_PATH: &str = "tasks/verification-policy.json";

/// Every tunable threshold of a verification run. Keys missing from the
/// policy file keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct VerificationPolicy {
    pub pixel_tolerance: PixelTolerance,
    pub transform_tolerance: f64,
    pub structure: StructuralPolicy,
    pub polling: PollPolicy,
    pub max_results: u32,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            pixel_tolerance: PixelTolerance::default(),
            transform_tolerance: DEFAULT_TRANSFORM_TOLERANCE,
            structure: StructuralPolicy::default(),
            polling: PollPolicy::default(),
            max_results: 1,
        }
    }
}

impl VerificationPolicy {
    pub fn validate(&self) -> Result<(), String> {
        let tolerance = self.pixel_tolerance;
        for (name, value) in [
            ("pixelTolerance.absTol", tolerance.abs_tol),
            ("pixelTolerance.relTol", tolerance.rel_tol),
            ("pixelTolerance.relativeFloor", tolerance.relative_floor),
            ("transformTolerance", self.transform_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a finite non-negative number", name));
            }
        }

        let structure = self.structure;
        if structure.min_tile_size == 0 || structure.min_tile_size > structure.max_tile_size {
            return Err(format!(
                "structure tile size range [{}, {}] is empty",
                structure.min_tile_size, structure.max_tile_size
            ));
        }
        if self.polling.interval.is_zero() || self.polling.timeout.is_zero() {
            return Err("polling interval and timeout must be positive".to_string());
        }
        if self.max_results == 0 {
            return Err("maxResults must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read verification policy '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse verification policy '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid verification policy '{}': {detail}", path.display())]
    Invalid { path: PathBuf, detail: String },
}

impl From<PolicyError> for CogCheckError {
    fn from(error: PolicyError) -> Self {
        let message = error.to_string();
        match error {
            PolicyError::Read { .. } => CogCheckError::io_system("IO.POLICY_READ", message),
            PolicyError::Parse { .. } => CogCheckError::input_validation("INPUT.POLICY_PARSE", message),
            PolicyError::Invalid { .. } => {
                CogCheckError::input_validation("INPUT.POLICY_INVALID", message)
            }
        }
    }
}

pub fn load_verification_policy(
    policy_path: impl AsRef<Path>,
) -> Result<VerificationPolicy, PolicyError> {
    let policy_path = policy_path.as_ref();
    let source = fs::read_to_string(policy_path).map_err(|source| PolicyError::Read {
        path: policy_path.to_path_buf(),
        source,
    })?;
    let policy: VerificationPolicy =
        serde_json::from_str(&source).map_err(|source| PolicyError::Parse {
            path: policy_path.to_path_buf(),
            source,
        })?;
    policy.validate().map_err(|detail| PolicyError::Invalid {
        path: policy_path.to_path_buf(),
        detail,
    })?;
    Ok(policy)
}
