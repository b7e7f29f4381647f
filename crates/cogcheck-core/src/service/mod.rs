//! Remote conversion service: request and job types, the service seam and
//! the job poll loop.

pub mod harmony;
pub mod poll;

pub use harmony::HarmonyClient;
pub use poll::{JobOutcome, PollPolicy, wait_for_terminal};

use crate::domain::CogCheckError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Requests every variable of a granule.
pub const ALL_VARIABLES: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub collection_id: String,
    pub granule_id: String,
    pub variables: Vec<String>,
    pub max_results: u32,
}

impl ConversionRequest {
    pub fn new(
        collection_id: impl Into<String>,
        granule_id: impl Into<String>,
        variables: Vec<String>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            granule_id: granule_id.into(),
            variables,
            max_results: 1,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// True when the request names exactly one concrete variable.
    pub fn is_single_variable(&self) -> bool {
        self.variables.len() == 1 && self.variables[0] != ALL_VARIABLES
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Accepted,
    Running,
    RunningWithErrors,
    Paused,
    Previewing,
    Successful,
    Failed,
    Canceled,
    CompleteWithErrors,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Failed | Self::Canceled | Self::CompleteWithErrors
        )
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Successful)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::RunningWithErrors => "running_with_errors",
            Self::Paused => "paused",
            Self::Previewing => "previewing",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::CompleteWithErrors => "complete_with_errors",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLink {
    pub href: String,
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
}

/// Job document as returned by the job status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(rename = "jobID")]
    pub job_id: JobId,
    #[serde(rename = "status")]
    pub state: JobState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub links: Vec<JobLink>,
}

impl JobStatus {
    pub fn data_links(&self) -> impl Iterator<Item = &JobLink> {
        self.links
            .iter()
            .filter(|link| link.rel.as_deref() == Some("data"))
    }
}

/// The seam between the scenario runner and the remote service.
pub trait ConversionService {
    fn submit(&self, request: &ConversionRequest) -> Result<JobStatus, ServiceError>;

    fn status(&self, job_id: &JobId) -> Result<JobStatus, ServiceError>;

    /// Downloads every data link of a finished job into `destination` and
    /// returns the written paths in link order.
    fn download_results(
        &self,
        job: &JobStatus,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, ServiceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid service URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },
    #[error("request to '{url}' failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("service rejected request to '{url}' with HTTP {status}: {description}")]
    Rejected {
        url: String,
        status: u16,
        description: String,
    },
    #[error("failed to decode response from '{url}': {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
    #[error("failed to write download '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unexpected service response: {0}")]
    Protocol(String),
}

impl ServiceError {
    /// Client-side rejections carry the service's own explanation.
    pub fn rejection_description(&self) -> Option<&str> {
        match self {
            Self::Rejected {
                status,
                description,
                ..
            } if (400..500).contains(status) => Some(description),
            _ => None,
        }
    }
}

impl From<ServiceError> for CogCheckError {
    fn from(error: ServiceError) -> Self {
        let message = error.to_string();
        match error {
            ServiceError::InvalidUrl { .. } => {
                CogCheckError::input_validation("INPUT.SERVICE_URL", message)
            }
            ServiceError::Transport { .. } => {
                CogCheckError::service("SERVICE.TRANSPORT", message)
            }
            ServiceError::Rejected { .. } => CogCheckError::service("SERVICE.REJECTED", message),
            ServiceError::Decode { .. } => CogCheckError::service("SERVICE.RESPONSE_DECODE", message),
            ServiceError::Write { .. } => CogCheckError::io_system("IO.DOWNLOAD_WRITE", message),
            ServiceError::Protocol(_) => CogCheckError::service("SERVICE.PROTOCOL", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversionRequest, JobState, JobStatus, ServiceError};
    use crate::domain::ErrorCategory;

    #[test]
    fn job_document_deserializes_from_service_json() {
        let status: JobStatus = serde_json::from_str(
            r#"{
              "username": "tester",
              "status": "successful",
              "message": "The job has completed successfully",
              "progress": 100,
              "createdAt": "2024-01-01T00:00:00.000Z",
              "links": [
                { "href": "https://harmony.uat.earthdata.nasa.gov/jobs/abc", "title": "Job Status", "rel": "self", "type": "application/json" },
                { "href": "https://example.test/outputs/G1__sss_smap.tif", "title": "G1__sss_smap.tif", "rel": "data", "type": "image/tiff" }
              ],
              "jobID": "abc"
            }"#,
        )
        .expect("job document should parse");

        assert_eq!(status.job_id.as_str(), "abc");
        assert_eq!(status.state, JobState::Successful);
        assert_eq!(status.progress, 100);
        let data = status.data_links().collect::<Vec<_>>();
        assert_eq!(data.len(), 1);
        assert!(data[0].href.ends_with("G1__sss_smap.tif"));
    }

    #[test]
    fn terminal_states_are_classified() {
        for state in [
            JobState::Accepted,
            JobState::Running,
            JobState::RunningWithErrors,
            JobState::Paused,
            JobState::Previewing,
            JobState::Unknown,
        ] {
            assert!(!state.is_terminal(), "{} should not be terminal", state);
        }
        for state in [
            JobState::Failed,
            JobState::Canceled,
            JobState::CompleteWithErrors,
        ] {
            assert!(state.is_terminal() && !state.is_success());
        }
        assert!(JobState::Successful.is_success());

        let unknown: JobState =
            serde_json::from_str(r#""some_new_state""#).expect("unknown state should parse");
        assert_eq!(unknown, JobState::Unknown);
    }

    #[test]
    fn single_variable_excludes_all_sentinel() {
        let single = ConversionRequest::new("C1", "G1", vec!["sss_smap".to_string()]);
        assert!(single.is_single_variable());
        assert_eq!(single.max_results, 1);
        assert!(!ConversionRequest::new("C1", "G1", vec!["all".to_string()]).is_single_variable());
        assert!(
            !ConversionRequest::new("C1", "G1", vec!["a".to_string(), "b".to_string()])
                .is_single_variable()
        );
    }

    #[test]
    fn service_errors_map_to_categories() {
        let rejected = ServiceError::Rejected {
            url: "https://example.test".to_string(),
            status: 400,
            description: "Error: only one variable".to_string(),
        };
        assert_eq!(rejected.rejection_description(), Some("Error: only one variable"));
        let error = crate::domain::CogCheckError::from(rejected);
        assert_eq!(error.category(), ErrorCategory::ServiceError);
        assert_eq!(error.placeholder(), "SERVICE.REJECTED");

        let server_side = ServiceError::Rejected {
            url: "https://example.test".to_string(),
            status: 503,
            description: "unavailable".to_string(),
        };
        assert_eq!(server_side.rejection_description(), None);
    }
}
