//! Conversion and rejection scenarios against one deployment.

use super::verify::{ArtifactVerdict, verify_artifact};
use crate::config::{ConversionCase, OracleTable, RejectionCase, RunContext, VerificationPolicy};
use crate::domain::{CogCheckError, FailureKind, RasterArtifact};
use crate::service::{
    ConversionRequest, ConversionService, JobOutcome, JobState, JobStatus, ServiceError,
    wait_for_terminal,
};
use serde::Serialize;
use std::path::Path;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    Conversion,
    Rejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

impl ScenarioStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub case_id: String,
    pub kind: ScenarioKind,
    pub granule_id: String,
    pub variables: Vec<String>,
    pub status: ScenarioStatus,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
    /// Set when the scenario stopped on a harness or service error rather
    /// than a verification verdict.
    pub diagnostic: Option<String>,
    pub job_id: Option<String>,
    pub job_state: Option<JobState>,
    pub artifacts: Vec<ArtifactVerdict>,
}

impl ScenarioReport {
    fn new(case_id: &str, kind: ScenarioKind, granule_id: &str, variables: Vec<String>) -> Self {
        Self {
            case_id: case_id.to_string(),
            kind,
            granule_id: granule_id.to_string(),
            variables,
            status: ScenarioStatus::Passed,
            failure: None,
            reason: None,
            diagnostic: None,
            job_id: None,
            job_state: None,
            artifacts: Vec::new(),
        }
    }

    pub fn for_conversion(case: &ConversionCase) -> Self {
        Self::new(
            &case.id,
            ScenarioKind::Conversion,
            &case.granule_id,
            vec![case.variable.clone()],
        )
    }

    pub fn for_rejection(case: &RejectionCase) -> Self {
        Self::new(
            &case.id,
            ScenarioKind::Rejection,
            &case.granule_id,
            case.variables.clone(),
        )
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = ScenarioStatus::Skipped;
        self.reason = Some(reason.into());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == ScenarioStatus::Failed
    }

    fn failed(mut self, kind: FailureKind, reason: impl Into<String>) -> Self {
        self.status = ScenarioStatus::Failed;
        self.failure = Some(kind);
        self.reason = Some(reason.into());
        warn!(
            case = %self.case_id,
            failure = %kind,
            "scenario failed: {}",
            self.reason.as_deref().unwrap_or_default()
        );
        self
    }

    fn errored(mut self, kind: Option<FailureKind>, error: CogCheckError) -> Self {
        self.status = ScenarioStatus::Failed;
        self.failure = kind;
        self.reason = Some(error.message().to_string());
        self.diagnostic = Some(error.diagnostic_line());
        warn!(case = %self.case_id, "{}", error.diagnostic_line());
        self
    }

    fn record_job(&mut self, status: &JobStatus) {
        self.job_id = Some(status.job_id.to_string());
        self.job_state = Some(status.state);
    }
}

/// Converts one variable, downloads the outputs into a scratch directory
/// and verifies every file against the case's reference raster.
#[instrument(skip_all, fields(case = %case.id))]
pub fn run_conversion_scenario(
    service: &dyn ConversionService,
    context: &RunContext,
    table: &OracleTable,
    case: &ConversionCase,
    policy: &VerificationPolicy,
    workspace_root: Option<&Path>,
) -> ScenarioReport {
    let report = ScenarioReport::for_conversion(case);
    let reference = table.reference_path(case);
    if !reference.is_file() {
        return report.errored(
            None,
            CogCheckError::input_validation(
                "INPUT.REFERENCE_MISSING",
                format!(
                    "reference raster '{}' for case '{}' does not exist",
                    reference.display(),
                    case.id
                ),
            ),
        );
    }

    let workspace = match scenario_workspace(&case.id, workspace_root) {
        Ok(workspace) => workspace,
        Err(error) => return report.errored(None, error),
    };

    let request = ConversionRequest::new(
        &context.collection_id,
        &case.granule_id,
        vec![case.variable.clone()],
    )
    .with_max_results(policy.max_results);

    let (mut report, job) = match submit_and_wait(service, report, &request, policy) {
        Ok((report, JobOutcome::Succeeded(job))) => (report, job),
        Ok((report, outcome)) => {
            return report.failed(FailureKind::UnexpectedJobOutcome, outcome.describe());
        }
        Err((report, error)) => {
            return report.errored(
                Some(FailureKind::UnexpectedJobOutcome),
                CogCheckError::from(error),
            );
        }
    };

    let downloaded = match service.download_results(&job, workspace.path()) {
        Ok(paths) => paths,
        Err(error) => return report.errored(None, CogCheckError::from(error)),
    };
    info!(
        case = %case.id,
        files = downloaded.len(),
        workspace = %workspace.path().display(),
        "downloaded job outputs"
    );
    if downloaded.len() != case.expected_file_count {
        return report.failed(
            FailureKind::UnexpectedJobOutcome,
            format!(
                "job {} produced {} file(s), expected {}",
                job.job_id,
                downloaded.len(),
                case.expected_file_count
            ),
        );
    }

    for path in downloaded {
        let verdict = match RasterArtifact::from_path(&path) {
            Ok(artifact) => verify_artifact(&artifact, &case.expected_metadata, &reference, policy),
            Err(error) => {
                return report.errored(
                    Some(FailureKind::UnreadableArtifact),
                    CogCheckError::io_system(
                        "IO.ARTIFACT_READ",
                        format!("failed to stat artifact '{}': {}", path.display(), error),
                    ),
                );
            }
        };
        report.artifacts.push(verdict);
    }

    let first_failure = report
        .artifacts
        .iter()
        .find(|verdict| !verdict.passed)
        .map(|verdict| {
            (
                verdict.failure.unwrap_or(FailureKind::ContentMismatch),
                format!(
                    "{}: {}",
                    verdict.artifact_path,
                    verdict.reason.as_deref().unwrap_or("verification failed")
                ),
            )
        });
    match first_failure {
        Some((kind, reason)) => report.failed(kind, reason),
        None => {
            info!(case = %case.id, "conversion scenario passed");
            report
        }
    }
}

/// Submits a request the service must refuse and checks the refusal
/// message. A 4xx refusal of the submission itself counts as the job
/// failing with the service's description.
#[instrument(skip_all, fields(case = %case.id))]
pub fn run_rejection_scenario(
    service: &dyn ConversionService,
    context: &RunContext,
    case: &RejectionCase,
    policy: &VerificationPolicy,
) -> ScenarioReport {
    let report = ScenarioReport::for_rejection(case);
    let request = ConversionRequest::new(
        &context.collection_id,
        &case.granule_id,
        case.variables.clone(),
    )
    .with_max_results(policy.max_results);

    let (report, message) = match submit_and_wait(service, report, &request, policy) {
        Ok((report, JobOutcome::Failed { message, .. })) => (report, message),
        Ok((report, outcome)) => {
            return report.failed(
                FailureKind::UnexpectedJobOutcome,
                format!("expected the request to be rejected but {}", outcome.describe()),
            );
        }
        Err((report, error)) => match error.rejection_description() {
            Some(description) => {
                let description = description.to_string();
                (report, description)
            }
            None => {
                return report.errored(
                    Some(FailureKind::UnexpectedJobOutcome),
                    CogCheckError::from(error),
                );
            }
        },
    };

    if message.contains(&case.expected_message) {
        info!(case = %case.id, "rejection scenario passed");
        report
    } else {
        report.failed(
            FailureKind::UnexpectedJobOutcome,
            format!(
                "rejection message '{}' does not contain '{}'",
                message, case.expected_message
            ),
        )
    }
}

type SubmitResult = Result<(ScenarioReport, JobOutcome), (ScenarioReport, ServiceError)>;

fn submit_and_wait(
    service: &dyn ConversionService,
    mut report: ScenarioReport,
    request: &ConversionRequest,
    policy: &VerificationPolicy,
) -> SubmitResult {
    let submitted = match service.submit(request) {
        Ok(submitted) => submitted,
        Err(error) => return Err((report, error)),
    };
    info!(
        job = %submitted.job_id,
        granule = %request.granule_id,
        variables = %request.variables.join(","),
        "submitted conversion request"
    );
    report.record_job(&submitted);

    match wait_for_terminal(service, submitted, &policy.polling) {
        Ok(outcome) => {
            match &outcome {
                JobOutcome::Succeeded(status) => report.record_job(status),
                JobOutcome::Failed { status, .. } => report.record_job(status),
                JobOutcome::TimedOut { last, .. } => report.record_job(last),
            }
            Ok((report, outcome))
        }
        Err(error) => Err((report, error)),
    }
}

fn scenario_workspace(case_id: &str, root: Option<&Path>) -> Result<TempDir, CogCheckError> {
    let prefix = format!("cogcheck-{}-", case_id);
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let workspace = match root {
        Some(root) => std::fs::create_dir_all(root).and_then(|()| builder.tempdir_in(root)),
        None => builder.tempdir(),
    };
    workspace.map_err(|error| {
        CogCheckError::io_system(
            "IO.WORKSPACE",
            format!("failed to create scenario workspace: {}", error),
        )
    })
}
