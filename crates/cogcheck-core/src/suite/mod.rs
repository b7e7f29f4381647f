//! Suite runner: resolves the deployment, runs every selected oracle case
//! and writes the JSON report.

pub mod scenario;
pub mod verify;

pub use scenario::{
    ScenarioKind, ScenarioReport, ScenarioStatus, run_conversion_scenario, run_rejection_scenario,
};
pub use verify::{ArtifactVerdict, verify_artifact};

use crate::config::{
    CaseFilter, Environment, EnvironmentResolution, OracleTable, RunContext, VerificationPolicy,
};
use crate::domain::{CogCheckError, CogCheckResult};
use crate::service::{ConversionService, ServiceError};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use verify::normalize_path;

pub const DEFAULT_REPORT_PATH: &str = "artifacts/regression/cogcheck-report.json";

const FAIL_FAST_SKIP: &str = "skipped after an earlier failure (fail-fast)";

#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub oracle_path: PathBuf,
    pub policy: VerificationPolicy,
    pub report_path: PathBuf,
    /// Parent directory for scenario scratch directories; the system temp
    /// directory when unset.
    pub workspace_root: Option<PathBuf>,
    pub case_filter: CaseFilter,
    pub fail_fast: bool,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            oracle_path: PathBuf::from(crate::config::ORACLE_TABLE_PATH),
            policy: VerificationPolicy::default(),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            workspace_root: None,
            case_filter: CaseFilter::all(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub generated_at_unix_seconds: u64,
    pub passed: bool,
    pub environment_selector: String,
    pub environment: Option<Environment>,
    pub service_url: Option<String>,
    pub skip_notice: Option<String>,
    pub oracle_path: String,
    pub case_filter: Vec<String>,
    pub scenario_count: usize,
    pub passed_scenario_count: usize,
    pub failed_scenario_count: usize,
    pub skipped_scenario_count: usize,
    pub policy: VerificationPolicy,
    pub scenarios: Vec<ScenarioReport>,
}

/// Runs every selected case of `table` against the resolved deployment.
///
/// `connect` is only called for a supported environment, so an unsupported
/// selector never reaches the network. A case whose granule the deployment
/// does not provision is skipped.
pub fn run_suite<F>(
    config: &SuiteConfig,
    table: &OracleTable,
    selector: &str,
    resolution: &EnvironmentResolution,
    connect: F,
) -> CogCheckResult<SuiteReport>
where
    F: FnOnce(&RunContext) -> Result<Box<dyn ConversionService>, ServiceError>,
{
    let scenarios = match resolution {
        EnvironmentResolution::Unsupported { .. } => {
            let notice = resolution.skip_notice().unwrap_or_default();
            warn!("{}", notice);
            selected_scenarios(table, &config.case_filter)
                .map(|scenario| scenario.skeleton().skipped(notice.clone()))
                .collect()
        }
        EnvironmentResolution::Supported(context) => {
            info!(
                environment = %context.environment,
                service = %context.service_url,
                "running verification suite"
            );
            let service = connect(context).map_err(CogCheckError::from)?;
            run_scenarios(config, table, context, service.as_ref())
        }
    };

    let report = build_report(config, selector, resolution, scenarios);
    write_report_file(&config.report_path, &report).map_err(CogCheckError::from)?;
    Ok(report)
}

enum SelectedScenario<'a> {
    Conversion(&'a crate::config::ConversionCase),
    Rejection(&'a crate::config::RejectionCase),
}

impl SelectedScenario<'_> {
    fn skeleton(&self) -> ScenarioReport {
        match self {
            Self::Conversion(case) => ScenarioReport::for_conversion(case),
            Self::Rejection(case) => ScenarioReport::for_rejection(case),
        }
    }

    fn granule_id(&self) -> &str {
        match self {
            Self::Conversion(case) => &case.granule_id,
            Self::Rejection(case) => &case.granule_id,
        }
    }
}

fn selected_scenarios<'a>(
    table: &'a OracleTable,
    filter: &'a CaseFilter,
) -> impl Iterator<Item = SelectedScenario<'a>> + 'a {
    table
        .conversions
        .iter()
        .map(SelectedScenario::Conversion)
        .chain(table.rejections.iter().map(SelectedScenario::Rejection))
        .filter(move |scenario| match scenario {
            SelectedScenario::Conversion(case) => filter.matches(&case.id),
            SelectedScenario::Rejection(case) => filter.matches(&case.id),
        })
}

fn run_scenarios(
    config: &SuiteConfig,
    table: &OracleTable,
    context: &RunContext,
    service: &dyn ConversionService,
) -> Vec<ScenarioReport> {
    let mut reports = Vec::new();
    let mut stop = false;
    for scenario in selected_scenarios(table, &config.case_filter) {
        if stop {
            reports.push(scenario.skeleton().skipped(FAIL_FAST_SKIP));
            continue;
        }
        if !context.provisions_granule(scenario.granule_id()) {
            warn!(
                granule = %scenario.granule_id(),
                environment = %context.environment,
                "skipping scenario for an unprovisioned granule"
            );
            reports.push(scenario.skeleton().skipped(format!(
                "granule {} is not provisioned in {}",
                scenario.granule_id(),
                context.environment
            )));
            continue;
        }

        let report = match scenario {
            SelectedScenario::Conversion(case) => run_conversion_scenario(
                service,
                context,
                table,
                case,
                &config.policy,
                config.workspace_root.as_deref(),
            ),
            SelectedScenario::Rejection(case) => {
                run_rejection_scenario(service, context, case, &config.policy)
            }
        };
        stop = config.fail_fast && report.is_failed();
        reports.push(report);
    }
    reports
}

fn build_report(
    config: &SuiteConfig,
    selector: &str,
    resolution: &EnvironmentResolution,
    scenarios: Vec<ScenarioReport>,
) -> SuiteReport {
    let count = |status: ScenarioStatus| {
        scenarios
            .iter()
            .filter(|scenario| scenario.status == status)
            .count()
    };
    let passed_scenario_count = count(ScenarioStatus::Passed);
    let failed_scenario_count = count(ScenarioStatus::Failed);
    let skipped_scenario_count = count(ScenarioStatus::Skipped);
    let context = match resolution {
        EnvironmentResolution::Supported(context) => Some(context),
        EnvironmentResolution::Unsupported { .. } => None,
    };

    SuiteReport {
        generated_at_unix_seconds: current_unix_timestamp_seconds(),
        passed: failed_scenario_count == 0,
        environment_selector: selector.to_string(),
        environment: context.map(|context| context.environment),
        service_url: context.map(|context| context.service_url.clone()),
        skip_notice: resolution.skip_notice(),
        oracle_path: normalize_path(&config.oracle_path),
        case_filter: config.case_filter.patterns().to_vec(),
        scenario_count: scenarios.len(),
        passed_scenario_count,
        failed_scenario_count,
        skipped_scenario_count,
        policy: config.policy,
        scenarios,
    }
}

pub fn render_human_summary(report: &SuiteReport) -> String {
    let mut lines = Vec::new();
    if let Some(notice) = &report.skip_notice {
        lines.push(notice.clone());
    }
    let status = if !report.passed {
        "FAIL"
    } else if report.passed_scenario_count == 0 && report.skipped_scenario_count > 0 {
        "SKIPPED"
    } else {
        "PASS"
    };
    lines.push(format!("Suite status: {}", status));
    if let (Some(environment), Some(url)) = (report.environment, &report.service_url) {
        lines.push(format!("Environment: {} ({})", environment, url));
    }
    lines.push(format!(
        "Scenarios: {} total ({} passed, {} failed, {} skipped)",
        report.scenario_count,
        report.passed_scenario_count,
        report.failed_scenario_count,
        report.skipped_scenario_count
    ));

    for scenario in &report.scenarios {
        lines.push(format!(
            "Scenario {}: {} ({} {} [{}])",
            scenario.case_id,
            scenario.status.as_str(),
            scenario.granule_id,
            match scenario.kind {
                ScenarioKind::Conversion => "convert",
                ScenarioKind::Rejection => "reject",
            },
            scenario.variables.join(",")
        ));
        if scenario.status == ScenarioStatus::Failed {
            let kind = scenario
                .failure
                .map_or("error", |failure| failure.as_str());
            let reason = scenario
                .reason
                .as_deref()
                .unwrap_or("scenario failed without a reason");
            lines.push(format!("  failure: {} ({})", kind, reason));
        }
    }

    lines.join("\n")
}

#[derive(Debug)]
pub enum SuiteError {
    ReportDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    SerializeReport {
        path: PathBuf,
        source: serde_json::Error,
    },
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for SuiteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReportDirectory { path, source } => write!(
                f,
                "failed to create report directory '{}': {}",
                path.display(),
                source
            ),
            Self::SerializeReport { path, source } => write!(
                f,
                "failed to serialize report '{}': {}",
                path.display(),
                source
            ),
            Self::WriteReport { path, source } => {
                write!(f, "failed to write report '{}': {}", path.display(), source)
            }
        }
    }
}

impl Error for SuiteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReportDirectory { source, .. } => Some(source),
            Self::SerializeReport { source, .. } => Some(source),
            Self::WriteReport { source, .. } => Some(source),
        }
    }
}

impl From<SuiteError> for CogCheckError {
    fn from(error: SuiteError) -> Self {
        let message = error.to_string();
        match error {
            SuiteError::ReportDirectory { .. } | SuiteError::WriteReport { .. } => {
                CogCheckError::io_system("IO.REPORT_WRITE", message)
            }
            SuiteError::SerializeReport { .. } => {
                CogCheckError::internal("INTERNAL.REPORT_SERIALIZE", message)
            }
        }
    }
}

fn write_report_file(report_path: &Path, report: &SuiteReport) -> Result<(), SuiteError> {
    if let Some(parent_dir) = report_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|source| SuiteError::ReportDirectory {
            path: parent_dir.to_path_buf(),
            source,
        })?;
    }

    let report_json =
        serde_json::to_string_pretty(report).map_err(|source| SuiteError::SerializeReport {
            path: report_path.to_path_buf(),
            source,
        })?;
    fs::write(report_path, report_json).map_err(|source| SuiteError::WriteReport {
        path: report_path.to_path_buf(),
        source,
    })
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::{ScenarioStatus, SuiteConfig, render_human_summary, run_suite};
    use crate::config::{CaseFilter, load_oracle_table, resolve_environment};
    use crate::service::{ConversionService, JobState, PollPolicy, ServiceError};
    use crate::test_fixtures::{GeoTiffBuilder, ScriptedJob, ScriptedService};
    use serde_json::Value;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::TempDir;

    const MESSAGE: &str =
        "net2cog harmony adapter currently only supports processing one variable at a time";

    fn raster() -> GeoTiffBuilder {
        GeoTiffBuilder::new(32, 32)
            .tiled(16, 16)
            .geographic(4326)
            .pixel_scale_and_tiepoint(0.25, 0.25, 0.0, -90.0)
            .nodata("-9999")
    }

    fn write_fixtures(root: &Path) -> crate::config::OracleTable {
        let reference_dir = root.join("reference");
        fs::create_dir_all(&reference_dir).expect("reference dir should be created");
        raster()
            .write_to(&reference_dir.join("G1234601650-POCLOUD__sss_smap.tif"))
            .expect("reference should be written");
        let table_path = root.join("oracle.json");
        fs::write(
            &table_path,
            format!(
                r#"{{
                  "referenceRoot": "reference",
                  "conversions": [
                    {{ "id": "uat-sss-smap", "granuleId": "G1234601650-POCLOUD", "variable": "sss_smap",
                       "expectedMetadata": {{ "driver": "GTiff", "dtype": "float32", "nodata": -9999.0, "crs": "EPSG:4326" }} }},
                    {{ "id": "prod-sss-smap", "granuleId": "G2705075478-POCLOUD", "variable": "sss_smap" }}
                  ],
                  "rejections": [
                    {{ "id": "uat-all-variables", "granuleId": "G1234601650-POCLOUD", "variables": ["all"],
                       "expectedMessage": "{}" }}
                  ]
                }}"#,
                MESSAGE
            ),
        )
        .expect("table should be written");
        load_oracle_table(&table_path).expect("table should load")
    }

    fn config(root: &Path) -> SuiteConfig {
        let mut config = SuiteConfig {
            oracle_path: root.join("oracle.json"),
            report_path: root.join("out").join("report.json"),
            workspace_root: Some(root.join("work")),
            ..SuiteConfig::default()
        };
        config.policy.polling = PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        };
        config
    }

    fn uat_service(conversion: ScriptedJob, rejection: ScriptedJob) -> ScriptedService {
        ScriptedService::new()
            .on_variables(&["sss_smap"], conversion)
            .on_variables(&["all"], rejection)
    }

    #[test]
    fn uat_suite_runs_provisioned_cases_and_writes_report() {
        let temp = TempDir::new().expect("tempdir should be created");
        let table = write_fixtures(temp.path());
        let config = config(temp.path());
        let resolution = resolve_environment("uat");

        let report = run_suite(&config, &table, "uat", &resolution, |context| {
            assert_eq!(context.collection_id, "C1234410736-POCLOUD");
            let service: Box<dyn ConversionService> = Box::new(uat_service(
                ScriptedJob::succeeding().output("out.tif", raster().build()),
                ScriptedJob::failing(MESSAGE),
            ));
            Ok(service)
        })
        .expect("suite should run");

        assert!(report.passed);
        assert_eq!(report.scenario_count, 3);
        assert_eq!(report.passed_scenario_count, 2);
        assert_eq!(report.skipped_scenario_count, 1);
        let prod = &report.scenarios[1];
        assert_eq!(prod.case_id, "prod-sss-smap");
        assert_eq!(prod.status, ScenarioStatus::Skipped);

        let written: Value = serde_json::from_str(
            &fs::read_to_string(&config.report_path).expect("report should be written"),
        )
        .expect("report should be JSON");
        assert_eq!(written["passed"], Value::Bool(true));
        assert_eq!(written["environment"], Value::String("uat".to_string()));
        assert_eq!(written["scenarios"][0]["status"], Value::String("passed".to_string()));

        let summary = render_human_summary(&report);
        assert!(summary.contains("Suite status: PASS"));
        assert!(summary.contains("Scenarios: 3 total (2 passed, 0 failed, 1 skipped)"));
        assert!(summary.contains("Scenario uat-all-variables: PASS"));
    }

    #[test]
    fn unsupported_environment_skips_everything_without_connecting() {
        let temp = TempDir::new().expect("tempdir should be created");
        let table = write_fixtures(temp.path());
        let config = config(temp.path());
        let resolution = resolve_environment("sandbox");
        let connected = Rc::new(Cell::new(false));
        let flag = Rc::clone(&connected);

        let report = run_suite(&config, &table, "sandbox", &resolution, move |_| {
            flag.set(true);
            Err(ServiceError::Protocol("must not connect".to_string()))
        })
        .expect("suite should run");

        assert!(!connected.get());
        assert!(report.passed);
        assert_eq!(report.skipped_scenario_count, 3);
        assert!(report.scenarios.iter().all(|scenario| scenario
            .reason
            .as_deref()
            .is_some_and(|reason| reason.contains("'sandbox'"))));
        let summary = render_human_summary(&report);
        assert!(summary.starts_with("Environment 'sandbox' is not configured"));
        assert!(summary.contains("Suite status: SKIPPED"));
    }

    #[test]
    fn fail_fast_skips_the_remaining_scenarios() {
        let temp = TempDir::new().expect("tempdir should be created");
        let table = write_fixtures(temp.path());
        let mut config = config(temp.path());
        config.fail_fast = true;
        let resolution = resolve_environment("uat");
        let service = Rc::new(uat_service(
            ScriptedJob::failing("WorkItem failed"),
            ScriptedJob::failing(MESSAGE),
        ));
        let shared = Rc::clone(&service);

        let report = run_suite(&config, &table, "uat", &resolution, move |_| {
            let service: Box<dyn ConversionService> = Box::new(SharedService(shared));
            Ok(service)
        })
        .expect("suite should run");

        assert!(!report.passed);
        assert_eq!(report.failed_scenario_count, 1);
        assert_eq!(report.scenarios[2].status, ScenarioStatus::Skipped);
        assert_eq!(service.submissions().len(), 1);
        assert!(render_human_summary(&report).contains("  failure: UnexpectedJobOutcome"));
    }

    #[test]
    fn case_filter_limits_the_run() {
        let temp = TempDir::new().expect("tempdir should be created");
        let table = write_fixtures(temp.path());
        let mut config = config(temp.path());
        config.case_filter =
            CaseFilter::new(&["*-all-*".to_string()]).expect("filter should build");
        let resolution = resolve_environment("uat");

        let report = run_suite(&config, &table, "uat", &resolution, |_| {
            let service: Box<dyn ConversionService> = Box::new(uat_service(
                ScriptedJob::with_states(&[JobState::Running]),
                ScriptedJob::failing(MESSAGE),
            ));
            Ok(service)
        })
        .expect("suite should run");

        assert_eq!(report.scenario_count, 1);
        assert_eq!(report.scenarios[0].case_id, "uat-all-variables");
        assert_eq!(report.case_filter, vec!["*-all-*".to_string()]);
    }

    struct SharedService(Rc<ScriptedService>);

    impl ConversionService for SharedService {
        fn submit(
            &self,
            request: &crate::service::ConversionRequest,
        ) -> Result<crate::service::JobStatus, ServiceError> {
            self.0.submit(request)
        }

        fn status(
            &self,
            job_id: &crate::service::JobId,
        ) -> Result<crate::service::JobStatus, ServiceError> {
            self.0.status(job_id)
        }

        fn download_results(
            &self,
            job: &crate::service::JobStatus,
            destination: &Path,
        ) -> Result<Vec<std::path::PathBuf>, ServiceError> {
            self.0.download_results(job, destination)
        }
    }
}
