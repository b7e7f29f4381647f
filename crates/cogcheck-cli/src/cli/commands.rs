use super::CliError;
use super::helpers::{compute_error, load_policy, render_verdict, to_pretty_json};
use cogcheck_core::config::{
    CaseFilter, ENVIRONMENT_VAR, Environment, ORACLE_TABLE_PATH, load_oracle_table,
    resolve_environment,
};
use cogcheck_core::domain::{CogCheckError, RasterArtifact, RasterMetadata};
use cogcheck_core::raster::{StructuralReport, extract_metadata, validate_structure};
use cogcheck_core::service::{ConversionService, HarmonyClient};
use cogcheck_core::suite::{
    DEFAULT_REPORT_PATH, SuiteConfig, render_human_summary, run_suite, verify_artifact,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct SuiteArgs {
    /// Deployment name, alias or service root URL
    #[arg(long, env = ENVIRONMENT_VAR)]
    environment: String,

    /// Oracle table path
    #[arg(long, default_value = ORACLE_TABLE_PATH)]
    oracle: PathBuf,

    /// Verification policy path
    #[arg(long)]
    policy: Option<PathBuf>,

    /// JSON report output path
    #[arg(long, default_value = DEFAULT_REPORT_PATH)]
    report: PathBuf,

    /// Bearer token passed through to the service
    #[arg(long, env = "COGCHECK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Parent directory for per-scenario scratch directories
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Only run cases whose id matches this glob (repeatable)
    #[arg(long = "case", value_name = "GLOB")]
    cases: Vec<String>,

    /// Skip the remaining scenarios after the first failure
    #[arg(long)]
    fail_fast: bool,
}

#[derive(clap::Args)]
pub(super) struct VerifyArgs {
    /// Raster artifact to verify
    artifact: PathBuf,

    /// Oracle conversion case id
    #[arg(long = "case", value_name = "ID")]
    case_id: String,

    /// Oracle table path
    #[arg(long, default_value = ORACLE_TABLE_PATH)]
    oracle: PathBuf,

    /// Verification policy path
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Reference raster, instead of the oracle's fixture store
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Print the verdict as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
pub(super) struct InspectArgs {
    /// Raster artifact to inspect
    artifact: PathBuf,

    /// Verification policy path (structural thresholds)
    #[arg(long)]
    policy: Option<PathBuf>,
}

pub(super) fn run_suite_command(args: SuiteArgs) -> Result<i32, CliError> {
    let policy = load_policy(args.policy.as_deref())?;
    let case_filter = CaseFilter::new(&args.cases).map_err(compute_error)?;
    let table = load_oracle_table(&args.oracle).map_err(compute_error)?;
    let config = SuiteConfig {
        oracle_path: args.oracle,
        policy,
        report_path: args.report,
        workspace_root: args.workspace_root,
        case_filter,
        fail_fast: args.fail_fast,
    };

    let resolution = resolve_environment(&args.environment);
    let token = args.token;
    let report = run_suite(&config, &table, &args.environment, &resolution, |context| {
        let client = HarmonyClient::new(&context.service_url, token)?;
        Ok(Box::new(client) as Box<dyn ConversionService>)
    })
    .map_err(CliError::Compute)?;

    println!("{}", render_human_summary(&report));
    println!("JSON report: {}", config.report_path.display());

    if report.passed { Ok(0) } else { Ok(1) }
}

pub(super) fn run_verify_command(args: VerifyArgs) -> Result<i32, CliError> {
    let policy = load_policy(args.policy.as_deref())?;
    let table = load_oracle_table(&args.oracle).map_err(compute_error)?;
    let case = table.conversion(&args.case_id).ok_or_else(|| {
        CliError::Compute(CogCheckError::input_validation(
            "INPUT.UNKNOWN_CASE",
            format!(
                "oracle table '{}' has no conversion case '{}'",
                args.oracle.display(),
                args.case_id
            ),
        ))
    })?;
    let reference = args
        .reference
        .clone()
        .unwrap_or_else(|| table.reference_path(case));
    let artifact = open_artifact(&args.artifact)?;

    let verdict = verify_artifact(&artifact, &case.expected_metadata, &reference, &policy);
    if args.json {
        println!("{}", to_pretty_json(&verdict, "verdict")?);
    } else {
        println!("{}", render_verdict(&verdict));
    }

    if verdict.passed { Ok(0) } else { Ok(1) }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Inspection {
    artifact: String,
    byte_size: u64,
    metadata: RasterMetadata,
    structure: StructuralReport,
}

pub(super) fn run_inspect_command(args: InspectArgs) -> Result<i32, CliError> {
    let policy = load_policy(args.policy.as_deref())?;
    let artifact = open_artifact(&args.artifact)?;
    let metadata = extract_metadata(&artifact).map_err(compute_error)?;
    let inspection = Inspection {
        artifact: artifact.path().to_string_lossy().replace('\\', "/"),
        byte_size: artifact.byte_size(),
        metadata,
        structure: validate_structure(&artifact, &policy.structure),
    };
    println!("{}", to_pretty_json(&inspection, "inspection")?);
    Ok(0)
}

pub(super) fn run_environments_command() -> Result<i32, CliError> {
    for environment in Environment::ALL {
        let context = environment.run_context();
        let aliases = if environment.aliases().is_empty() {
            "-".to_string()
        } else {
            environment.aliases().join(",")
        };
        println!(
            "{:<11} {:<40} collection={} granules={} aliases={}",
            environment.name(),
            context.service_url,
            context.collection_id,
            context.granule_ids.join(","),
            aliases
        );
    }
    Ok(0)
}

fn open_artifact(path: &std::path::Path) -> Result<RasterArtifact, CliError> {
    RasterArtifact::from_path(path).map_err(|source| {
        CliError::Compute(CogCheckError::io_system(
            "IO.ARTIFACT_READ",
            format!("failed to read artifact '{}': {}", path.display(), source),
        ))
    })
}
