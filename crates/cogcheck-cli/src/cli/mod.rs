mod commands;
mod helpers;

use clap::Parser;
use cogcheck_core::domain::CogCheckError;

pub fn run_from_env() -> i32 {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let error = error.as_cogcheck_error();
            eprintln!("{}", error.diagnostic_line());
            if let Some(summary_line) = error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("cogcheck".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    match Cli::try_parse_from(&full_args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "cogcheck",
    version,
    about = "Regression verification for NetCDF to COG conversions"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run every oracle scenario against a deployment
    Suite(commands::SuiteArgs),
    /// Verify a local artifact against one oracle case
    Verify(commands::VerifyArgs),
    /// Print extracted metadata and layout of a raster as JSON
    Inspect(commands::InspectArgs),
    /// List the configured deployments
    Environments,
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Suite(args) => commands::run_suite_command(args),
        CliCommand::Verify(args) => commands::run_verify_command(args),
        CliCommand::Inspect(args) => commands::run_inspect_command(args),
        CliCommand::Environments => commands::run_environments_command(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(CogCheckError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_cogcheck_error(&self) -> CogCheckError {
        match self {
            Self::Usage(message) => {
                CogCheckError::input_validation("INPUT.CLI_USAGE", message.clone())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => CogCheckError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
