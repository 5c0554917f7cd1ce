mod commands;
mod helpers;

use clap::Parser;
use dosia_core::domain::{DosiaError, ErrorCode};

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().collect();

    match parse_and_dispatch(args) {
        Ok(code) => code,
        Err(error) => {
            let diagnostic = error.as_dosia_error();
            eprintln!("{}", diagnostic.diagnostic_line());
            eprintln!("{}", diagnostic.fatal_exit_line());
            diagnostic.exit_code()
        }
    }
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            helpers::init_tracing(cli.verbose);
            dispatch_parsed(cli.command)
        }
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
    name = "dosia",
    version,
    about = "Treatment plan and CT ingestion for Monte Carlo dose engines"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Ingest and normalize the beam exported into a plan directory
    Plan(commands::PlanArgs),
    /// Build the voxel phantom from a plan directory's CT volume
    Phantom(commands::PhantomArgs),
    /// Convert a volume image between .xdr and .mhd
    Convert(commands::ConvertArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Plan(args) => commands::run_plan_command(args),
        CliCommand::Phantom(args) => commands::run_phantom_command(args),
        CliCommand::Convert(args) => commands::run_convert_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(DosiaError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<DosiaError> for CliError {
    fn from(error: DosiaError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_dosia_error(&self) -> DosiaError {
        match self {
            Self::Usage(message) => DosiaError::input_validation(
                ErrorCode::InvalidArguments,
                "INPUT.CLI_USAGE",
                message.trim_end(),
            ),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => {
                DosiaError::internal(ErrorCode::InternalFailure, "SYS.CLI", format!("{error:#}"))
            }
        }
    }
}
