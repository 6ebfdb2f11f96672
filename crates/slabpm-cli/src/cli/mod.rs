mod commands;

use clap::Parser;
use slabpm_core::domain::PmError;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    init_logging();
    match run(std::env::args().skip(1)) {
        Ok(code) => code,
        Err(error) => {
            let pm_error = error.as_pm_error();
            eprintln!("{}", pm_error.diagnostic_line());
            if let Some(summary_line) = pm_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            pm_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("slabpm".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    match Cli::try_parse_from(&full_args) {
        Ok(cli) => dispatch_parsed(cli.backend, cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(name = "slabpm", about = "Slab-decomposed particle-mesh gravity")]
struct Cli {
    /// Where tasks run: threads of this process, or one MPI process each
    #[arg(long, value_enum, global = true, default_value_t = Backend::Threads)]
    backend: Backend,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Backend {
    Threads,
    #[cfg(feature = "mpi")]
    Mpi,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run force evaluations on the configured particles
    Forces(commands::ForcesArgs),
    /// Rebuild initial conditions from particle files and evaluate forces on them
    Ingest(commands::IngestArgs),
    /// Print the slab decomposition of the configured run
    Layout(commands::LayoutArgs),
}

fn dispatch_parsed(backend: Backend, command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Forces(args) => commands::run_forces_command(backend, args),
        CliCommand::Ingest(args) => commands::run_ingest_command(backend, args),
        CliCommand::Layout(args) => commands::run_layout_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(PmError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_pm_error(&self) -> PmError {
        match self {
            Self::Usage(message) => PmError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => PmError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}

impl From<PmError> for CliError {
    fn from(error: PmError) -> Self {
        Self::Compute(error)
    }
}
