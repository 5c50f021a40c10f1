use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use vdb_roundtrip::app::{App, BatchReport, PipelineOptions, ProgressSink};
use vdb_roundtrip::config::{ConfigLoader, ResolvedConfig};
use vdb_roundtrip::differ::AxTool;
use vdb_roundtrip::error::RoundTripError;
use vdb_roundtrip::fetch::HttpFetcher;
use vdb_roundtrip::grid::VdbCliLibrary;
use vdb_roundtrip::output::{ConsoleOutput, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "vdb-roundtrip")]
#[command(about = "Download sample VDB archives and check they survive a read/write round trip")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to ./vdb-roundtrip.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Concurrent downloads
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Directory all files are written to (defaults to the current directory)
    #[arg(long, global = true)]
    work_dir: Option<Utf8PathBuf>,

    /// Skip the comparison with vdb_ax
    #[arg(long, global = true)]
    no_diff: bool,

    /// Print the batch report as JSON instead of progress lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Download, extract, round-trip, compare and clean up (default)")]
    Run,
    #[command(about = "Download and extract the catalog, keeping the data files")]
    Fetch,
    #[command(about = "Round-trip the .vdb files already in the working directory")]
    Local(LocalArgs),
}

#[derive(Args)]
struct LocalArgs {
    /// Leave the input files in place after processing
    #[arg(long)]
    keep_inputs: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<RoundTripError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RoundTripError) -> u8 {
    match error {
        RoundTripError::ConfigRead(_)
        | RoundTripError::ConfigParse(_)
        | RoundTripError::InvalidConfig(_)
        | RoundTripError::InvalidUrl(_)
        | RoundTripError::MissingArchiveName(_)
        | RoundTripError::EmptyCatalog => 2,
        RoundTripError::NoLocalGrids(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }
    if cli.no_diff {
        config.diff = false;
    }

    let work_dir = match cli.work_dir {
        Some(dir) => dir,
        None => {
            let cwd = std::env::current_dir()
                .map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
            Utf8PathBuf::from_path_buf(cwd).map_err(|_| {
                RoundTripError::Filesystem("non-utf8 working directory".to_string())
            })?
        }
    };
    std::fs::create_dir_all(&work_dir).into_diagnostic()?;

    let app = build_app(&config, work_dir)?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Console => &ConsoleOutput,
        OutputMode::Json => &JsonOutput,
    };

    let report = match cli.command.unwrap_or(Command::Run) {
        Command::Run => app.run(config.catalog.jobs().to_vec(), sink),
        Command::Fetch => app.fetch_only(config.catalog.jobs().to_vec(), sink),
        Command::Local(args) => app.run_local(&config.aliases, args.keep_inputs, sink)?,
    };
    finish(&report, output_mode)
}

fn build_app(
    config: &ResolvedConfig,
    work_dir: Utf8PathBuf,
) -> miette::Result<App<HttpFetcher, VdbCliLibrary, AxTool>> {
    let fetcher = HttpFetcher::new()?;
    let library = VdbCliLibrary::new(&config.tools.print, &config.tools.python);
    let tool = AxTool::new(&config.tools.compare);
    let options = PipelineOptions::from_config(work_dir, config);
    Ok(App::new(fetcher, library, tool, options))
}

fn finish(report: &BatchReport, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(report).into_diagnostic(),
        OutputMode::Console => {
            tracing::debug!(
                jobs = report.jobs.len(),
                failures = report.failures(),
                "run complete"
            );
            Ok(())
        }
    }
}
