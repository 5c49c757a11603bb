use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ebrains_clone::annex::GitAnnexEngine;
use ebrains_clone::app::{App, CloneRequest, CloneResult, ProgressSink, VersionsResult};
use ebrains_clone::config::{ConfigLoader, Settings};
use ebrains_clone::dataproxy::DataProxyHttpClient;
use ebrains_clone::domain::{Depth, KgId, Status};
use ebrains_clone::error::CloneError;
use ebrains_clone::kg::KgHttpClient;
use ebrains_clone::output::{JsonOutput, OutputMode, TracingSink};

#[derive(Parser)]
#[command(name = "ebrains-clone")]
#[command(about = "Replay EBRAINS Knowledge Graph dataset versions as a git-annex dataset history")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a dataset with one commit per KG dataset version")]
    Clone(CloneArgs),
    #[command(about = "List the dataset versions a clone would replay")]
    Versions(VersionsArgs),
}

#[derive(Args)]
struct CloneArgs {
    /// KG dataset or dataset version UUID, or a URL containing one.
    source: String,

    /// Target directory; defaults to the UUID.
    path: Option<String>,

    /// Only replay the last N versions.
    #[arg(long, allow_negative_numbers = true)]
    depth: Option<i64>,
}

#[derive(Args)]
struct VersionsArgs {
    source: String,

    #[arg(long, allow_negative_numbers = true)]
    depth: Option<i64>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<CloneError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &CloneError) -> u8 {
    match error {
        CloneError::NotFound(_)
        | CloneError::NoVersions(_)
        | CloneError::InvalidIdentifier(_)
        | CloneError::InvalidDepth(_)
        | CloneError::ConfigRead(_)
        | CloneError::ConfigParse(_) => 2,
        CloneError::KgHttp(_)
        | CloneError::KgStatus { .. }
        | CloneError::DataProxyHttp(_)
        | CloneError::DataProxyStatus { .. }
        | CloneError::MissingToken(_)
        | CloneError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Clone(args) => {
            // reject bad input before the config or the network is touched
            let request = CloneRequest::parse(&args.source, args.path.as_deref(), args.depth)?;
            let settings = ConfigLoader::resolve(cli.config.as_deref())?;
            let app = build_app(settings)?;
            let result = app.clone_dataset(&request, sink(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_clone(&result).into_diagnostic()?,
                OutputMode::Interactive => print_clone_summary(&result),
            }
            Ok(if result.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::Versions(args) => {
            let source: KgId = args.source.parse()?;
            let depth = args.depth.map(Depth::try_from).transpose()?;
            let settings = ConfigLoader::resolve(cli.config.as_deref())?;
            let app = build_app(settings)?;
            let result = app.versions(&source, depth, sink(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => {
                    JsonOutput::print_versions(&result).into_diagnostic()?
                }
                OutputMode::Interactive => print_versions_summary(&result),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_app(
    settings: Settings,
) -> Result<App<KgHttpClient, DataProxyHttpClient, GitAnnexEngine>, CloneError> {
    let kg = KgHttpClient::new(&settings)?;
    let buckets = DataProxyHttpClient::new(&settings)?;
    Ok(App::new(kg, buckets, GitAnnexEngine::new(), settings))
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Interactive => &TracingSink,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_clone_summary(result: &CloneResult) {
    println!("{CYAN}ebrains-clone summary{RESET}");
    println!("{CYAN}dataset {} -> {}{RESET}", result.dataset_id, result.path);
    println!("   local id: {}", result.local_id);

    let color = if result.is_complete() { GREEN } else { YELLOW };
    println!(
        "{color}versions committed: {}/{}{RESET}",
        result.versions_completed, result.versions_total
    );

    for event in result.events.iter().filter(|event| !event.is_ok()) {
        let color = match event.status {
            Status::Impossible => YELLOW,
            _ => RED,
        };
        println!(
            "{color}[{}] {}: {}{RESET}",
            event.status,
            event.action,
            event.message.as_deref().unwrap_or("")
        );
        if let Some(path) = &event.path {
            println!("{color}   {path}{RESET}");
        }
    }
}

fn print_versions_summary(result: &VersionsResult) {
    println!("{CYAN}dataset {}{RESET}", result.dataset_id);
    for version in &result.versions {
        let marker = if Some(version.id) == result.target { " (requested)" } else { "" };
        let released = version
            .release_date
            .map(|date| date.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{GREEN}{}{RESET}  {released}  {}{marker}",
            version.version_identifier, version.id
        );
    }
}
