use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use atlas_fetcher::app::{App, FetchRequest};
use atlas_fetcher::builder::ManifestBuilder;
use atlas_fetcher::config::{self, ConfigLoader, DatasetSource};
use atlas_fetcher::domain::VersionOrdering;
use atlas_fetcher::error::AtlasError;
use atlas_fetcher::fetcher::FetchOptions;
use atlas_fetcher::output::{self, ConsoleSink, JsonOutput, OutputMode};
use atlas_fetcher::repository::GitCrawler;
use atlas_fetcher::store::ManifestSource;
use atlas_fetcher::transfer::HttpTransfer;

const PARTIAL_FETCH_EXIT: u8 = 3;

#[derive(Parser)]
#[command(name = "atlas-fetch")]
#[command(about = "Fetch versioned brain atlas datasets listed in a manifest")]
#[command(version, author)]
struct Cli {
    /// Manifest file; `.json` is read as the structured form, anything else
    /// as `name url` lines.
    #[arg(short, long, global = true)]
    manifest: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download one dataset version")]
    Fetch(FetchArgs),
    #[command(about = "Show available datasets, or the versions of one dataset")]
    List(ListArgs),
    #[command(about = "Replace the manifest when the published copy changed")]
    Update(UpdateArgs),
    #[command(about = "Crawl source repositories and write a new manifest")]
    Generate(GenerateArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(short = 'n', long)]
    dataset_name: Option<String>,

    #[arg(short = 'v', long)]
    dataset_version: Option<String>,

    /// Defaults to the current directory.
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// How "latest" is chosen when no version is given.
    #[arg(long, value_enum, default_value_t = VersionOrdering::Lexicographic)]
    ordering: VersionOrdering,

    #[arg(long)]
    dry_run: bool,

    /// Update the manifest before fetching.
    #[arg(short, long)]
    update: bool,

    #[arg(long, default_value = config::PUBLISHED_MANIFEST_URL)]
    url: String,
}

#[derive(Args)]
struct ListArgs {
    #[arg(short = 'n', long)]
    dataset_name: Option<String>,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long, default_value = config::PUBLISHED_MANIFEST_URL)]
    url: String,
}

#[derive(Args)]
struct GenerateArgs {
    /// Dataset ids to crawl; read from the sources file when empty.
    datasets: Vec<String>,

    #[arg(long)]
    sources: Option<String>,

    /// Where repositories are cloned; defaults to the platform cache
    /// directory. An existing directory there must be a git checkout.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Also write `<dataset>_<tag>.manifest` flat files into this directory.
    #[arg(long)]
    legacy_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<AtlasError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &AtlasError) -> u8 {
    match error {
        AtlasError::ManifestNotFound { .. }
        | AtlasError::DatasetNotFound(_)
        | AtlasError::ManifestMissing(_) => 2,
        AtlasError::Transfer { .. }
        | AtlasError::TransferStatus { .. }
        | AtlasError::RepositoryAccess(_)
        | AtlasError::MissingTool(_) => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let manifest_path = match cli.manifest {
        Some(path) => Utf8PathBuf::from(path),
        None => Utf8PathBuf::from_path_buf(config::default_manifest_path()).map_err(|path| {
            AtlasError::Filesystem(format!("non-utf8 manifest path {}", path.display()))
        })?,
    };
    let source = ManifestSource::from_path(manifest_path);

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, source, output_mode),
        Commands::List(args) => run_list(args, source, output_mode),
        Commands::Update(args) => run_update(args, source, output_mode),
        Commands::Generate(args) => run_generate(args, source, output_mode),
    }
}

fn run_fetch(
    args: FetchArgs,
    source: ManifestSource,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let app = App::new(source, HttpTransfer::new()?);
    if args.update {
        let outcome = app.update(&args.url, &ConsoleSink)?;
        tracing::info!(changed = outcome.changed(), "manifest update checked");
    }

    let is_flat = matches!(app.manifest_source(), ManifestSource::Flat(_));
    let dataset = match (args.dataset_name, is_flat) {
        (Some(name), _) => name,
        (None, true) => String::new(),
        (None, false) => {
            return Err(AtlasError::MissingSelection(
                "select a dataset with --dataset-name (see `atlas-fetch list`)".to_string(),
            )
            .into());
        }
    };
    let destination = match args.destination {
        Some(path) => path,
        None => std::env::current_dir().into_diagnostic()?,
    };
    let request = FetchRequest {
        dataset,
        version: args.dataset_version,
        destination,
        ordering: args.ordering,
    };
    let options = FetchOptions {
        dry_run: args.dry_run,
        cancel: Some(cancel_on_interrupt()?),
    };

    let result = match output_mode {
        OutputMode::Json => {
            let result = app.fetch(request, &options, &JsonOutput)?;
            JsonOutput::print_fetch(&result).into_diagnostic()?;
            result
        }
        OutputMode::Text => {
            let result = app.fetch(request, &options, &ConsoleSink)?;
            output::print_fetch_summary(&result);
            result
        }
    };

    if result.report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(PARTIAL_FETCH_EXIT))
    }
}

/// Ctrl-C stops the fetch after the file in flight; finished files stay.
fn cancel_on_interrupt() -> miette::Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt, stopping after the current file...");
        flag.store(true, Ordering::SeqCst);
    })
    .into_diagnostic()?;
    Ok(cancel)
}

fn run_list(
    args: ListArgs,
    source: ManifestSource,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let app = App::new(source, HttpTransfer::new()?);
    match args.dataset_name {
        Some(name) => {
            let result = app.show_versions(&name, &JsonOutput)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_versions(&result).into_diagnostic()?,
                OutputMode::Text => result.versions.iter().for_each(|tag| println!("{tag}")),
            }
        }
        None => {
            let result = app.show_datasets(&JsonOutput)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_datasets(&result).into_diagnostic()?,
                OutputMode::Text => result.datasets.iter().for_each(|name| println!("{name}")),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_update(
    args: UpdateArgs,
    source: ManifestSource,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let path = source.path().to_string();
    let app = App::new(source, HttpTransfer::new()?);
    let outcome = app.update(&args.url, &JsonOutput)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_update(&outcome).into_diagnostic()?,
        OutputMode::Text => {
            if outcome.changed() {
                println!("updated {path} from {}", args.url);
            } else {
                println!("{path} is up to date");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_generate(
    args: GenerateArgs,
    source: ManifestSource,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let (sources, remote) = if args.datasets.is_empty() {
        let resolved = ConfigLoader::resolve(args.sources.as_deref())?;
        (resolved.datasets, resolved.object_store_remote)
    } else {
        let sources = args
            .datasets
            .iter()
            .map(|id| DatasetSource::openneuro(id))
            .collect::<Vec<_>>();
        (sources, atlas_fetcher::repository::DEFAULT_OBJECT_STORE_REMOTE.to_string())
    };
    if sources.is_empty() {
        return Err(AtlasError::MissingSelection("no datasets to generate".to_string()).into());
    }

    let app = App::new(source, HttpTransfer::new()?);
    let work_dir = args.work_dir.unwrap_or_else(config::default_work_dir);
    let builder = ManifestBuilder::new(GitCrawler::with_remote(remote), work_dir);
    let result = match output_mode {
        OutputMode::Json => {
            let result = app.generate(&builder, &sources, args.legacy_dir.as_deref(), &JsonOutput)?;
            JsonOutput::print_generate(&result).into_diagnostic()?;
            result
        }
        OutputMode::Text => {
            let result =
                app.generate(&builder, &sources, args.legacy_dir.as_deref(), &ConsoleSink)?;
            output::print_generate_summary(&result);
            result
        }
    };

    if result.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(PARTIAL_FETCH_EXIT))
    }
}
