use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use scrnaseq::app::{FetchOptions, ListOptions, ScRnaSeq};
use scrnaseq::config::ConfigLoader;
use scrnaseq::error::{ErrorKind, ScrnaError};
use scrnaseq::gypsum::GypsumHttpClient;
use scrnaseq::output::{JsonOutput, LatestResult, VersionsResult};
use scrnaseq::polish::{PolishOptions, polish_dataset};
use scrnaseq::query::SearchQuery;

#[derive(Parser)]
#[command(name = "scrnaseq")]
#[command(about = "Discover, search and fetch curated single-cell RNA-seq datasets")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./scrnaseq.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override the cache directory.
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List published datasets")]
    List(IndexArgs),
    #[command(about = "Search dataset metadata, e.g. 'brain AND taxonomy_id:10090'")]
    Search(SearchArgs),
    #[command(about = "List the versions of a dataset")]
    Versions(NameArgs),
    #[command(about = "Show the latest version of a dataset")]
    Latest(NameArgs),
    #[command(about = "Print the metadata document of a dataset")]
    Metadata(MetadataArgs),
    #[command(about = "Fetch a dataset and summarize its contents")]
    Fetch(FetchArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Include every version, not only the latest.
    #[arg(long)]
    all_versions: bool,

    /// Download the metadata index again.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[command(flatten)]
    index: IndexArgs,
}

#[derive(Args)]
struct NameArgs {
    name: String,
}

#[derive(Args)]
struct MetadataArgs {
    name: String,
    version: String,

    #[arg(long)]
    path: Option<String>,

    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct FetchArgs {
    name: String,
    version: String,

    #[arg(long)]
    path: Option<String>,

    #[arg(long)]
    realize_assays: bool,

    #[arg(long)]
    realize_reduced_dims: bool,

    #[arg(long)]
    overwrite: bool,

    /// Apply storage polishing before summarizing.
    #[arg(long)]
    polish: bool,
}

impl IndexArgs {
    fn options(&self) -> ListOptions {
        ListOptions {
            latest: !self.all_versions,
            overwrite: self.overwrite,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ScrnaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ScrnaError) -> u8 {
    match error.kind() {
        ErrorKind::NotFound => 2,
        ErrorKind::Transport => 3,
        ErrorKind::Validation => 4,
        ErrorKind::Schema => 5,
        ErrorKind::Io => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir.into();
    }
    let client: ScRnaSeq<GypsumHttpClient> = ScRnaSeq::from_config(config)?;

    match cli.command {
        Commands::List(args) => {
            let records = client.list_datasets(&args.options())?;
            JsonOutput::print_records(&records).into_diagnostic()?;
        }
        Commands::Search(args) => {
            let query: SearchQuery = args.query.parse()?;
            let records = client.search_datasets(query, &args.index.options())?;
            JsonOutput::print_records(&records).into_diagnostic()?;
        }
        Commands::Versions(args) => {
            let versions = client.list_versions(&args.name)?;
            JsonOutput::print_versions(&VersionsResult {
                name: &args.name,
                versions: &versions,
            })
            .into_diagnostic()?;
        }
        Commands::Latest(args) => {
            let version = client.fetch_latest_version(&args.name)?;
            JsonOutput::print_latest(&LatestResult {
                name: &args.name,
                version: &version,
            })
            .into_diagnostic()?;
        }
        Commands::Metadata(args) => {
            let metadata = client.fetch_metadata(
                &args.name,
                &args.version,
                args.path.as_deref(),
                args.overwrite,
            )?;
            JsonOutput::print_metadata(&metadata).into_diagnostic()?;
        }
        Commands::Fetch(args) => {
            let options = FetchOptions {
                path: args.path,
                realize_assays: args.realize_assays,
                realize_reduced_dims: args.realize_reduced_dims,
                overwrite: args.overwrite,
            };
            let mut experiment = client.fetch_dataset(&args.name, &args.version, &options)?;
            if args.polish {
                experiment = polish_dataset(experiment, &PolishOptions::default())?;
            }
            JsonOutput::print_experiment(&experiment.summary()).into_diagnostic()?;
        }
    }
    Ok(())
}
