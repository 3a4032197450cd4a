//! create-repository - builds an add-on repository from add-on sources
//!
//! Each add-on location is a local add-on folder, a local zip archive or a
//! git URL of the form `REPOSITORY_URL#BRANCH:PATH`. Every add-on gets its
//! own `<datadir>/<id>/` folder with the zip, its checksum and the metadata
//! files, and the catalog `addons.xml` lists all of them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use addon_repository::fetch::{expand_home, GitCli};
use addon_repository::{create_repository, needs_remote, RemoteClient, RepositoryConfig};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "create-repository",
    about = "Create an add-on repository from add-on sources",
    version
)]
struct Cli {
    /// Path to place the add-ons
    #[clap(short, long, default_value = ".")]
    datadir: String,

    /// Path for the catalog [DATADIR/addons.xml or DATADIR/addons.xml.gz if compressed]
    #[clap(short, long)]
    info: Option<String>,

    /// Path for the catalog checksum file [INFO.md5]
    #[clap(short, long)]
    checksum: Option<String>,

    /// Compress addons.xml with gzip
    #[clap(short = 'z', long)]
    compressed: bool,

    /// Build add-on sources serially, which also makes error diagnosis easier
    #[clap(short, long)]
    no_parallel: bool,

    /// Maximum number of add-ons fetched at the same time [one per add-on]
    #[clap(short, long)]
    jobs: Option<usize>,

    /// Write a JSON summary of the run to this path
    #[clap(long)]
    report: Option<String>,

    /// Set log level (RUST_LOG takes precedence)
    #[clap(long, default_value = "warn")]
    log_level: LogLevel,

    /// Log each add-on as it is packaged
    #[clap(short, long)]
    verbose: bool,

    /// Location of the add-on: either a path to a local folder or to a zip
    /// archive or a URL for a Git repository with the format
    /// REPOSITORY_URL#BRANCH:PATH
    #[clap(value_name = "ADDON")]
    addons: Vec<String>,
}

/// Initialize tracing on stderr; `RUST_LOG` overrides the CLI level.
fn initialize_tracing(log_level: &LogLevel, verbose: bool) {
    let default = if verbose && matches!(log_level, LogLevel::Error | LogLevel::Warn) {
        "info"
    } else {
        log_level.to_filter_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.verbose);

    let config = RepositoryConfig::new(expand_home(&cli.datadir))
        .with_info_path(cli.info.as_deref().map(expand_home))
        .with_checksum_path(cli.checksum.as_deref().map(expand_home))
        .with_compression(cli.compressed)
        .with_parallel(!cli.no_parallel)
        .with_concurrency_limit(cli.jobs)
        .with_report_path(cli.report.as_deref().map(expand_home));

    let remote: Option<Arc<dyn RemoteClient>> = if needs_remote(&cli.addons) {
        let git = GitCli::detect().context("Remote add-on locations need git")?;
        Some(Arc::new(git))
    } else {
        None
    };

    let report = create_repository(&config, &cli.addons, remote)
        .await
        .with_context(|| format!("Failed to create repository in {}", config.data_dir().display()))?;

    tracing::info!(
        addons = report.addons.len(),
        catalog = %report.catalog_path.display(),
        checksum = %report.checksum_path.display(),
        "Done"
    );
    Ok(())
}
