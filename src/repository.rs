//! One complete run: fetch every add-on, then publish the catalog.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::catalog::Catalog;
use crate::executor::FetchExecutor;
use crate::fetch::checksum::{file_md5, sidecar_path};
use crate::fetch::{is_url, Dispatcher};
use crate::model::{AddonSummary, RepositoryReport};
use crate::traits::{FetchError, RemoteClient};

const CATALOG_BASENAME: &str = "addons.xml";
const COMPRESSED_CATALOG_BASENAME: &str = "addons.xml.gz";

/// Settings for [`create_repository`].
///
/// Default configuration:
/// - Catalog: `<data_dir>/addons.xml`, or `addons.xml.gz` when compressed
/// - Checksum: `<catalog>.md5`, binary marker only when compressed
/// - Parallel fetching with one task per location
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    data_dir: PathBuf,
    info_path: Option<PathBuf>,
    checksum_path: Option<PathBuf>,
    compressed: bool,
    checksum_binary: Option<bool>,
    parallel: bool,
    concurrency_limit: Option<usize>,
    report_path: Option<PathBuf>,
}

impl RepositoryConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            info_path: None,
            checksum_path: None,
            compressed: false,
            checksum_binary: None,
            parallel: true,
            concurrency_limit: None,
            report_path: None,
        }
    }

    pub fn with_info_path(mut self, path: Option<PathBuf>) -> Self {
        self.info_path = path;
        self
    }

    pub fn with_checksum_path(mut self, path: Option<PathBuf>) -> Self {
        self.checksum_path = path;
        self
    }

    /// Gzip the catalog.
    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Overrides the catalog sidecar marker, which otherwise follows the
    /// compression flag.
    pub fn with_checksum_binary(mut self, binary: Option<bool>) -> Self {
        self.checksum_binary = binary;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Also write a JSON [`RepositoryReport`] to `path`.
    pub fn with_report_path(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn info_path(&self) -> PathBuf {
        match &self.info_path {
            Some(path) => path.clone(),
            None if self.compressed => self.data_dir.join(COMPRESSED_CATALOG_BASENAME),
            None => self.data_dir.join(CATALOG_BASENAME),
        }
    }

    pub fn checksum_path(&self) -> PathBuf {
        self.checksum_path
            .clone()
            .unwrap_or_else(|| sidecar_path(&self.info_path()))
    }

    pub fn checksum_binary(&self) -> bool {
        self.checksum_binary.unwrap_or(self.compressed)
    }
}

/// Whether any location needs a version control client.
pub fn needs_remote(locations: &[String]) -> bool {
    locations.iter().any(|location| is_url(location))
}

/// Fetches every location into the data directory and writes the catalog.
///
/// `remote` is only consulted for `scheme://` locations; pass `None` when
/// there are none. Nothing is written to the catalog or its checksum when any
/// fetch fails, but artifacts already produced by other fetches stay on disk.
#[instrument(skip(config, remote, locations), fields(data_dir = %config.data_dir.display()))]
pub async fn create_repository(
    config: &RepositoryConfig,
    locations: &[String],
    remote: Option<Arc<dyn RemoteClient>>,
) -> Result<RepositoryReport, FetchError> {
    if !config.data_dir.is_dir() {
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| FetchError::io("Failed to create data directory", &config.data_dir, e))?;
    }

    let mut dispatcher = Dispatcher::local();
    if let Some(client) = remote {
        dispatcher = dispatcher.with_remote_client(client);
    }

    debug!(remote = dispatcher.has_remote(), "Dispatcher ready");

    let executor = FetchExecutor::new(Arc::new(dispatcher), config.data_dir.clone())
        .with_parallel(config.parallel)
        .with_concurrency_limit(config.concurrency_limit);
    let addons = executor.fetch_all(locations).await?;

    let mut summaries = Vec::with_capacity(addons.len());
    for addon in &addons {
        let archive = config
            .data_dir
            .join(addon.id())
            .join(addon.archive_basename());
        let archive_md5 = match addon.archive_md5() {
            Some(digest) => digest.to_string(),
            None => file_md5(&archive)?,
        };
        summaries.push(AddonSummary {
            id: addon.id().to_string(),
            version: addon.version().to_string(),
            archive_md5,
            archive,
        });
    }

    let info_path = config.info_path();
    let checksum_path = config.checksum_path();
    Catalog::new(&addons).publish(
        &info_path,
        config.compressed,
        Some(&checksum_path),
        config.checksum_binary(),
    )?;

    let report = RepositoryReport {
        addons: summaries,
        catalog_path: info_path,
        checksum_path,
        compressed: config.compressed,
    };

    if let Some(report_path) = &config.report_path {
        let json = serde_json::to_vec_pretty(&report).map_err(|e| FetchError::Io {
            context: format!("Failed to encode report {}", report_path.display()),
            source: e.into(),
        })?;
        fs::write(report_path, json)
            .map_err(|e| FetchError::io("Failed to write report", report_path, e))?;
    }

    info!(
        addons = report.addons.len(),
        catalog = %report.catalog_path.display(),
        "Repository updated"
    );
    Ok(report)
}
