//! Routes an add-on location to the fetcher that understands it.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info};

use crate::fetch::archive::ArchiveFetcher;
use crate::fetch::expand_home;
use crate::fetch::folder::FolderFetcher;
use crate::fetch::remote::RemoteFetcher;
use crate::model::AddonMetadata;
use crate::traits::{FetchError, Fetcher, RemoteClient};

/// Which fetch strategy handles a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Folder,
    Archive,
    Remote,
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetcherKind::Folder => "folder",
            FetcherKind::Archive => "archive",
            FetcherKind::Remote => "remote",
        })
    }
}

fn url_regex() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^[A-Za-z0-9+.-]+://.").expect("url pattern compiles"))
}

/// Whether the location starts with a `scheme://` prefix.
pub fn is_url(location: &str) -> bool {
    url_regex().is_match(location)
}

impl FetcherKind {
    /// URLs are remote; otherwise a directory is a folder and a regular file
    /// is an archive.
    ///
    /// # Errors
    ///
    /// [`FetchError::NotFound`] when the local path is neither.
    pub fn detect(location: &str) -> Result<Self, FetchError> {
        if is_url(location) {
            return Ok(FetcherKind::Remote);
        }
        let path = expand_home(location);
        if path.is_dir() {
            Ok(FetcherKind::Folder)
        } else if path.is_file() {
            Ok(FetcherKind::Archive)
        } else {
            Err(FetchError::NotFound(location.to_string()))
        }
    }
}

/// Holds one fetcher per kind and forwards each location to the right one.
///
/// The remote fetcher only exists when a [`RemoteClient`] was supplied.
pub struct Dispatcher {
    folder: FolderFetcher,
    archive: ArchiveFetcher,
    remote: Option<RemoteFetcher>,
}

impl Dispatcher {
    /// Dispatcher for local locations only.
    pub fn local() -> Self {
        Self {
            folder: FolderFetcher,
            archive: ArchiveFetcher,
            remote: None,
        }
    }

    pub fn with_remote_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.remote = Some(RemoteFetcher::new(client));
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::local()
    }
}

impl Fetcher for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    fn fetch(&self, location: &str, target_folder: &Path) -> Result<AddonMetadata, FetchError> {
        let kind = FetcherKind::detect(location)?;
        let fetcher: &dyn Fetcher = match kind {
            FetcherKind::Folder => &self.folder,
            FetcherKind::Archive => &self.archive,
            FetcherKind::Remote => match &self.remote {
                Some(remote) => remote,
                None => {
                    return Err(FetchError::RemoteUnavailable {
                        location: location.to_string(),
                        reason: "no version control client configured".to_string(),
                    })
                }
            },
        };
        info!(location, %kind, "Fetching add-on");
        debug!(fetcher = fetcher.name(), "Dispatching");
        fetcher.fetch(location, target_folder)
    }
}
