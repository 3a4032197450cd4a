//! Error type and capability traits shared by every fetch strategy.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::AddonMetadata;

/// Coarse classification of a [`FetchError`].
///
/// Callers that only care about the category of a failure (exit codes,
/// retries, reporting) match on this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed descriptor, bad id or version, ambiguous archive root,
    /// malformed remote location.
    InvalidInput,
    /// The location is neither a URL, a directory nor a file.
    NotFound,
    /// Read, write, archive, clone or checkout failure.
    Io,
    /// The temporary clone directory could not be removed.
    Cleanup,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NotFound => "not found",
            ErrorKind::Io => "I/O error",
            ErrorKind::Cleanup => "cleanup error",
        };
        f.write_str(name)
    }
}

/// Errors raised while fetching, packaging or cataloguing add-ons.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The descriptor could not be opened or parsed as XML
    #[error("Cannot read add-on metadata from {source_name}: {reason}")]
    InvalidDescriptor { source_name: String, reason: String },

    /// The `id` attribute is missing or has characters outside `[a-z0-9._-]`
    #[error("Invalid add-on ID: {0:?}")]
    InvalidId(Option<String>),

    /// The `version` attribute is missing or breaks the version grammar
    #[error("Invalid add-on version: {0:?}")]
    InvalidVersion(Option<String>),

    /// The zip archive does not contain exactly one root folder
    #[error("Archive should contain exactly one directory, found {roots:?} in {path}")]
    AmbiguousArchiveRoot { path: PathBuf, roots: Vec<String> },

    /// A remote location does not follow `REPO[#BRANCH][:PATH]`
    #[error("Invalid add-on location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// A remote location was supplied but no VCS client is available
    #[error("Cannot fetch {location}: {reason}")]
    RemoteUnavailable { location: String, reason: String },

    /// Two locations resolved to the same add-on id during a parallel run
    #[error("Add-on {id} was supplied by more than one location: {locations:?}")]
    DuplicateId { id: String, locations: Vec<String> },

    /// The location is neither a URL, a directory nor a regular file
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Filesystem failure with the path or action that caused it
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Zip archive could not be read or written
    #[error("Archive error in {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The version control client reported a failure
    #[error("{command} failed: {stderr}")]
    Vcs { command: String, stderr: String },

    /// A worker task ended without reporting a result
    #[error("Add-on worker for {location} did not report a result: {reason}")]
    WorkerFailed { location: String, reason: String },

    /// The temporary clone directory could not be removed
    #[error("Failed to remove temporary directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Wraps an I/O error with a message naming the action and the path.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        FetchError::Io {
            context: format!("{} {}", action, path.display()),
            source,
        }
    }

    pub fn archive(path: &Path, source: zip::result::ZipError) -> Self {
        FetchError::Archive {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidDescriptor { .. }
            | FetchError::InvalidId(_)
            | FetchError::InvalidVersion(_)
            | FetchError::AmbiguousArchiveRoot { .. }
            | FetchError::InvalidLocation { .. }
            | FetchError::RemoteUnavailable { .. }
            | FetchError::DuplicateId { .. } => ErrorKind::InvalidInput,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::Io { .. }
            | FetchError::Archive { .. }
            | FetchError::Vcs { .. }
            | FetchError::WorkerFailed { .. } => ErrorKind::Io,
            FetchError::Cleanup { .. } => ErrorKind::Cleanup,
        }
    }
}

/// A strategy that turns one add-on location into packaged artifacts.
///
/// Implementations write everything for an add-on below
/// `<target_folder>/<id>/` and nowhere else, which is what lets the executor
/// run many fetches against the same target folder without locking.
///
/// # Thread Safety
///
/// Fetchers are shared between worker tasks and must be `Send + Sync`.
pub trait Fetcher: Send + Sync {
    /// Short name used in logs (e.g. `"folder"`, `"archive"`, `"remote"`).
    fn name(&self) -> &'static str;

    /// Packages the add-on found at `location` into `target_folder`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the location cannot be read, the
    /// descriptor is invalid or an artifact cannot be written.
    fn fetch(&self, location: &str, target_folder: &Path) -> Result<AddonMetadata, FetchError>;
}

/// The version control operations a remote fetch needs.
///
/// All calls block until the underlying client finishes.
pub trait RemoteClient: Send + Sync {
    /// Clones `repository` into the existing empty directory `destination`.
    fn clone_repository(&self, repository: &str, destination: &Path) -> Result<(), FetchError>;

    /// Checks out `branch` (a branch or tag name) in the clone at `checkout`.
    fn checkout(&self, checkout: &Path, branch: &str) -> Result<(), FetchError>;

    /// Writes a zip of the committed tree `tree_path` of `HEAD` to `output`,
    /// with every entry name starting with `prefix`.
    ///
    /// The export reads from the checked-out commit, never from the working
    /// directory.
    fn export_zip(
        &self,
        checkout: &Path,
        tree_path: &str,
        prefix: &str,
        output: &Path,
    ) -> Result<(), FetchError>;
}
