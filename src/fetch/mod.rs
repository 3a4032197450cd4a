//! Fetch module - turns add-on locations into packaged repository entries.
//!
//! - **Metadata**: descriptor parsing and validation via [`metadata`]
//! - **Checksums**: `md5sum` compatible sidecars via [`checksum`]
//! - **Fetchers**: [`FolderFetcher`], [`ArchiveFetcher`], [`RemoteFetcher`]
//! - **Dispatch**: location routing via [`Dispatcher`]

pub mod archive;
pub mod checksum;
pub mod dispatch;
pub mod folder;
pub mod git;
pub mod layout;
pub mod metadata;
pub mod remote;

use std::path::PathBuf;

pub use archive::ArchiveFetcher;
pub use checksum::generate_checksum;
pub use dispatch::{is_url, Dispatcher, FetcherKind};
pub use folder::FolderFetcher;
pub use git::GitCli;
pub use layout::AddonTarget;
pub use metadata::{parse_metadata, parse_metadata_file};
pub use remote::{RemoteFetcher, RemoteLocation, TempClone};

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
            .or_else(|| path.strip_prefix("~\\"))
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
