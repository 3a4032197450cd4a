//! The per-add-on folder every fetcher writes into.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::fetch::checksum::generate_checksum;
use crate::model::AddonMetadata;
use crate::traits::FetchError;

/// `<target_folder>/<id>/`, created on demand.
///
/// Holds the naming rules for the archive and the metadata copies so the
/// three fetchers share them.
#[derive(Debug)]
pub struct AddonTarget<'a> {
    metadata: &'a AddonMetadata,
    folder: PathBuf,
}

impl<'a> AddonTarget<'a> {
    /// Creates `<target_folder>/<id>/` if it does not exist yet.
    pub fn prepare(target_folder: &Path, metadata: &'a AddonMetadata) -> Result<Self, FetchError> {
        let folder = target_folder.join(metadata.id());
        if !folder.is_dir() {
            fs::create_dir_all(&folder)
                .map_err(|e| FetchError::io("Failed to create add-on folder", &folder, e))?;
        }
        Ok(Self { metadata, folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// `<target_folder>/<id>/<id>-<version>.zip`
    pub fn archive_path(&self) -> PathBuf {
        self.folder.join(self.metadata.archive_basename())
    }

    /// Copies the recognized metadata files found directly in `source_folder`.
    ///
    /// Members that do not exist are skipped.
    pub fn copy_metadata_from_dir(&self, source_folder: &Path) -> Result<(), FetchError> {
        for (source_name, target_name) in self.metadata.metadata_basenames() {
            let source = source_folder.join(source_name);
            if !source.is_file() {
                continue;
            }
            let target = self.folder.join(&target_name);
            fs::copy(&source, &target)
                .map_err(|e| FetchError::io("Failed to copy", &source, e))?;
            debug!(from = %source.display(), to = %target.display(), "Copied metadata file");
        }
        Ok(())
    }

    /// Writes one metadata member from a stream under its target name.
    pub fn write_metadata<R: Read>(&self, target_name: &str, mut source: R) -> Result<(), FetchError> {
        let target = self.folder.join(target_name);
        let mut file =
            File::create(&target).map_err(|e| FetchError::io("Failed to create", &target, e))?;
        io::copy(&mut source, &mut file)
            .map_err(|e| FetchError::io("Failed to write", &target, e))?;
        debug!(to = %target.display(), "Extracted metadata file");
        Ok(())
    }

    /// Writes the `.md5` sidecar of the archive and returns its digest.
    pub fn seal_archive(&self) -> Result<String, FetchError> {
        generate_checksum(&self.archive_path(), true, None)
    }
}

/// Whether two paths name the same existing file or directory.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
