//! Publishes an add-on that is already packaged as a zip archive.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::{info, instrument, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::fetch::expand_home;
use crate::fetch::layout::{same_file, AddonTarget};
use crate::fetch::metadata::parse_metadata;
use crate::model::{AddonMetadata, INFO_BASENAME};
use crate::traits::{FetchError, Fetcher};

/// Fetcher for a local zip whose entries all sit below one root folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveFetcher;

impl Fetcher for ArchiveFetcher {
    fn name(&self) -> &'static str {
        "archive"
    }

    #[instrument(skip(self, target_folder))]
    fn fetch(&self, location: &str, target_folder: &Path) -> Result<AddonMetadata, FetchError> {
        let source = expand_home(location);
        let file = File::open(&source).map_err(|e| FetchError::io("Failed to open", &source, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| FetchError::archive(&source, e))?;

        let root = archive_root(&archive, &source)?;
        let descriptor_name = format!("{root}/{INFO_BASENAME}");
        let metadata = {
            let entry = archive.by_name(&descriptor_name).map_err(|e| match e {
                ZipError::FileNotFound => FetchError::InvalidDescriptor {
                    source_name: format!("{}!{}", source.display(), descriptor_name),
                    reason: "missing from archive".to_string(),
                },
                other => FetchError::archive(&source, other),
            })?;
            parse_metadata(
                BufReader::new(entry),
                &format!("{}!{}", source.display(), descriptor_name),
            )?
        };

        let target = AddonTarget::prepare(target_folder, &metadata)?;
        extract_metadata(&mut archive, &root, &source, &target, &metadata)?;
        drop(archive);

        let archive_path = target.archive_path();
        if same_file(&source, &archive_path) {
            warn!(archive = %archive_path.display(), "Archive already in place, skipping copy");
        } else {
            fs::copy(&source, &archive_path)
                .map_err(|e| FetchError::io("Failed to copy", &source, e))?;
        }
        let archive_md5 = target.seal_archive()?;

        info!(
            id = metadata.id(),
            version = metadata.version(),
            archive = %archive_path.display(),
            "Published add-on archive"
        );
        Ok(metadata.with_archive_md5(archive_md5))
    }
}

/// Returns the single top-level folder name shared by every entry.
pub fn archive_root<R: Read + Seek>(archive: &ZipArchive<R>, path: &Path) -> Result<String, FetchError> {
    let roots: BTreeSet<&str> = archive
        .file_names()
        .map(|name| name.split('/').next().unwrap_or_default())
        .collect();

    if roots.len() != 1 {
        return Err(FetchError::AmbiguousArchiveRoot {
            path: path.to_path_buf(),
            roots: roots.into_iter().map(str::to_string).collect(),
        });
    }
    Ok(roots.into_iter().next().unwrap_or_default().to_string())
}

fn extract_metadata<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    root: &str,
    source: &Path,
    target: &AddonTarget<'_>,
    metadata: &AddonMetadata,
) -> Result<(), FetchError> {
    for (member, target_name) in metadata.metadata_basenames() {
        let entry = match archive.by_name(&format!("{root}/{member}")) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => continue,
            Err(e) => return Err(FetchError::archive(source, e)),
        };
        target.write_metadata(&target_name, entry)?;
    }
    Ok(())
}
