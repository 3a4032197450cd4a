//! Packages an add-on from a local source folder.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::{info, instrument, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::fetch::expand_home;
use crate::fetch::layout::{same_file, AddonTarget};
use crate::fetch::metadata::parse_metadata_file;
use crate::model::{AddonMetadata, INFO_BASENAME};
use crate::traits::{FetchError, Fetcher};

/// Fetcher for a directory holding `addon.xml` at its root.
#[derive(Debug, Default, Clone, Copy)]
pub struct FolderFetcher;

impl Fetcher for FolderFetcher {
    fn name(&self) -> &'static str {
        "folder"
    }

    #[instrument(skip(self, target_folder))]
    fn fetch(&self, location: &str, target_folder: &Path) -> Result<AddonMetadata, FetchError> {
        let source = expand_home(location);
        let metadata = parse_metadata_file(&source.join(INFO_BASENAME))?;
        let target = AddonTarget::prepare(target_folder, &metadata)?;

        let archive_path = target.archive_path();
        let entries = write_folder_archive(&source, metadata.id(), &archive_path)?;
        let archive_md5 = target.seal_archive()?;

        if same_file(&source, target.folder()) {
            warn!(folder = %source.display(), "Source is the target folder, skipping metadata copy");
        } else {
            target.copy_metadata_from_dir(&source)?;
        }

        info!(
            id = metadata.id(),
            version = metadata.version(),
            entries,
            archive = %archive_path.display(),
            "Packaged add-on folder"
        );
        Ok(metadata.with_archive_md5(archive_md5))
    }
}

/// Zips every file below `source` as `<id>/<relative path>`.
///
/// Entries are written in path order with a fixed timestamp so the same tree
/// always produces the same bytes. The archive itself is skipped when it lies
/// inside `source`. Returns the number of entries written.
pub fn write_folder_archive(source: &Path, id: &str, archive_path: &Path) -> Result<usize, FetchError> {
    let file = File::create(archive_path)
        .map_err(|e| FetchError::io("Failed to create archive", archive_path, e))?;
    let mut writer = ZipWriter::new(file);
    let base_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let archive_name = archive_path.file_name();
    let mut count = 0;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            FetchError::io("Failed to walk", &path, io::Error::from(e))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if Some(entry.file_name()) == archive_name && same_file(path, archive_path) {
            continue;
        }

        let relative = path.strip_prefix(source).unwrap_or(path);
        let mut name = id.to_string();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        let meta = fs::metadata(path).map_err(|e| FetchError::io("Failed to stat", path, e))?;
        let options = match unix_mode(&meta) {
            Some(mode) => base_options.unix_permissions(mode),
            None => base_options,
        };

        writer
            .start_file(name, options)
            .map_err(|e| FetchError::archive(archive_path, e))?;
        let mut input = File::open(path).map_err(|e| FetchError::io("Failed to open", path, e))?;
        io::copy(&mut input, &mut writer)
            .map_err(|e| FetchError::io("Failed to compress", path, e))?;
        count += 1;
    }

    writer
        .finish()
        .map_err(|e| FetchError::archive(archive_path, e))?;
    Ok(count)
}

#[cfg(unix)]
fn unix_mode(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_meta: &fs::Metadata) -> Option<u32> {
    None
}
