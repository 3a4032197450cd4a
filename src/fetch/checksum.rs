//! MD5 sidecar files in the format written by `md5sum`.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use tracing::debug;

use crate::traits::FetchError;

const CHUNK_SIZE: usize = 4096;

/// Computes the MD5 of `path` and writes `<digest> <marker><relpath>\n`.
///
/// The sidecar goes to `checksum_path`, or `<path>.md5` when `None`. The
/// marker is `*` for binary files and a space for text files. The relative
/// path is computed from the sidecar's directory and always uses `/`.
///
/// Returns the hex digest.
pub fn generate_checksum(
    path: &Path,
    is_binary: bool,
    checksum_path: Option<&Path>,
) -> Result<String, FetchError> {
    let checksum_path = match checksum_path {
        Some(checksum_path) => checksum_path.to_path_buf(),
        None => sidecar_path(path),
    };

    let digest = file_md5(path)?;

    let checksum_dir = match checksum_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let relative = relative_path(&checksum_dir, path)
        .map_err(|e| FetchError::io("Failed to resolve", path, e))?;

    let marker = if is_binary { '*' } else { ' ' };
    let line = format!("{} {}{}\n", digest, marker, posix_path(&relative));
    fs::write(&checksum_path, line)
        .map_err(|e| FetchError::io("Failed to write checksum", &checksum_path, e))?;

    debug!(file = %path.display(), checksum = %checksum_path.display(), %digest, "Checksum written");
    Ok(digest)
}

/// `<path>.md5`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".md5");
    PathBuf::from(name)
}

/// Streams `path` through MD5 and returns the lowercase hex digest.
pub fn file_md5(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path).map_err(|e| FetchError::io("Failed to open", path, e))?;
    let mut hasher = Md5::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut chunk)
            .map_err(|e| FetchError::io("Failed to read", path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Joins the components of a relative path with `/`.
fn posix_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Lexical relative path from directory `base` to `target`, like
/// `os.path.relpath`: both sides are made absolute against the current
/// directory but symlinks are not resolved.
pub(crate) fn relative_path(base: &Path, target: &Path) -> std::io::Result<PathBuf> {
    let base = normalize(&std::path::absolute(base)?);
    let target = normalize(&std::path::absolute(target)?);

    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();
    let common = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }
    Ok(relative)
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
