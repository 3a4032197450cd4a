//! Packages an add-on from a remote version control repository.
//!
//! Locations use the form `REPO[#BRANCH][:PATH]`. A leading `scheme://`
//! belongs to `REPO`, so only a trailing `:PATH` splits off the path.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tempfile::TempDir;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::fetch::layout::AddonTarget;
use crate::fetch::metadata::parse_metadata_file;
use crate::model::{AddonMetadata, INFO_BASENAME};
use crate::traits::{FetchError, Fetcher, RemoteClient};

const LOCATION_PATTERN: &str = r"^((?:[A-Za-z0-9+.-]+://)?.*?)(?:#([^#]*?))?(?::([^:]*))?$";

fn location_regex() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| Regex::new(LOCATION_PATTERN).expect("location pattern compiles"))
}

/// A parsed `REPO[#BRANCH][:PATH]` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    pub repository: String,
    pub branch: Option<String>,
    /// Folder of the add-on inside the repository, `.` for the root.
    pub path: String,
}

impl RemoteLocation {
    pub fn parse(location: &str) -> Result<Self, FetchError> {
        let invalid = |reason: &str| FetchError::InvalidLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        let captures = location_regex()
            .captures(location)
            .ok_or_else(|| invalid("expected REPO[#BRANCH][:PATH]"))?;
        let repository = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if repository.is_empty() {
            return Err(invalid("missing repository"));
        }

        Ok(Self {
            repository: repository.to_string(),
            branch: captures.get(2).map(|m| m.as_str().to_string()),
            path: captures
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| ".".to_string()),
        })
    }

    /// The add-on path relative to the repository root, `""` for the root.
    pub fn tree_path(&self) -> &str {
        let path = self.path.trim_start_matches("./").trim_end_matches('/');
        if path == "." {
            ""
        } else {
            path
        }
    }
}

/// Fetcher for add-ons living in a git repository.
pub struct RemoteFetcher {
    client: Arc<dyn RemoteClient>,
}

impl RemoteFetcher {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self { client }
    }

    fn fetch_from_clone(
        &self,
        remote: &RemoteLocation,
        clone: &Path,
        target_folder: &Path,
    ) -> Result<AddonMetadata, FetchError> {
        self.client.clone_repository(&remote.repository, clone)?;
        if let Some(branch) = &remote.branch {
            self.client.checkout(clone, branch)?;
        }

        let source_folder = clone.join(remote.tree_path());
        let metadata = parse_metadata_file(&source_folder.join(INFO_BASENAME))?;
        let target = AddonTarget::prepare(target_folder, &metadata)?;

        let archive_path = target.archive_path();
        let prefix = format!("{}/", metadata.id());
        self.client
            .export_zip(clone, remote.tree_path(), &prefix, &archive_path)?;
        let archive_md5 = target.seal_archive()?;
        target.copy_metadata_from_dir(&source_folder)?;

        info!(
            id = metadata.id(),
            version = metadata.version(),
            repository = %remote.repository,
            branch = remote.branch.as_deref().unwrap_or("<default>"),
            archive = %archive_path.display(),
            "Packaged remote add-on"
        );
        Ok(metadata.with_archive_md5(archive_md5))
    }
}

impl Fetcher for RemoteFetcher {
    fn name(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, target_folder))]
    fn fetch(&self, location: &str, target_folder: &Path) -> Result<AddonMetadata, FetchError> {
        let remote = RemoteLocation::parse(location)?;
        let clone = TempClone::new()?;

        let result = self.fetch_from_clone(&remote, clone.path(), target_folder);
        let cleanup = clone.close();

        settle(result, cleanup)
    }
}

/// Combines a fetch outcome with the removal of its clone.
///
/// A fetch error wins over a cleanup error; a cleanup error fails an
/// otherwise successful fetch.
fn settle<T>(
    result: Result<T, FetchError>,
    cleanup: Result<(), FetchError>,
) -> Result<T, FetchError> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(cleanup_error)) => {
            warn!(error = %cleanup_error, "Temporary clone left behind after failed fetch");
            Err(error)
        }
    }
}

/// Temporary directory holding one clone.
///
/// [`TempClone::close`] removes it and reports failures. If the value is
/// dropped without `close` (panic, early return), `TempDir` still makes a
/// best-effort removal.
#[derive(Debug)]
pub struct TempClone {
    dir: TempDir,
}

impl TempClone {
    pub fn new() -> Result<Self, FetchError> {
        let dir = tempfile::Builder::new()
            .suffix("-repo")
            .tempdir()
            .map_err(|e| {
                FetchError::io("Failed to create temporary directory in", &std::env::temp_dir(), e)
            })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Deletes the clone.
    ///
    /// Read-only entries that refuse removal get their write permission
    /// restored and are removed once more; any other failure is returned.
    pub fn close(self) -> Result<(), FetchError> {
        remove_tree(self.dir.path())
    }
}

pub(crate) fn remove_tree(root: &Path) -> Result<(), FetchError> {
    if !root.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            FetchError::Cleanup {
                path,
                source: io::Error::from(e),
            }
        })?;
        let path = entry.path();
        let is_dir = entry.file_type().is_dir();
        let parent = path.parent().filter(|parent| parent.starts_with(root));
        remove_entry(path, is_dir, parent).map_err(|source| FetchError::Cleanup {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn remove_entry(path: &Path, is_dir: bool, parent: Option<&Path>) -> io::Result<()> {
    retry_writable(path, parent, || {
        if is_dir {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    })
}

/// Runs `remove`, and on a permission error makes `path` and `parent`
/// writable and runs it once more.
fn retry_writable(
    path: &Path,
    parent: Option<&Path>,
    remove: impl Fn() -> io::Result<()>,
) -> io::Result<()> {
    match remove() {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(path = %path.display(), "Clearing read-only flag before removal");
            make_writable(path)?;
            if let Some(parent) = parent {
                make_writable(parent)?;
            }
            remove()
        }
        other => other,
    }
}

fn make_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::symlink_metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[test]
    fn test_parse_full_location() {
        let remote = RemoteLocation::parse("https://x/y.git#rel-1.0:sub/dir").unwrap();
        assert_eq!(
            remote,
            RemoteLocation {
                repository: "https://x/y.git".to_string(),
                branch: Some("rel-1.0".to_string()),
                path: "sub/dir".to_string(),
            }
        );
        assert_eq!(remote.tree_path(), "sub/dir");
    }

    #[test]
    fn test_parse_repository_only() {
        let remote = RemoteLocation::parse("https://x/y.git").unwrap();
        assert_eq!(remote.repository, "https://x/y.git");
        assert_eq!(remote.branch, None);
        assert_eq!(remote.path, ".");
        assert_eq!(remote.tree_path(), "");
    }

    #[test]
    fn test_parse_path_without_branch() {
        let remote =
            RemoteLocation::parse("https://github.com/o/kodi-repo.git:repository.demo").unwrap();
        assert_eq!(remote.repository, "https://github.com/o/kodi-repo.git");
        assert_eq!(remote.branch, None);
        assert_eq!(remote.path, "repository.demo");
    }

    #[test]
    fn test_parse_branch_without_path() {
        let remote = RemoteLocation::parse("file:///srv/git/addon.git#main").unwrap();
        assert_eq!(remote.repository, "file:///srv/git/addon.git");
        assert_eq!(remote.branch.as_deref(), Some("main"));
        assert_eq!(remote.path, ".");
    }

    #[test]
    fn test_parse_empty_repository_rejected() {
        let err = RemoteLocation::parse("#main:sub").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_remove_tree_clears_read_only_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("clone");
        fs::create_dir_all(root.join(".git").join("objects")).unwrap();
        let object = root.join(".git").join("objects").join("pack");
        fs::write(&object, b"data").unwrap();
        let mut permissions = fs::metadata(&object).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&object, permissions).unwrap();

        remove_tree(&root).unwrap();
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_tree_unlocks_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("clone");
        let locked = root.join("objects");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("pack"), b"data").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        remove_tree(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_retry_writable_retries_once_then_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pack");
        fs::write(&file, b"data").unwrap();
        let mut permissions = fs::metadata(&file).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&file, permissions).unwrap();

        let attempts = Mutex::new(0);
        let err = retry_writable(&file, Some(dir.path()), || {
            *attempts.lock().unwrap() += 1;
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(*attempts.lock().unwrap(), 2);
        assert!(!fs::metadata(&file).unwrap().permissions().readonly());
    }

    #[test]
    fn test_retry_writable_skips_other_errors() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Mutex::new(0);
        let err = retry_writable(dir.path(), None, || {
            *attempts.lock().unwrap() += 1;
            Err(io::Error::from(io::ErrorKind::NotFound))
        })
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    fn cleanup_error() -> FetchError {
        FetchError::Cleanup {
            path: PathBuf::from("/tmp/clone"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        }
    }

    #[test]
    fn test_settle_outcomes() {
        assert_eq!(settle(Ok(1), Ok(())).unwrap(), 1);

        let err = settle(Ok(1), Err(cleanup_error())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cleanup);

        let err = settle::<i32>(Err(FetchError::NotFound("x".into())), Ok(())).unwrap_err();
        assert!(matches!(err, FetchError::NotFound(ref l) if l == "x"));

        let err =
            settle::<i32>(Err(FetchError::NotFound("x".into())), Err(cleanup_error())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// Serves a fixed add-on tree from disk instead of running git.
    struct FakeClient {
        files: Vec<(&'static str, &'static str)>,
        calls: Mutex<Vec<String>>,
        clones: Mutex<Vec<PathBuf>>,
        fail_checkout: bool,
    }

    impl FakeClient {
        fn new(files: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                files,
                calls: Mutex::new(Vec::new()),
                clones: Mutex::new(Vec::new()),
                fail_checkout: false,
            }
        }
    }

    impl RemoteClient for FakeClient {
        fn clone_repository(&self, repository: &str, destination: &Path) -> Result<(), FetchError> {
            self.calls.lock().unwrap().push(format!("clone {repository}"));
            self.clones.lock().unwrap().push(destination.to_path_buf());
            for (name, content) in &self.files {
                let path = destination.join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }
            Ok(())
        }

        fn checkout(&self, _checkout: &Path, branch: &str) -> Result<(), FetchError> {
            self.calls.lock().unwrap().push(format!("checkout {branch}"));
            if self.fail_checkout {
                return Err(FetchError::Vcs {
                    command: format!("git checkout {branch}"),
                    stderr: "pathspec did not match".to_string(),
                });
            }
            Ok(())
        }

        fn export_zip(
            &self,
            _checkout: &Path,
            tree_path: &str,
            prefix: &str,
            output: &Path,
        ) -> Result<(), FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("export {tree_path} as {prefix}"));
            fs::write(output, b"zip bytes").unwrap();
            Ok(())
        }
    }

    const FILES: [(&str, &str); 3] = [
        (
            "addons/plugin.demo/addon.xml",
            r#"<addon id="plugin.demo" version="0.9.0"/>"#,
        ),
        ("addons/plugin.demo/fanart.jpg", "jpg"),
        ("README.md", "readme"),
    ];

    #[test]
    fn test_remote_fetch_packages_subfolder() {
        let client = Arc::new(FakeClient::new(FILES.to_vec()));
        let fetcher = RemoteFetcher::new(client.clone());
        let repo = tempfile::tempdir().unwrap();

        let metadata = fetcher
            .fetch("https://example.org/addons.git#v0.9:addons/plugin.demo", repo.path())
            .unwrap();
        assert_eq!(metadata.id(), "plugin.demo");

        let calls = client.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "clone https://example.org/addons.git".to_string(),
                "checkout v0.9".to_string(),
                "export addons/plugin.demo as plugin.demo/".to_string(),
            ]
        );

        let folder = repo.path().join("plugin.demo");
        assert!(folder.join("plugin.demo-0.9.0.zip").is_file());
        assert!(folder.join("plugin.demo-0.9.0.zip.md5").is_file());
        assert!(folder.join("fanart.jpg").is_file());
        assert!(folder.join("addon.xml").is_file());

        for clone in client.clones.lock().unwrap().iter() {
            assert!(!clone.exists(), "clone {} was not removed", clone.display());
        }
    }

    #[test]
    fn test_remote_fetch_cleans_up_on_failure() {
        let mut client = FakeClient::new(FILES.to_vec());
        client.fail_checkout = true;
        let client = Arc::new(client);
        let fetcher = RemoteFetcher::new(client.clone());
        let repo = tempfile::tempdir().unwrap();

        let err = fetcher
            .fetch("https://example.org/addons.git#nope", repo.path())
            .unwrap_err();
        assert!(matches!(err, FetchError::Vcs { .. }));

        let clones = client.clones.lock().unwrap();
        assert_eq!(clones.len(), 1);
        assert!(!clones[0].exists());
        assert_eq!(fs::read_dir(repo.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remote_fetch_missing_descriptor() {
        let client = Arc::new(FakeClient::new(vec![("README.md", "readme")]));
        let fetcher = RemoteFetcher::new(client);
        let repo = tempfile::tempdir().unwrap();

        let err = fetcher
            .fetch("https://example.org/addons.git", repo.path())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
