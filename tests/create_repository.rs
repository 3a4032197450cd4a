use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addon_repository::{
    create_repository, ErrorKind, FetchError, RemoteClient, RepositoryConfig, RepositoryReport,
};
use pretty_assertions::assert_eq;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn descriptor(id: &str, version: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<addon id=\"{id}\" version=\"{version}\" name=\"{id}\">\n  <extension point=\"xbmc.addon.metadata\"><summary>{id}</summary></extension>\n</addon>\n"
    )
}

fn addon_folder(root: &Path, dir_name: &str, id: &str, version: &str) -> String {
    let folder = root.join(dir_name);
    fs::create_dir_all(folder.join("resources")).unwrap();
    fs::write(folder.join("addon.xml"), descriptor(id, version)).unwrap();
    fs::write(folder.join("icon.png"), format!("icon of {id}")).unwrap();
    fs::write(folder.join("changelog.txt"), format!("{version}: initial")).unwrap();
    fs::write(folder.join("resources").join("settings.xml"), "<settings/>").unwrap();
    folder.display().to_string()
}

fn addon_zip(root: &Path, file_name: &str, id: &str, version: &str) -> String {
    let path = root.join(file_name);
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    for (name, content) in [
        ("addon.xml", descriptor(id, version)),
        ("LICENSE.txt", "GPL".to_string()),
        ("default.py", "pass".to_string()),
    ] {
        writer
            .start_file(format!("{id}/{name}"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path.display().to_string()
}

fn catalog_ids(xml: &str) -> Vec<String> {
    xml.match_indices("<addon id=\"")
        .map(|(start, pattern)| {
            let rest = &xml[start + pattern.len()..];
            rest[..rest.find('"').unwrap()].to_string()
        })
        .collect()
}

/// Every file below `root`, relative path to content, in path order.
fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_single_folder_end_to_end() {
    let work = tempfile::tempdir().unwrap();
    let source = addon_folder(work.path(), "src", "service.example", "1.0.0");
    let data_dir = work.path().join("repo");

    let config = RepositoryConfig::new(&data_dir);
    let report = create_repository(&config, &[source], None).await.unwrap();

    let folder = data_dir.join("service.example");
    let archive = folder.join("service.example-1.0.0.zip");
    assert!(archive.is_file());
    assert!(folder.join("addon.xml").is_file());
    assert!(folder.join("icon.png").is_file());
    assert!(folder.join("changelog-1.0.0.txt").is_file());

    let sidecar = fs::read_to_string(folder.join("service.example-1.0.0.zip.md5")).unwrap();
    assert_eq!(
        sidecar,
        format!("{} *service.example-1.0.0.zip\n", report.addons[0].archive_md5)
    );

    let catalog = fs::read_to_string(data_dir.join("addons.xml")).unwrap();
    assert!(catalog.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<addons>"));
    assert!(catalog.contains("<addon id=\"service.example\" version=\"1.0.0\""));
    assert_eq!(catalog_ids(&catalog), vec!["service.example"]);

    let catalog_sidecar = fs::read_to_string(data_dir.join("addons.xml.md5")).unwrap();
    assert!(catalog_sidecar.ends_with("  addons.xml\n"));
}

#[tokio::test]
async fn test_catalog_follows_input_order() {
    let work = tempfile::tempdir().unwrap();
    let b = addon_folder(work.path(), "b-src", "plugin.b", "1.0.0");
    let a = addon_zip(work.path(), "a.zip", "plugin.a", "2.0.0~beta1");
    let c = addon_folder(work.path(), "c-src", "plugin.c", "0.0.1");
    let data_dir = work.path().join("repo");

    let config = RepositoryConfig::new(&data_dir);
    create_repository(&config, &[b, a, c], None).await.unwrap();

    let catalog = fs::read_to_string(data_dir.join("addons.xml")).unwrap();
    assert_eq!(catalog_ids(&catalog), vec!["plugin.b", "plugin.a", "plugin.c"]);
    assert!(data_dir
        .join("plugin.a")
        .join("plugin.a-2.0.0~beta1.zip")
        .is_file());
    assert_eq!(
        fs::read_to_string(data_dir.join("plugin.a").join("LICENSE.txt")).unwrap(),
        "GPL"
    );
}

#[tokio::test]
async fn test_parallel_and_sequential_runs_are_identical() {
    let work = tempfile::tempdir().unwrap();
    let locations = vec![
        addon_folder(work.path(), "one", "script.one", "1.2.3"),
        addon_zip(work.path(), "two.zip", "script.two", "0.1.0+build.9"),
        addon_folder(work.path(), "three", "script.three", "3.0.0-rc.1"),
    ];

    let parallel_dir = work.path().join("parallel");
    let sequential_dir = work.path().join("sequential");

    create_repository(
        &RepositoryConfig::new(&parallel_dir).with_compression(true),
        &locations,
        None,
    )
    .await
    .unwrap();
    create_repository(
        &RepositoryConfig::new(&sequential_dir)
            .with_compression(true)
            .with_parallel(false),
        &locations,
        None,
    )
    .await
    .unwrap();

    assert_eq!(snapshot(&parallel_dir), snapshot(&sequential_dir));
    assert!(parallel_dir.join("addons.xml.gz").is_file());
    let sidecar = fs::read_to_string(parallel_dir.join("addons.xml.gz.md5")).unwrap();
    assert!(sidecar.ends_with(" *addons.xml.gz\n"));
}

#[tokio::test]
async fn test_failure_keeps_finished_artifacts_but_no_catalog() {
    let work = tempfile::tempdir().unwrap();
    let good = addon_folder(work.path(), "good", "plugin.good", "1.0.0");
    let bad = work.path().join("bad");
    fs::create_dir(&bad).unwrap();
    fs::write(bad.join("addon.xml"), descriptor("plugin.bad", "1.0")).unwrap();
    let data_dir = work.path().join("repo");

    let err = create_repository(
        &RepositoryConfig::new(&data_dir),
        &[good, bad.display().to_string()],
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FetchError::InvalidVersion(Some(ref v)) if v == "1.0"));
    assert!(data_dir
        .join("plugin.good")
        .join("plugin.good-1.0.0.zip")
        .is_file());
    assert!(!data_dir.join("addons.xml").exists());
    assert!(!data_dir.join("addons.xml.md5").exists());
}

#[tokio::test]
async fn test_ambiguous_archive_fails_run() {
    let work = tempfile::tempdir().unwrap();
    let path = work.path().join("two-roots.zip");
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    for name in ["first/addon.xml", "second/addon.xml"] {
        writer
            .start_file(name, SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(descriptor("plugin.x", "1.0.0").as_bytes())
            .unwrap();
    }
    writer.finish().unwrap();

    let err = create_repository(
        &RepositoryConfig::new(work.path().join("repo")),
        &[path.display().to_string()],
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

/// Copies a local directory instead of cloning and zips the requested
/// subfolder instead of running `git archive`.
struct DirectoryRemote {
    origin: PathBuf,
}

impl RemoteClient for DirectoryRemote {
    fn clone_repository(&self, _repository: &str, destination: &Path) -> Result<(), FetchError> {
        for entry in walkdir::WalkDir::new(&self.origin) {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(&self.origin).unwrap();
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).unwrap();
            } else {
                fs::copy(entry.path(), &target).unwrap();
            }
        }
        Ok(())
    }

    fn checkout(&self, _checkout: &Path, _branch: &str) -> Result<(), FetchError> {
        Ok(())
    }

    fn export_zip(
        &self,
        checkout: &Path,
        tree_path: &str,
        prefix: &str,
        output: &Path,
    ) -> Result<(), FetchError> {
        let id = prefix.trim_end_matches('/');
        addon_repository::fetch::folder::write_folder_archive(&checkout.join(tree_path), id, output)
            .map(|_| ())
    }
}

#[tokio::test]
async fn test_remote_location_with_report() {
    let work = tempfile::tempdir().unwrap();
    let origin = work.path().join("origin");
    addon_folder(&origin, "addons/repository.demo", "repository.demo", "1.0.2");
    let local = addon_folder(work.path(), "local", "plugin.local", "4.0.0");
    let data_dir = work.path().join("repo");
    let report_path = work.path().join("report.json");

    let remote: Arc<dyn RemoteClient> = Arc::new(DirectoryRemote { origin });
    let config = RepositoryConfig::new(&data_dir).with_report_path(Some(report_path.clone()));
    create_repository(
        &config,
        &[
            "https://example.org/demo.git#release:addons/repository.demo".to_string(),
            local,
        ],
        Some(remote),
    )
    .await
    .unwrap();

    let folder = data_dir.join("repository.demo");
    assert!(folder.join("repository.demo-1.0.2.zip").is_file());
    assert!(folder.join("changelog-1.0.2.txt").is_file());

    let report: RepositoryReport =
        serde_json::from_slice(&fs::read(&report_path).unwrap()).unwrap();
    let ids: Vec<&str> = report.addons.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["repository.demo", "plugin.local"]);
    assert_eq!(report.catalog_path, data_dir.join("addons.xml"));
}

#[tokio::test]
async fn test_remote_location_without_client() {
    let work = tempfile::tempdir().unwrap();
    let err = create_repository(
        &RepositoryConfig::new(work.path()),
        &["https://example.org/demo.git".to_string()],
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FetchError::RemoteUnavailable { .. }));
}
