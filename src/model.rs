use std::path::PathBuf;

use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

/// File name of the add-on descriptor.
pub const INFO_BASENAME: &str = "addon.xml";

/// Metadata files copied next to the archive under their own name.
pub const METADATA_BASENAMES: [&str; 4] = [INFO_BASENAME, "icon.png", "fanart.jpg", "LICENSE.txt"];

/// Changelog member, copied as `changelog-<version>.txt`.
pub const CHANGELOG_BASENAME: &str = "changelog.txt";

/// Parsed and validated add-on descriptor.
///
/// Created by [`crate::fetch::metadata`]; fetchers only attach the digest of
/// the archive they wrote.
#[derive(Debug, Clone)]
pub struct AddonMetadata {
    id: String,
    version: String,
    descriptor: Descriptor,
    archive_md5: Option<String>,
}

impl AddonMetadata {
    pub(crate) fn new(id: String, version: String, descriptor: Descriptor) -> Self {
        Self {
            id,
            version,
            descriptor,
            archive_md5: None,
        }
    }

    pub(crate) fn with_archive_md5(mut self, digest: String) -> Self {
        self.archive_md5 = Some(digest);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The full descriptor element, embedded verbatim into the catalog.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// MD5 of the packaged archive, once a fetcher has sealed it.
    pub fn archive_md5(&self) -> Option<&str> {
        self.archive_md5.as_deref()
    }

    /// `<id>-<version>.zip`
    pub fn archive_basename(&self) -> String {
        format!("{}-{}.zip", self.id, self.version)
    }

    /// Pairs of (member name in the source, file name in the target folder).
    pub fn metadata_basenames(&self) -> Vec<(&'static str, String)> {
        METADATA_BASENAMES
            .iter()
            .map(|name| (*name, (*name).to_string()))
            .chain(std::iter::once((
                CHANGELOG_BASENAME,
                format!("changelog-{}.txt", self.version),
            )))
            .collect()
    }
}

/// The root element of an `addon.xml`, kept as its owned XML events.
///
/// Comments, processing instructions and anything outside the root element
/// are dropped; element and text events are kept as read, so writing them
/// back reproduces the element without re-escaping.
#[derive(Debug, Clone)]
pub struct Descriptor {
    events: Vec<Event<'static>>,
}

impl Descriptor {
    pub(crate) fn new(events: Vec<Event<'static>>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[Event<'static>] {
        &self.events
    }
}

/// Machine readable summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryReport {
    pub addons: Vec<AddonSummary>,
    pub catalog_path: PathBuf,
    pub checksum_path: PathBuf,
    pub compressed: bool,
}

/// Where one add-on ended up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonSummary {
    pub id: String,
    pub version: String,
    pub archive: PathBuf,
    /// MD5 of the archive, lowercase hex
    pub archive_md5: String,
}
