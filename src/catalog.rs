//! The aggregated `addons.xml` catalog.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use tracing::info;

use crate::fetch::checksum::{generate_checksum, sidecar_path};
use crate::model::AddonMetadata;
use crate::traits::FetchError;

const ROOT_ELEMENT: &str = "addons";

/// Builds and writes the repository catalog.
///
/// Descriptors appear in the order they are given; duplicates are kept.
#[derive(Debug)]
pub struct Catalog<'a> {
    addons: &'a [AddonMetadata],
}

impl<'a> Catalog<'a> {
    pub fn new(addons: &'a [AddonMetadata]) -> Self {
        Self { addons }
    }

    /// Serializes the catalog as UTF-8 with a leading XML declaration.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FetchError> {
        let mut writer = Writer::new(Vec::new());
        let xml_error = |e: std::io::Error| FetchError::Io {
            context: "Failed to serialize catalog".to_string(),
            source: e,
        };

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| xml_error(to_io(e)))?;
        writer
            .get_mut()
            .write_all(b"\n")
            .map_err(xml_error)?;
        writer
            .write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))
            .map_err(|e| xml_error(to_io(e)))?;
        for addon in self.addons {
            for event in addon.descriptor().events() {
                writer
                    .write_event(event.clone())
                    .map_err(|e| xml_error(to_io(e)))?;
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
            .map_err(|e| xml_error(to_io(e)))?;

        Ok(writer.into_inner())
    }

    /// Writes the catalog to `info_path`, gzip compressed when asked.
    pub fn write(&self, info_path: &Path, compressed: bool) -> Result<(), FetchError> {
        let bytes = self.to_bytes()?;
        let file = File::create(info_path)
            .map_err(|e| FetchError::io("Failed to create catalog", info_path, e))?;
        let write_error = |e| FetchError::io("Failed to write catalog", info_path, e);

        if compressed {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::best());
            encoder.write_all(&bytes).map_err(write_error)?;
            encoder
                .finish()
                .and_then(|mut inner| inner.flush())
                .map_err(write_error)?;
        } else {
            let mut out = BufWriter::new(file);
            out.write_all(&bytes).map_err(write_error)?;
            out.flush().map_err(write_error)?;
        }

        info!(
            path = %info_path.display(),
            addons = self.addons.len(),
            compressed,
            "Catalog written"
        );
        Ok(())
    }

    /// Writes the catalog and its checksum sidecar.
    ///
    /// `checksum_path` defaults to `<info_path>.md5`; `binary` chooses the
    /// sidecar marker.
    pub fn publish(
        &self,
        info_path: &Path,
        compressed: bool,
        checksum_path: Option<&Path>,
        binary: bool,
    ) -> Result<String, FetchError> {
        self.write(info_path, compressed)?;
        let checksum_path = checksum_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| sidecar_path(info_path));
        generate_checksum(info_path, binary, Some(&checksum_path))
    }
}

// Writer failures are flattened into io::Error.
fn to_io<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
