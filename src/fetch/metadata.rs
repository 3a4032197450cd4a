//! Add-on descriptor parsing and id/version validation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::model::{AddonMetadata, Descriptor};
use crate::traits::FetchError;

// Semantic versioning, except that Kodi also accepts `~` before the
// pre-release part.
const VERSION_PATTERN: &str = concat!(
    r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)",
    r"(?:[-~]((?:0|[1-9][0-9]*|[0-9]*[a-zA-Z-][0-9a-zA-Z-]*)",
    r"(?:\.(?:0|[1-9][0-9]*|[0-9]*[a-zA-Z-][0-9a-zA-Z-]*))*))?",
    r"(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$",
);

const ID_PATTERN: &str = r"^[a-z0-9._-]+$";

fn version_regex() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| Regex::new(VERSION_PATTERN).expect("version pattern compiles"))
}

fn id_regex() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| Regex::new(ID_PATTERN).expect("id pattern compiles"))
}

pub fn is_valid_id(id: &str) -> bool {
    id_regex().is_match(id)
}

pub fn is_valid_version(version: &str) -> bool {
    version_regex().is_match(version)
}

/// Parses the descriptor at `path`.
pub fn parse_metadata_file(path: &Path) -> Result<AddonMetadata, FetchError> {
    let file = File::open(path).map_err(|e| FetchError::InvalidDescriptor {
        source_name: path.display().to_string(),
        reason: format!("cannot open: {e}"),
    })?;
    parse_metadata(BufReader::new(file), &path.display().to_string())
}

/// Parses a descriptor from an open stream.
///
/// `source_name` only appears in error messages.
pub fn parse_metadata<R: BufRead>(
    input: R,
    source_name: &str,
) -> Result<AddonMetadata, FetchError> {
    let invalid = |reason: String| FetchError::InvalidDescriptor {
        source_name: source_name.to_string(),
        reason,
    };

    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut events: Vec<Event<'static>> = Vec::new();
    let mut depth = 0usize;
    let mut attributes = None;
    let mut root_closed = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| invalid(e.to_string()))?
            .into_owned();
        buf.clear();

        if root_closed {
            // Only comments, processing instructions and whitespace may follow the root.
            match event {
                Event::Eof => break,
                Event::Comment(_) | Event::PI(_) => continue,
                Event::Text(text) if is_blank(&text) => continue,
                _ => return Err(invalid("junk after document element".to_string())),
            }
        }

        match event {
            Event::Start(start) => {
                if depth == 0 {
                    attributes = Some(root_attributes(&start).map_err(&invalid)?);
                }
                depth += 1;
                events.push(Event::Start(start));
            }
            Event::Empty(start) => {
                if depth == 0 {
                    attributes = Some(root_attributes(&start).map_err(&invalid)?);
                    root_closed = true;
                }
                events.push(Event::Empty(start));
            }
            Event::End(end) => {
                if depth == 0 {
                    return Err(invalid("end tag without a matching start".to_string()));
                }
                events.push(Event::End(end));
                depth -= 1;
                root_closed = depth == 0;
            }
            event @ (Event::Text(_) | Event::CData(_)) if depth > 0 => events.push(event),
            Event::Text(text) if !is_blank(&text) => {
                return Err(invalid("text outside the document element".to_string()))
            }
            Event::CData(_) => {
                return Err(invalid("CDATA outside the document element".to_string()))
            }
            Event::Eof => return Err(invalid("no complete root element".to_string())),
            _ => {}
        }
    }

    let (id, version) = attributes.ok_or_else(|| invalid("no root element".to_string()))?;

    match id {
        Some(ref id) if is_valid_id(id) => {}
        _ => return Err(FetchError::InvalidId(id)),
    }
    match version {
        Some(ref version) if is_valid_version(version) => {}
        _ => return Err(FetchError::InvalidVersion(version)),
    }

    Ok(AddonMetadata::new(
        id.unwrap_or_default(),
        version.unwrap_or_default(),
        Descriptor::new(events),
    ))
}

fn is_blank(text: &[u8]) -> bool {
    let text = text.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(text);
    text.iter().all(u8::is_ascii_whitespace)
}

type RootAttributes = (Option<String>, Option<String>);

fn root_attributes(root: &BytesStart<'_>) -> Result<RootAttributes, String> {
    Ok((attribute(root, "id")?, attribute(root, "version")?))
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, String> {
    let Some(attr) = element.try_get_attribute(name).map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    let value = attr.unescape_value().map_err(|e| e.to_string())?;
    Ok(Some(value.into_owned()))
}
