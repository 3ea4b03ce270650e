//! Container access for ZIP-based OPC packages.
//!
//! A [`Container`] wraps the original document bytes. Parts are decompressed
//! on demand, replacements are recorded in memory, and [`Container::serialize`]
//! writes a new archive in which every untouched entry is copied raw: same
//! compressed payload, same compression method, same timestamps. Images and
//! embedded objects therefore never go through a decompress/recompress cycle.
//!
//! ```rust,no_run
//! use loquat::package::Container;
//!
//! let data = std::fs::read("template.docx")?;
//! let container = Container::open(data)?;
//! let xml = container.read_part("word/document.xml")?;
//! let container = container.replace_parts([("word/document.xml".to_string(), xml)]);
//! let out = container.serialize()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod constants;
pub mod content_types;
pub mod rels;

use crate::error::{MergeError, Result};
use bytes::Bytes;
use constants::{content_type as ct, part_name, relationship_type as rt};
use content_types::ContentTypeMap;
use rels::Relationships;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The role a text-bearing part plays in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextPartKind {
    MainDocument,
    Header,
    Footer,
    Footnotes,
    Endnotes,
}

/// A part whose WordprocessingML content can carry placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPartRef {
    pub name: String,
    pub kind: TextPartKind,
}

/// An opened document container.
///
/// Cloning is cheap: the archive index and the input buffer are shared.
#[derive(Clone)]
pub struct Container {
    /// The original input buffer
    data: Bytes,
    /// Parsed central directory over `data`
    archive: ZipArchive<Cursor<Bytes>>,
    /// Entry names in archive order
    names: Vec<String>,
    /// Replacement content keyed by entry name
    replacements: HashMap<String, Vec<u8>>,
    /// Names of parts that did not exist in the input, in insertion order
    added: Vec<String>,
}

impl Container {
    /// Open a container from its serialized bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::ContainerCorrupt`] if the bytes are not a ZIP
    /// archive, the archive is truncated, or it lists an entry twice.
    pub fn open(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if !data.starts_with(b"PK\x03\x04") {
            return Err(MergeError::ContainerCorrupt(
                "missing ZIP local file header signature".to_string(),
            ));
        }

        let mut archive = ZipArchive::new(Cursor::new(data.clone()))
            .map_err(|e| MergeError::ContainerCorrupt(e.to_string()))?;

        let mut names = Vec::with_capacity(archive.len());
        let mut seen = HashSet::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| MergeError::ContainerCorrupt(format!("entry {}: {}", index, e)))?;
            let name = entry.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(MergeError::ContainerCorrupt(format!(
                    "duplicate entry {}",
                    name
                )));
            }
            names.push(name);
        }

        debug!(entries = names.len(), bytes = data.len(), "opened container");
        Ok(Self {
            data,
            archive,
            names,
            replacements: HashMap::new(),
            added: Vec::new(),
        })
    }

    /// Entry names, archive order first, then parts added by replacements.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .chain(self.added.iter())
            .map(String::as_str)
    }

    /// Check if a part exists (in the archive or among added parts).
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize(name);
        self.replacements.contains_key(name) || self.names.iter().any(|n| n == name)
    }

    /// Read a part's content, honouring replacements recorded so far.
    ///
    /// # Errors
    ///
    /// [`MergeError::PartMissing`] if no such part exists,
    /// [`MergeError::ContainerCorrupt`] if decompression or the CRC check fails.
    pub fn read_part(&self, name: &str) -> Result<Vec<u8>> {
        let name = normalize(name);
        if let Some(data) = self.replacements.get(name) {
            return Ok(data.clone());
        }

        let mut archive = self.archive.clone();
        let mut file = match archive.by_name(name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(MergeError::PartMissing(name.to_string()));
            },
            Err(e) => {
                return Err(MergeError::ContainerCorrupt(format!("{}: {}", name, e)));
            },
        };

        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)
            .map_err(|e| MergeError::ContainerCorrupt(format!("cannot read {}: {}", name, e)))?;
        Ok(content)
    }

    /// Read a part if it exists.
    pub fn read_optional_part(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.read_part(name) {
            Ok(data) => Ok(Some(data)),
            Err(MergeError::PartMissing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Record replacement content for a set of parts.
    ///
    /// Names that are not in the archive become new parts, appended in the
    /// order given.
    pub fn replace_parts<I>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        for (name, data) in parts {
            let name = normalize(&name).to_string();
            if !self.names.contains(&name) && !self.added.contains(&name) {
                self.added.push(name.clone());
            }
            self.replacements.insert(name, data);
        }
        self
    }

    /// Whether any replacement has been recorded.
    pub fn is_modified(&self) -> bool {
        !self.replacements.is_empty()
    }

    /// Names of parts with recorded replacements.
    pub fn modified_parts(&self) -> impl Iterator<Item = &str> {
        self.part_names()
            .filter(|name| self.replacements.contains_key(*name))
    }

    /// Write the container back to bytes.
    ///
    /// Without replacements the original buffer is returned as is.
    pub fn serialize(&self) -> Result<Bytes> {
        if self.replacements.is_empty() {
            return Ok(self.data.clone());
        }

        let mut archive = self.archive.clone();
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(self.data.len())));

        for (index, name) in self.names.iter().enumerate() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| MergeError::ContainerCorrupt(format!("{}: {}", name, e)))?;

            match self.replacements.get(name) {
                Some(content) => {
                    let method = match entry.compression() {
                        CompressionMethod::Stored => CompressionMethod::Stored,
                        _ => CompressionMethod::Deflated,
                    };
                    let options = SimpleFileOptions::default()
                        .compression_method(method)
                        .last_modified_time(entry.last_modified().unwrap_or_default());
                    drop(entry);
                    writer
                        .start_file(name.as_str(), options)
                        .map_err(|e| write_error(name, e))?;
                    writer.write_all(content)?;
                },
                None => {
                    writer.raw_copy_file(entry).map_err(|e| write_error(name, e))?;
                },
            }
        }

        for name in &self.added {
            let content = &self.replacements[name];
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| write_error(name, e))?;
            writer.write_all(content)?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| MergeError::Unknown(format!("failed to finish archive: {}", e)))?;
        Ok(Bytes::from(cursor.into_inner()))
    }

    /// Parse `[Content_Types].xml`.
    pub fn content_types(&self) -> Result<ContentTypeMap> {
        let xml = self.read_part(part_name::CONTENT_TYPES)?;
        ContentTypeMap::from_xml(&xml)
    }

    /// Parse the package-level relationships, empty if the part is absent.
    pub fn package_relationships(&self) -> Result<Relationships> {
        match self.read_optional_part(part_name::PACKAGE_RELS)? {
            Some(xml) => Relationships::from_xml(&xml),
            None => Ok(Relationships::default()),
        }
    }

    /// Locate the main document part.
    ///
    /// Follows the package `officeDocument` relationship, then the content
    /// type overrides, then the conventional `word/document.xml`.
    pub fn main_document(&self, content_types: &ContentTypeMap) -> Result<String> {
        let rels = self.package_relationships()?;
        if let Some(target) = rels
            .by_type(rt::OFFICE_DOCUMENT)
            .and_then(|rel| rel.target_part("/"))
            && self.contains(&target)
        {
            return Ok(target);
        }

        if let Some(name) = content_types.parts_of_type(&ct::WML_MAIN_VARIANTS).next()
            && self.contains(name)
        {
            return Ok(name.to_string());
        }

        if self.contains(part_name::MAIN_DOCUMENT) {
            warn!("main document located by name only");
            return Ok(part_name::MAIN_DOCUMENT.to_string());
        }

        Err(MergeError::PartMissing(
            "main document part (word/document.xml)".to_string(),
        ))
    }

    /// Every part that can carry placeholders: the main document, then
    /// headers, footers and (optionally) footnotes and endnotes.
    ///
    /// # Errors
    ///
    /// [`MergeError::PartMissing`] if `[Content_Types].xml` or the main
    /// document part is absent.
    pub fn text_parts(&self, include_notes: bool) -> Result<Vec<TextPartRef>> {
        let content_types = self.content_types()?;
        let main = self.main_document(&content_types)?;
        let mut parts = vec![TextPartRef {
            name: main,
            kind: TextPartKind::MainDocument,
        }];

        let mut kinds = vec![
            (TextPartKind::Header, ct::WML_HEADER, "word/header"),
            (TextPartKind::Footer, ct::WML_FOOTER, "word/footer"),
        ];
        if include_notes {
            kinds.push((TextPartKind::Footnotes, ct::WML_FOOTNOTES, "word/footnotes"));
            kinds.push((TextPartKind::Endnotes, ct::WML_ENDNOTES, "word/endnotes"));
        }

        for (kind, content_type, prefix) in kinds {
            let mut found: Vec<String> = content_types
                .parts_of_type(&[content_type])
                .filter(|name| self.contains(name))
                .map(str::to_string)
                .collect();
            if found.is_empty() {
                // Producers that rely on Default entries only
                found = self
                    .names
                    .iter()
                    .filter(|name| name.starts_with(prefix) && name.ends_with(".xml"))
                    .filter(|name| !content_types.has_override(name))
                    .cloned()
                    .collect();
            }
            found.sort();
            parts.extend(found.into_iter().map(|name| TextPartRef { name, kind }));
        }

        Ok(parts)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("entries", &self.names.len())
            .field("replacements", &self.replacements.len())
            .field("added", &self.added)
            .finish()
    }
}

#[inline]
fn normalize(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

fn write_error(name: &str, err: zip::result::ZipError) -> MergeError {
    MergeError::Unknown(format!("failed to write {}: {}", name, err))
}
