//! Relationship parts (`_rels/*.rels`).
//!
//! Only what the merge engine needs: reading relationships to find the main
//! document and the custom properties part, and adding a relationship when a
//! custom properties part is created.
use crate::common::xml::{append_to_root, escape_xml};
use crate::error::Result;
use quick_xml::Reader;
use quick_xml::events::Event;

/// A single relationship from a source part to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1")
    pub r_id: String,
    /// Relationship type URI
    pub reltype: String,
    /// Target reference, relative to the source's base URI
    pub target_ref: String,
    /// Whether the target lives outside the package
    pub is_external: bool,
}

impl Relationship {
    /// Resolve the target against `base_uri` into a ZIP member name (no leading slash).
    ///
    /// Returns `None` for external relationships.
    pub fn target_part(&self, base_uri: &str) -> Option<String> {
        if self.is_external {
            return None;
        }
        let joined = if self.target_ref.starts_with('/') {
            self.target_ref.clone()
        } else if base_uri.ends_with('/') {
            format!("{}{}", base_uri, self.target_ref)
        } else {
            format!("{}/{}", base_uri, self.target_ref)
        };
        Some(normalize_path(&joined))
    }
}

/// Resolve `.` and `..` segments and drop the leading slash.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Relationships read from one `.rels` part, in document order.
#[derive(Debug, Default)]
pub struct Relationships {
    rels: Vec<Relationship>,
}

impl Relationships {
    /// Parse a `.rels` part.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);
        let mut rels = Vec::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Empty(ref e) | Event::Start(ref e)
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let mut rel = Relationship {
                        r_id: String::new(),
                        reltype: String::new(),
                        target_ref: String::new(),
                        is_external: false,
                    };
                    for attr in e.attributes() {
                        let attr = attr?;
                        let value = attr.unescape_value()?;
                        match attr.key.as_ref() {
                            b"Id" => rel.r_id = value.into_owned(),
                            b"Type" => rel.reltype = value.into_owned(),
                            b"Target" => rel.target_ref = value.into_owned(),
                            b"TargetMode" => rel.is_external = value == "External",
                            _ => {},
                        }
                    }
                    rels.push(rel);
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        Ok(Self { rels })
    }

    /// First relationship of the given type.
    pub fn by_type(&self, reltype: &str) -> Option<&Relationship> {
        self.rels.iter().find(|r| r.reltype == reltype)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    pub fn len(&self) -> usize {
        self.rels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Get the next available relationship ID.
    ///
    /// Generates IDs in the format "rId1", "rId2", etc., filling in gaps
    /// if any exist.
    pub fn next_r_id(&self) -> String {
        let mut used_numbers: Vec<u32> = self
            .rels
            .iter()
            .filter_map(|rel| rel.r_id.strip_prefix("rId")?.parse::<u32>().ok())
            .collect();

        // Sort to find gaps efficiently
        used_numbers.sort_unstable();

        // Find first gap or use next number
        let mut next_num = 1u32;
        for &num in &used_numbers {
            match num.cmp(&next_num) {
                std::cmp::Ordering::Equal => next_num += 1,
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Less => {},
            }
        }

        format!("rId{}", next_num)
    }
}

/// Append an internal relationship to a `.rels` body and return the new body.
pub fn add_relationship(xml: &[u8], r_id: &str, reltype: &str, target: &str) -> Result<Vec<u8>> {
    let fragment = format!(
        r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
        escape_xml(r_id),
        escape_xml(reltype),
        escape_xml(target)
    );
    append_to_root(xml, fragment.as_bytes())
}
