//! `[Content_Types].xml` handling.
//!
//! Maps part names to content types using the OPC discovery algorithm
//! (`Override` by part name first, then `Default` by extension), and registers
//! overrides for parts the engine adds.
use crate::common::xml::{append_to_root, escape_xml};
use crate::error::{MergeError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

/// Content type map for looking up content types by part name or extension.
#[derive(Debug, Default)]
pub struct ContentTypeMap {
    /// Maps lowercase file extensions to default content types
    defaults: HashMap<String, String>,

    /// Maps part names (without leading slash) to override content types,
    /// in document order
    overrides: Vec<(String, String)>,
}

impl ContentTypeMap {
    /// Parse content types from `[Content_Types].xml`.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut map = Self::default();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    let is_default = match e.local_name().as_ref() {
                        b"Default" => Some(true),
                        b"Override" => Some(false),
                        _ => None,
                    };

                    if let Some(is_default) = is_default {
                        let mut key = None;
                        let mut content_type = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            match attr.key.as_ref() {
                                b"Extension" | b"PartName" => {
                                    key = Some(attr.unescape_value()?.into_owned());
                                },
                                b"ContentType" => {
                                    content_type = Some(attr.unescape_value()?.into_owned());
                                },
                                _ => {},
                            }
                        }

                        if let (Some(key), Some(ct)) = (key, content_type) {
                            if is_default {
                                map.defaults.insert(key.to_lowercase(), ct);
                            } else {
                                let name = key.trim_start_matches('/').to_string();
                                map.overrides.push((name, ct));
                            }
                        }
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(MergeError::ContainerCorrupt(format!(
                        "Content types parse error: {}",
                        e
                    )));
                },
                _ => {},
            }
            buf.clear();
        }

        Ok(map)
    }

    /// Get the content type for a part name.
    ///
    /// First checks for an override, then falls back to the default
    /// based on file extension.
    pub fn get(&self, part_name: &str) -> Option<&str> {
        let part_name = part_name.trim_start_matches('/');
        if let Some((_, ct)) = self.overrides.iter().find(|(name, _)| name == part_name) {
            return Some(ct.as_str());
        }
        let ext = part_name.rsplit_once('.')?.1.to_lowercase();
        self.defaults.get(&ext).map(String::as_str)
    }

    /// Part names whose override matches one of `content_types`, in document order.
    pub fn parts_of_type<'a>(
        &'a self,
        content_types: &'a [&str],
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.overrides
            .iter()
            .filter(|(_, ct)| content_types.contains(&ct.as_str()))
            .map(|(name, _)| name.as_str())
    }

    /// Whether an override exists for this exact part name.
    pub fn has_override(&self, part_name: &str) -> bool {
        let part_name = part_name.trim_start_matches('/');
        self.overrides.iter().any(|(name, _)| name == part_name)
    }
}

/// Add an `Override` element for `part_name` to a `[Content_Types].xml` body.
pub fn add_override(xml: &[u8], part_name: &str, content_type: &str) -> Result<Vec<u8>> {
    let fragment = format!(
        r#"<Override PartName="/{}" ContentType="{}"/>"#,
        escape_xml(part_name.trim_start_matches('/')),
        escape_xml(content_type)
    );
    append_to_root(xml, fragment.as_bytes())
}
