//! Custom document properties (`docProps/custom.xml`).
//!
//! Entries are kept in document order together with the byte range each one
//! occupies, so an update only rewrites the value element of the targeted
//! property. Everything else in the part, including entries of types this
//! module does not interpret, keeps its exact bytes.
//!
//! # Supported Property Types
//!
//! - **Text**: `lpwstr`, `lpstr`, `bstr`
//! - **Integer**: `i1`, `i2`, `i4`, `i8`, `int`, `ui1`, `ui2`, `ui4`, `ui8`, `uint`
//! - **Float**: `r4`, `r8`, `decimal`
//! - **Boolean**: `bool`
//! - **Timestamp**: `filetime`, `date`
//!
//! Anything else (`vector`, `blob`, `cy`, ...) is read as opaque and cannot be
//! updated.
//!
//! ```rust,no_run
//! use loquat::custom_properties::{read_properties, write_properties};
//! use loquat::package::Container;
//! use std::collections::HashMap;
//!
//! let container = Container::open(std::fs::read("template.docx")?)?;
//! let updates = HashMap::from([("Client".to_string(), "Acme".to_string())]);
//! let container = write_properties(container, &updates)?;
//! let props = read_properties(&container)?;
//! assert_eq!(props.get("Client").map(|p| p.text()), Some("Acme"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use crate::common::xml::{Splice, append_to_root, apply_splices, escape_xml, is_xml_char, resolve_ref, text_of};
use crate::error::{MergeError, Result};
use crate::package::Container;
use crate::package::constants::{content_type as ct, namespace as ns, part_name, relationship_type as rt};
use crate::package::content_types::add_override;
use crate::package::rels::add_relationship;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::ops::Range;
use tracing::{debug, warn};

/// Fixed GUID format ID for custom properties.
///
/// All custom properties must use this format ID.
pub const FORMAT_ID: &str = "{D5CDD505-2E9C-101B-9397-08002B2CF9AE}";

/// Property IDs below this value are reserved.
const FIRST_PID: i32 = 2;

/// Windows epoch (1601-01-01) offset in 100-nanosecond intervals.
const WINDOWS_EPOCH_OFFSET: i64 = 116_444_736_000_000_000;

/// How a declared variant type is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    Bool,
    Timestamp,
    /// Not interpreted; preserved and read-only
    Opaque,
}

impl ValueKind {
    /// Classify a variant element local name (`lpwstr`, `i4`, ...).
    pub fn of(vt_type: &str) -> Self {
        match vt_type {
            "lpwstr" | "lpstr" | "bstr" => ValueKind::Text,
            "i1" | "i2" | "i4" | "i8" | "int" | "ui1" | "ui2" | "ui4" | "ui8" | "uint" => {
                ValueKind::Integer
            },
            "r4" | "r8" | "decimal" => ValueKind::Float,
            "bool" => ValueKind::Bool,
            "filetime" | "date" => ValueKind::Timestamp,
            _ => ValueKind::Opaque,
        }
    }
}

/// Check `input` against a declared type and return its canonical text.
fn normalize_value(vt_type: &str, input: &str) -> Result<String> {
    let invalid = |detail: String| {
        MergeError::PropertyWrite(format!("{:?} is not a valid {} value: {}", input, vt_type, detail))
    };
    let trimmed = input.trim();

    macro_rules! integer {
        ($ty:ty) => {
            trimmed
                .parse::<$ty>()
                .map(|v| v.to_string())
                .map_err(|e| invalid(e.to_string()))
        };
    }

    match vt_type {
        "lpwstr" | "lpstr" | "bstr" => Ok(input.to_string()),
        "i1" => integer!(i8),
        "i2" => integer!(i16),
        "i4" | "int" => integer!(i32),
        "i8" => integer!(i64),
        "ui1" => integer!(u8),
        "ui2" => integer!(u16),
        "ui4" | "uint" => integer!(u32),
        "ui8" => integer!(u64),
        "r4" => trimmed
            .parse::<f32>()
            .map(|_| trimmed.to_string())
            .map_err(|e| invalid(e.to_string())),
        "r8" | "decimal" => trimmed
            .parse::<f64>()
            .map(|_| trimmed.to_string())
            .map_err(|e| invalid(e.to_string())),
        "bool" => match trimmed.to_lowercase().as_str() {
            "true" | "1" => Ok("true".to_string()),
            "false" | "0" => Ok("false".to_string()),
            _ => Err(invalid("expected true or false".to_string())),
        },
        "filetime" | "date" => parse_timestamp(trimmed)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .ok_or_else(|| invalid("expected an ISO-8601 timestamp".to_string())),
        other => Err(MergeError::PropertyWrite(format!(
            "properties of type {} cannot be updated",
            other
        ))),
    }
}

/// Parse an ISO-8601 timestamp, a plain date, or a Windows FILETIME count.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    let filetime = text.parse::<i64>().ok()?;
    let unix_nanos = filetime.checked_sub(WINDOWS_EPOCH_OFFSET)?.checked_mul(100)?;
    DateTime::from_timestamp(
        unix_nanos.div_euclid(1_000_000_000),
        unix_nanos.rem_euclid(1_000_000_000) as u32,
    )
}

/// One `<property>` element.
#[derive(Debug, Clone)]
pub struct PropertyEntry {
    name: String,
    pid: i32,
    fmtid: String,
    /// Local name of the variant element (`lpwstr`, `i4`, ...)
    vt_type: String,
    /// Decoded value text; inner XML for opaque values
    text: String,
    /// Byte range of the value element in the source part
    value_element: Option<Range<usize>>,
    /// Qualified name of the value element as written (`vt:lpwstr`)
    value_tag: String,
}

impl PropertyEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn fmtid(&self) -> &str {
        &self.fmtid
    }

    /// Declared variant type.
    pub fn vt_type(&self) -> &str {
        &self.vt_type
    }

    pub fn kind(&self) -> ValueKind {
        ValueKind::of(&self.vt_type)
    }

    /// Stored value text as written in the part.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Value as reported to hosts. Timestamps are rendered as ISO-8601.
    pub fn display_value(&self) -> String {
        if self.kind() == ValueKind::Timestamp
            && let Some(dt) = parse_timestamp(self.text.trim())
        {
            return dt.to_rfc3339_opts(SecondsFormat::Secs, true);
        }
        self.text.clone()
    }
}

/// The custom properties of one document, in document order.
#[derive(Debug, Clone, Default)]
pub struct CustomProperties {
    entries: Vec<PropertyEntry>,
    /// The part these entries were read from; empty for a new store
    source: Vec<u8>,
    /// Prefix bound to the variant types namespace, if declared on the root
    vt_prefix: Option<String>,
    /// Prefix of the root element, reused for new `<property>` elements
    root_prefix: Option<String>,
}

impl CustomProperties {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a custom properties part.
    ///
    /// # Errors
    ///
    /// [`MergeError::ContainerCorrupt`] if the part is not well-formed XML.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut store = Self {
            source: xml.to_vec(),
            ..Self::default()
        };
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut depth = 0usize;
        let mut current: Option<PropertyEntry> = None;
        // Value element start and the offset right after its start tag
        let mut value_open: Option<(usize, usize)> = None;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event_into(&mut buf)?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    match depth {
                        0 => store.read_root(e)?,
                        1 if e.local_name().as_ref() == b"property" => {
                            let entry = read_property(e)?;
                            if empty {
                                store.push(entry);
                            } else {
                                current = Some(entry);
                            }
                        },
                        2 => {
                            if let Some(entry) = current.as_mut() {
                                entry.vt_type =
                                    String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                                entry.value_tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                                if empty {
                                    entry.value_element = Some(start..end);
                                } else {
                                    value_open = Some((start, end));
                                }
                            }
                        },
                        _ => {},
                    }
                    if !empty {
                        depth += 1;
                    }
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    match depth {
                        2 => {
                            if let (Some(entry), Some((open, inner))) = (current.as_mut(), value_open.take()) {
                                entry.value_element = Some(open..end);
                                if entry.kind() == ValueKind::Opaque {
                                    entry.text = String::from_utf8_lossy(&xml[inner..start]).into_owned();
                                }
                            }
                        },
                        1 => {
                            if let Some(entry) = current.take() {
                                store.push(entry);
                            }
                        },
                        _ => {},
                    }
                },
                Event::Text(ref t) if depth == 3 && value_open.is_some() => {
                    if let Some(entry) = current.as_mut() {
                        entry.text.push_str(&text_of(t)?);
                    }
                },
                Event::GeneralRef(ref r) if depth == 3 && value_open.is_some() => {
                    if let Some(entry) = current.as_mut() {
                        entry.text.push_str(&resolve_ref(r)?);
                    }
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        Ok(store)
    }

    fn read_root(&mut self, e: &BytesStart<'_>) -> Result<()> {
        self.root_prefix = e
            .name()
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        for attr in e.attributes() {
            let attr = attr?;
            if let Some(prefix) = attr.key.as_ref().strip_prefix(b"xmlns:")
                && attr.value.as_ref() == ns::DOC_PROPS_VTYPES.as_bytes()
            {
                self.vt_prefix = Some(String::from_utf8_lossy(prefix).into_owned());
            }
        }
        Ok(())
    }

    fn push(&mut self, entry: PropertyEntry) {
        if self.contains(&entry.name) {
            warn!(name = %entry.name, "duplicate custom property, keeping the first");
            return;
        }
        self.entries.push(entry);
    }

    /// Look up a property by name.
    pub fn get(&self, name: &str) -> Option<&PropertyEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name and display value of every entry, in document order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.display_value()))
            .collect()
    }

    /// Next unused property ID.
    fn next_pid(&self) -> i32 {
        self.entries
            .iter()
            .map(|e| e.pid + 1)
            .max()
            .unwrap_or(FIRST_PID)
            .max(FIRST_PID)
    }

    /// Apply updates to the source part.
    ///
    /// Returns the new part content, or `None` when every update matches the
    /// stored value. New keys are appended in key order as `lpwstr`.
    ///
    /// # Errors
    ///
    /// [`MergeError::PropertyWrite`] if a value does not parse under the
    /// entry's declared type or the type is read-only.
    pub fn updated_xml(&self, updates: &BTreeMap<&str, &str>) -> Result<Option<Vec<u8>>> {
        let mut splices = Vec::new();
        let mut appended = String::new();
        let mut pid = self.next_pid();

        for (&name, &value) in updates {
            match self.get(name) {
                Some(entry) => {
                    // Values reported by `pairs` come back unchanged, even for opaque types
                    if value == entry.text || value == entry.display_value() {
                        continue;
                    }
                    check_xml_text(name, value)?;
                    let normalized = normalize_value(&entry.vt_type, value).map_err(|e| match e {
                        MergeError::PropertyWrite(msg) => {
                            MergeError::PropertyWrite(format!("property {:?}: {}", name, msg))
                        },
                        other => other,
                    })?;
                    if normalize_value(&entry.vt_type, &entry.text).ok().as_deref()
                        == Some(normalized.as_str())
                    {
                        continue;
                    }
                    let Some(range) = entry.value_element.clone() else {
                        return Err(MergeError::PropertyWrite(format!(
                            "property {:?} has no value element",
                            name
                        )));
                    };
                    let tag = &entry.value_tag;
                    splices.push(Splice::new(
                        range,
                        format!("<{}>{}</{}>", tag, escape_xml(&normalized), tag),
                    ));
                },
                None => {
                    check_xml_text(name, name)?;
                    check_xml_text(name, value)?;
                    appended.push_str(&self.property_fragment(name, pid, value));
                    pid += 1;
                },
            }
        }

        if splices.is_empty() && appended.is_empty() {
            return Ok(None);
        }
        let mut xml = apply_splices(&self.source, splices)?;
        if !appended.is_empty() {
            xml = append_to_root(&xml, appended.as_bytes())?;
        }
        Ok(Some(xml))
    }

    /// A new `lpwstr` property element bound to this part's prefixes.
    fn property_fragment(&self, name: &str, pid: i32, value: &str) -> String {
        let property = match &self.root_prefix {
            Some(prefix) => format!("{}:property", prefix),
            None => "property".to_string(),
        };
        let value_element = match &self.vt_prefix {
            Some(prefix) => format!("<{p}:lpwstr>{v}</{p}:lpwstr>", p = prefix, v = escape_xml(value)),
            None => format!(
                r#"<vt:lpwstr xmlns:vt="{}">{}</vt:lpwstr>"#,
                ns::DOC_PROPS_VTYPES,
                escape_xml(value)
            ),
        };
        format!(
            r#"<{tag} fmtid="{fmtid}" pid="{pid}" name="{name}">{value_element}</{tag}>"#,
            tag = property,
            fmtid = FORMAT_ID,
            pid = pid,
            name = escape_xml(name),
            value_element = value_element
        )
    }
}

/// Reject text that cannot be stored in an XML part.
fn check_xml_text(name: &str, text: &str) -> Result<()> {
    match text.chars().find(|&c| !is_xml_char(c)) {
        Some(c) => Err(MergeError::PropertyWrite(format!(
            "property {:?}: character U+{:04X} is not allowed in XML",
            name, c as u32
        ))),
        None => Ok(()),
    }
}

/// Read the attributes of a `<property>` start tag.
fn read_property(e: &BytesStart<'_>) -> Result<PropertyEntry> {
    let mut entry = PropertyEntry {
        name: String::new(),
        pid: 0,
        fmtid: String::new(),
        vt_type: String::new(),
        text: String::new(),
        value_element: None,
        value_tag: String::new(),
    };
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"name" => entry.name = attr.unescape_value()?.into_owned(),
            b"pid" => entry.pid = attr.unescape_value()?.trim().parse().unwrap_or(0),
            b"fmtid" => entry.fmtid = attr.unescape_value()?.into_owned(),
            _ => {},
        }
    }
    Ok(entry)
}

/// Generate a complete custom properties part holding `entries` as `lpwstr`.
fn new_part_xml(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut root = BytesStart::new("Properties");
    root.push_attribute(("xmlns", ns::CUSTOM_PROPERTIES));
    root.push_attribute(("xmlns:vt", ns::DOC_PROPS_VTYPES));
    writer.write_event(Event::Start(root))?;

    for (pid, (name, value)) in (FIRST_PID..).zip(entries) {
        let mut property = BytesStart::new("property");
        property.push_attribute(("fmtid", FORMAT_ID));
        property.push_attribute(("pid", pid.to_string().as_str()));
        property.push_attribute(("name", *name));
        writer.write_event(Event::Start(property))?;
        writer.write_event(Event::Start(BytesStart::new("vt:lpwstr")))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("vt:lpwstr")))?;
        writer.write_event(Event::End(BytesEnd::new("property")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Properties")))?;
    Ok(writer.into_inner().into_inner())
}

/// Find the custom properties part: package relationship first, then the
/// content type override, then the conventional name.
fn locate_part(container: &Container) -> Result<Option<String>> {
    let rels = container.package_relationships()?;
    if let Some(target) = rels
        .by_type(rt::CUSTOM_PROPERTIES)
        .and_then(|rel| rel.target_part("/"))
        && container.contains(&target)
    {
        return Ok(Some(target));
    }
    let content_types = container.content_types()?;
    if let Some(name) = content_types
        .parts_of_type(&[ct::OFC_CUSTOM_PROPERTIES])
        .find(|name| container.contains(name))
    {
        return Ok(Some(name.to_string()));
    }
    if container.contains(part_name::CUSTOM_PROPERTIES) {
        return Ok(Some(part_name::CUSTOM_PROPERTIES.to_string()));
    }
    Ok(None)
}

/// Read the custom properties of a container; empty if it has none.
pub fn read_properties(container: &Container) -> Result<CustomProperties> {
    match locate_part(container)? {
        Some(name) => {
            let xml = container.read_part(&name)?;
            let props = CustomProperties::from_xml(&xml)?;
            debug!(part = %name, entries = props.len(), "read custom properties");
            Ok(props)
        },
        None => Ok(CustomProperties::new()),
    }
}

/// Apply property updates and return the container with the rewritten part.
///
/// When the document has no custom properties part one is created, together
/// with its content type override and package relationship.
///
/// # Errors
///
/// [`MergeError::PropertyWrite`] if a value does not fit its declared type,
/// [`MergeError::ContainerCorrupt`] if an existing part cannot be parsed.
pub fn write_properties(container: Container, updates: &HashMap<String, String>) -> Result<Container> {
    if updates.is_empty() {
        return Ok(container);
    }
    let updates: BTreeMap<&str, &str> = updates
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    if let Some(name) = locate_part(&container)? {
        let xml = container.read_part(&name)?;
        let props = CustomProperties::from_xml(&xml)?;
        return Ok(match props.updated_xml(&updates)? {
            Some(xml) => {
                debug!(part = %name, updates = updates.len(), "rewrote custom properties");
                container.replace_parts([(name, xml)])
            },
            None => container,
        });
    }

    for (&name, &value) in &updates {
        check_xml_text(name, name)?;
        check_xml_text(name, value)?;
    }
    let entries: Vec<(&str, &str)> = updates.into_iter().collect();
    let xml = new_part_xml(&entries)
        .map_err(|e| MergeError::PropertyWrite(format!("cannot generate custom properties: {}", e)))?;
    let mut parts = vec![(part_name::CUSTOM_PROPERTIES.to_string(), xml)];

    let content_types = container.read_part(part_name::CONTENT_TYPES)?;
    if !container.content_types()?.has_override(part_name::CUSTOM_PROPERTIES) {
        parts.push((
            part_name::CONTENT_TYPES.to_string(),
            add_override(&content_types, part_name::CUSTOM_PROPERTIES, ct::OFC_CUSTOM_PROPERTIES)?,
        ));
    }
    match container.read_optional_part(part_name::PACKAGE_RELS)? {
        Some(rels_xml) => {
            let r_id = container.package_relationships()?.next_r_id();
            parts.push((
                part_name::PACKAGE_RELS.to_string(),
                add_relationship(&rels_xml, &r_id, rt::CUSTOM_PROPERTIES, part_name::CUSTOM_PROPERTIES)?,
            ));
        },
        None => warn!("package has no relationships part; custom properties not linked"),
    }

    debug!(entries = entries.len(), "created custom properties part");
    Ok(container.replace_parts(parts))
}
