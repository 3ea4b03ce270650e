//! XML helpers shared by the package and template layers.
//!
//! Parts are never re-emitted through a full XML writer. Edits are spliced
//! into the original bytes at offsets recorded while reading, so everything
//! the engine does not touch keeps its exact serialization.
use crate::error::{MergeError, Result};
use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesRef, BytesText, Event};
use std::ops::Range;

// Static initialization: automaton is built only once, thread-safe
static XML_ESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .build(["&", "<", ">", "\"", "'"])
        .expect("Failed to build XML escaper")
});

/// Escape XML special characters.
///
/// # Examples
///
/// ```
/// use loquat::common::xml::escape_xml;
/// assert_eq!(escape_xml("a & b"), "a &amp; b");
/// assert_eq!(escape_xml("<tag>\"hello\"</tag>"), "&lt;tag&gt;&quot;hello&quot;&lt;/tag&gt;");
/// ```
#[inline]
pub fn escape_xml(s: &str) -> String {
    XML_ESCAPER.replace_all(s, &["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"])
}

/// Whether `c` may appear in an XML 1.0 document.
///
/// ```
/// use loquat::common::xml::is_xml_char;
/// assert!(is_xml_char('\t') && is_xml_char('é'));
/// assert!(!is_xml_char('\u{0B}') && !is_xml_char('\u{FFFF}'));
/// ```
#[inline]
pub fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

/// Decode a text event into an owned string, resolving any entities left in it.
#[inline]
pub fn text_of(text: &BytesText<'_>) -> Result<String> {
    let decoded = text.decode()?;
    Ok(quick_xml::escape::unescape(&decoded)?.into_owned())
}

/// Resolve a general entity reference (`&amp;`, `&#x41;`) to its text.
///
/// Unknown named entities are kept in their escaped form.
pub fn resolve_ref(reference: &BytesRef<'_>) -> Result<String> {
    if let Some(ch) = reference.resolve_char_ref()? {
        return Ok(ch.to_string());
    }
    let name = reference.decode()?;
    Ok(match quick_xml::escape::resolve_predefined_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{};", name),
    })
}

/// Whether a qualified element name is the WordprocessingML element `local`.
///
/// Accepts the conventional `w:` prefix and the unprefixed form, so elements
/// from other vocabularies sharing a local name (`m:r`, `a:t`) are skipped.
#[inline]
pub fn is_wml(qname: &[u8], local: &[u8]) -> bool {
    qname == local || (qname.len() == local.len() + 2 && qname.starts_with(b"w:") && &qname[2..] == local)
}

/// A byte-range replacement applied to an XML buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub range: Range<usize>,
    pub replacement: Vec<u8>,
}

impl Splice {
    pub fn new(range: Range<usize>, replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    /// Remove a byte range.
    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, Vec::new())
    }

    /// Insert bytes at an offset.
    pub fn insert(at: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(at..at, bytes)
    }
}

/// Apply non-overlapping splices to `source`.
///
/// Splices may be given in any order. Overlapping ranges are a logic error in
/// the caller and are reported rather than producing a corrupt part.
pub fn apply_splices(source: &[u8], mut splices: Vec<Splice>) -> Result<Vec<u8>> {
    splices.sort_by_key(|s| (s.range.start, s.range.end));
    let extra: usize = splices.iter().map(|s| s.replacement.len()).sum();
    let mut out = Vec::with_capacity(source.len() + extra);
    let mut cursor = 0;
    for splice in splices {
        if splice.range.start < cursor || splice.range.end > source.len() {
            return Err(MergeError::Unknown(format!(
                "overlapping XML edit at byte {}",
                splice.range.start
            )));
        }
        out.extend_from_slice(&source[cursor..splice.range.start]);
        out.extend_from_slice(&splice.replacement);
        cursor = splice.range.end;
    }
    out.extend_from_slice(&source[cursor..]);
    Ok(out)
}

/// Insert `fragment` as the last child of the document's root element.
///
/// A self-closing root (`<Types/>`) is expanded into a start/end pair.
pub fn append_to_root(xml: &[u8], fragment: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return apply_splices(xml, vec![Splice::insert(start, fragment)]);
                }
            },
            Event::Empty(e) if depth == 0 => {
                let end = reader.buffer_position() as usize;
                let name = e.name();
                let mut replacement = xml[start..end - 2].to_vec();
                replacement.push(b'>');
                replacement.extend_from_slice(fragment);
                replacement.extend_from_slice(b"</");
                replacement.extend_from_slice(name.as_ref());
                replacement.push(b'>');
                return apply_splices(xml, vec![Splice::new(start..end, replacement)]);
            },
            Event::Eof => {
                return Err(MergeError::ContainerCorrupt(
                    "XML part has no root element".to_string(),
                ));
            },
            _ => {},
        }
        buf.clear();
    }
}
