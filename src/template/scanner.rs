//! Placeholder discovery.
//!
//! Tokens are found on the logical stream of a part, never on raw XML, so a
//! placeholder that Word split across several runs is still one token.
use super::runs::{PartModel, RunPosition};
use crate::config::MergeOptions;
use crate::error::{MergeError, Result};
use crate::package::Container;
use aho_corasick::{AhoCorasick, MatchKind};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::{debug, trace};

/// Characters allowed in a token name.
#[inline]
pub fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// One placeholder occurrence inside a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOccurrence {
    /// Token name, without delimiters
    pub name: String,
    /// Byte range of the whole placeholder, delimiters included, in the stream
    pub span: Range<usize>,
    /// Where the opening delimiter starts
    pub start: RunPosition,
    /// Where the closing delimiter ends
    pub end: RunPosition,
}

/// Delimiter matcher built once per request.
#[derive(Debug, Clone)]
pub struct Scanner {
    matcher: AhoCorasick,
    open_len: usize,
    /// Escaped first character of the open delimiter, used to skip parts
    /// that cannot contain a token
    needle: Vec<u8>,
    trim: bool,
}

const OPEN: usize = 0;

impl Scanner {
    /// Build a scanner for the configured delimiters.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvalidOptions`] if the options fail validation.
    pub fn new(options: &MergeOptions) -> Result<Self> {
        options.validate()?;
        let open = options.delimiters.open.as_str();
        let close = options.delimiters.close.as_str();
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build([open, close])
            .map_err(|e| MergeError::InvalidOptions(format!("delimiters: {}", e)))?;

        let first = open.chars().next().map(String::from).unwrap_or_default();
        Ok(Self {
            matcher,
            open_len: open.len(),
            needle: crate::common::xml::escape_xml(&first).into_bytes(),
            trim: options.trim_token_whitespace,
        })
    }

    /// Cheap pre-check on raw part bytes.
    #[inline]
    pub fn may_contain_tokens(&self, xml: &[u8]) -> bool {
        memchr::memmem::find(xml, &self.needle).is_some()
    }

    /// Find every well-formed placeholder in `stream`, in order.
    ///
    /// An opening delimiter replaces any still-pending one, so with nested
    /// markers the innermost pair wins. A closing delimiter without a pending
    /// opening one, or enclosing an invalid name, is literal text.
    pub fn find_in(&self, stream: &str) -> Vec<(Range<usize>, String)> {
        let mut found = Vec::new();
        let mut pending: Option<usize> = None;
        let mut resume = 0;

        for m in self.matcher.find_overlapping_iter(stream) {
            if m.start() < resume {
                continue;
            }
            if m.pattern().as_usize() == OPEN {
                pending = Some(m.start());
                continue;
            }
            let Some(open_at) = pending else { continue };
            let inner_start = open_at + self.open_len;
            if m.start() < inner_start {
                continue;
            }
            pending = None;

            let inner = &stream[inner_start..m.start()];
            let name = if self.trim { inner.trim_matches(' ') } else { inner };
            if !name.is_empty() && name.chars().all(is_name_char) {
                found.push((open_at..m.end(), name.to_string()));
                resume = m.end();
            } else {
                trace!(text = inner, "ignoring delimited text with invalid name");
            }
        }
        found
    }

    /// Placeholder occurrences in a parsed part.
    pub fn occurrences(&self, model: &PartModel) -> Vec<TokenOccurrence> {
        self.find_in(model.stream())
            .into_iter()
            .filter_map(|(span, name)| {
                let start = model.run_position(span.start, false)?;
                let end = model.run_position(span.end, true)?;
                Some(TokenOccurrence {
                    name,
                    span,
                    start,
                    end,
                })
            })
            .collect()
    }
}

/// Distinct token names across every text part of a container.
///
/// Parts are parsed in parallel.
///
/// # Errors
///
/// [`MergeError::PartMissing`] if the main document cannot be located,
/// [`MergeError::ContainerCorrupt`] if a text part is not well-formed.
pub fn extract_tokens(container: &Container, options: &MergeOptions) -> Result<BTreeSet<String>> {
    let scanner = Scanner::new(options)?;
    let parts = container.text_parts(options.include_notes)?;

    let mut sources = Vec::with_capacity(parts.len());
    for part in parts {
        let xml = container.read_part(&part.name)?;
        if scanner.may_contain_tokens(&xml) {
            sources.push((part.name, xml));
        }
    }

    let per_part = sources
        .into_par_iter()
        .map(|(name, xml)| {
            let model = PartModel::parse(name, xml)?;
            let names: Vec<String> = scanner
                .occurrences(&model)
                .into_iter()
                .map(|occurrence| occurrence.name)
                .collect();
            debug!(part = model.name(), tokens = names.len(), "scanned part");
            Ok(names)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(per_part.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Delimiters;
    use crate::test_support::{DocxBuilder, bold_run, paragraph, run};

    fn names(scanner: &Scanner, stream: &str) -> Vec<String> {
        scanner.find_in(stream).into_iter().map(|(_, n)| n).collect()
    }

    #[test]
    fn test_find_simple_tokens() {
        let scanner = Scanner::new(&MergeOptions::default()).unwrap();
        let found = scanner.find_in("Dear {{first_name}} {{ last.name }},");
        assert_eq!(found[0], (5..19, "first_name".to_string()));
        assert_eq!(found[1].1, "last.name");
    }

    #[test]
    fn test_innermost_pair_wins() {
        let scanner = Scanner::new(&MergeOptions::default()).unwrap();
        let found = scanner.find_in("{{{name}}}");
        assert_eq!(found, vec![(1..9, "name".to_string())]);
        assert_eq!(names(&scanner, "{{a {{b}}"), vec!["b"]);
    }

    #[test]
    fn test_literal_text_ignored() {
        let scanner = Scanner::new(&MergeOptions::default()).unwrap();
        assert!(names(&scanner, "}} {{ }} {{a b}} {{}} {{x").is_empty());
        assert!(names(&scanner, "{{na\u{FFFC}me}}").is_empty());
    }

    #[test]
    fn test_whitespace_trimming_optional() {
        let options = MergeOptions::default().with_trim_token_whitespace(false);
        let scanner = Scanner::new(&options).unwrap();
        assert!(names(&scanner, "{{ name }}").is_empty());
        assert_eq!(names(&scanner, "{{name}}"), vec!["name"]);
    }

    #[test]
    fn test_custom_delimiters_and_unicode_names() {
        let options = MergeOptions::default().with_delimiters(Delimiters::new("«", "»"));
        let scanner = Scanner::new(&options).unwrap();
        assert_eq!(names(&scanner, "«Straße» and «名前»"), vec!["Straße", "名前"]);
    }

    #[test]
    fn test_occurrence_positions_across_runs() {
        let xml = DocxBuilder::new()
            .body(&paragraph(&[run("Hi {{fir"), bold_run("st}} there")]))
            .build();
        let container = Container::open(xml).unwrap();
        let body = container.read_part("word/document.xml").unwrap();
        let model = PartModel::parse("word/document.xml", body).unwrap();
        let scanner = Scanner::new(&MergeOptions::default()).unwrap();

        let occurrences = scanner.occurrences(&model);
        assert_eq!(occurrences.len(), 1);
        let occurrence = &occurrences[0];
        assert_eq!(occurrence.name, "first");
        assert_eq!(occurrence.start, RunPosition { run: 0, offset: 3 });
        assert_eq!(occurrence.end, RunPosition { run: 1, offset: 4 });
    }

    #[test]
    fn test_extract_tokens_from_all_parts() {
        let bytes = DocxBuilder::new()
            .body(&paragraph(&[run("{{b}} {{a}}"), run("{{a}}")]))
            .header("header1.xml", &paragraph(&[run("{{title}}")]))
            .footer("footer1.xml", &paragraph(&[run("no tokens")]))
            .footnotes(&format!(
                r#"<w:footnote w:id="1">{}</w:footnote>"#,
                paragraph(&[run("{{note}}")])
            ))
            .build();
        let container = Container::open(bytes).unwrap();

        let tokens = extract_tokens(&container, &MergeOptions::default()).unwrap();
        let tokens: Vec<_> = tokens.into_iter().collect();
        assert_eq!(tokens, vec!["a", "b", "note", "title"]);

        let options = MergeOptions::default().with_include_notes(false);
        let tokens = extract_tokens(&container, &options).unwrap();
        assert!(!tokens.contains("note"));
    }

    #[test]
    fn test_extract_tokens_corrupt_part() {
        let bytes = DocxBuilder::new().body("<w:p><w:r><w:t>{{x}}</w:r></w:p>").build();
        let container = Container::open(bytes).unwrap();
        let err = extract_tokens(&container, &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, MergeError::ContainerCorrupt(_)));
    }
}
