//! Token substitution.
//!
//! A [`Merge`] walks a request through its stages: prepare the text parts,
//! check every placeholder can be merged, write properties and plan field
//! refreshes, then splice the new text into each part. [`render`] runs all of
//! them in one call.
use super::fields;
use super::runs::PartModel;
use super::scanner::{Scanner, TokenOccurrence};
use crate::common::xml::{Splice, apply_splices, escape_xml, is_xml_char};
use crate::config::MergeOptions;
use crate::custom_properties::write_properties;
use crate::error::{MergeError, Result};
use crate::package::Container;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Result of a merge, before serialization.
#[derive(Debug)]
pub struct RenderOutcome {
    pub container: Container,
    /// Token names found in the document but absent from the value map
    pub unresolved: BTreeSet<String>,
    /// Number of placeholder occurrences substituted
    pub replaced: usize,
}

/// Rewritten content of one part.
#[derive(Debug, Default)]
pub struct PartRender {
    /// New part bytes, `None` when nothing changed
    pub xml: Option<Vec<u8>>,
    pub unresolved: BTreeSet<String>,
    pub replaced: usize,
}

/// A parsed text part with its placeholder occurrences.
#[derive(Debug)]
struct PreparedPart {
    model: PartModel,
    occurrences: Vec<TokenOccurrence>,
    /// Field result overrides, by text node
    overrides: HashMap<usize, String>,
}

/// Request-scoped merge state.
#[derive(Debug)]
pub struct Merge {
    container: Container,
    options: MergeOptions,
    scanner: Scanner,
    parts: Vec<PreparedPart>,
    unresolved: BTreeSet<String>,
    replaced: usize,
}

impl Merge {
    /// Start a merge over an opened container.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvalidOptions`] if the options fail validation.
    pub fn new(container: Container, options: MergeOptions) -> Result<Self> {
        let scanner = Scanner::new(&options)?;
        Ok(Self {
            container,
            options,
            scanner,
            parts: Vec::new(),
            unresolved: BTreeSet::new(),
            replaced: 0,
        })
    }

    /// Parse every text part that may need edits and locate its placeholders.
    ///
    /// Parts without a token delimiter are skipped unless `with_fields` is
    /// set and they carry a `DOCPROPERTY` field.
    pub fn prepare(&mut self, with_fields: bool) -> Result<()> {
        let with_fields = with_fields && self.options.update_fields;
        let mut sources = Vec::new();
        for part in self.container.text_parts(self.options.include_notes)? {
            let xml = self.container.read_part(&part.name)?;
            let wanted = self.scanner.may_contain_tokens(&xml)
                || (with_fields && memchr::memmem::find(&xml, b"DOCPROPERTY").is_some());
            if wanted {
                sources.push((part.name, xml));
            } else {
                debug!(part = %part.name, "nothing to merge in part");
            }
        }

        let scanner = &self.scanner;
        self.parts = sources
            .into_par_iter()
            .map(|(name, xml)| {
                let model = PartModel::parse(name, xml)?;
                let occurrences = scanner.occurrences(&model);
                Ok(PreparedPart {
                    model,
                    occurrences,
                    overrides: HashMap::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Distinct token names across prepared parts.
    pub fn tokens(&self) -> BTreeSet<String> {
        self.parts
            .iter()
            .flat_map(|p| p.occurrences.iter().map(|o| o.name.clone()))
            .collect()
    }

    /// Check that every occurrence stays within one paragraph.
    ///
    /// # Errors
    ///
    /// [`MergeError::Render`] naming the part and the boundary crossed.
    pub fn check_placeholders(&self) -> Result<()> {
        for part in &self.parts {
            for occurrence in &part.occurrences {
                check_occurrence(&part.model, occurrence)?;
            }
        }
        Ok(())
    }

    /// Write custom properties and plan `DOCPROPERTY` result refreshes.
    pub fn update_properties(&mut self, property_values: &HashMap<String, String>) -> Result<()> {
        if property_values.is_empty() {
            return Ok(());
        }
        let container = self.container.clone();
        self.container = write_properties(container, property_values)?;

        if self.options.update_fields {
            for part in &mut self.parts {
                part.overrides = fields::plan_updates(&part.model, property_values);
            }
        }
        Ok(())
    }

    /// Substitute token values in every prepared part and record the
    /// changed parts on the container.
    pub fn render_parts(&mut self, token_values: &HashMap<String, String>) -> Result<()> {
        let mut changed = Vec::new();
        for part in &self.parts {
            let rendered = render_part(&part.model, &part.occurrences, token_values, &part.overrides)?;
            self.unresolved.extend(rendered.unresolved);
            self.replaced += rendered.replaced;
            if let Some(xml) = rendered.xml {
                debug!(part = part.model.name(), replaced = rendered.replaced, "part rewritten");
                changed.push((part.model.name().to_string(), xml));
            }
        }
        if !changed.is_empty() {
            let container = self.container.clone();
            self.container = container.replace_parts(changed);
        }
        Ok(())
    }

    /// Finish the merge.
    pub fn finish(self) -> RenderOutcome {
        info!(
            replaced = self.replaced,
            unresolved = self.unresolved.len(),
            "merge finished"
        );
        RenderOutcome {
            container: self.container,
            unresolved: self.unresolved,
            replaced: self.replaced,
        }
    }
}

/// Merge token and property values into a container.
///
/// # Errors
///
/// [`MergeError::Render`] when a placeholder crosses a paragraph or table
/// cell boundary, [`MergeError::PropertyWrite`] when a property value does
/// not fit its declared type, plus any container error.
pub fn render(
    container: Container,
    token_values: &HashMap<String, String>,
    property_values: &HashMap<String, String>,
    options: &MergeOptions,
) -> Result<RenderOutcome> {
    let mut merge = Merge::new(container, options.clone())?;
    merge.prepare(!property_values.is_empty())?;
    merge.check_placeholders()?;
    merge.update_properties(property_values)?;
    merge.render_parts(token_values)?;
    Ok(merge.finish())
}

fn check_occurrence(model: &PartModel, occurrence: &TokenOccurrence) -> Result<()> {
    let runs = model.runs();
    let first = &runs[occurrence.start.run];
    let last = &runs[occurrence.end.run];
    let crosses = model
        .nodes_in(occurrence.span.clone())
        .map(|(node, _)| &runs[model.nodes()[node].run])
        .chain([last])
        .find(|run| run.paragraph != first.paragraph);

    match crosses {
        None => Ok(()),
        Some(run) if run.cell != first.cell => Err(MergeError::render(
            model.name(),
            format!("token {:?} crosses a table cell boundary", occurrence.name),
        )),
        Some(_) => Err(MergeError::render(
            model.name(),
            format!("token {:?} crosses a paragraph boundary", occurrence.name),
        )),
    }
}

/// Substitute values into one part.
///
/// `overrides` replaces the whole text of the given nodes; occurrences that
/// touch an overridden node are left to the override.
pub fn render_part(
    model: &PartModel,
    occurrences: &[TokenOccurrence],
    values: &HashMap<String, String>,
    overrides: &HashMap<usize, String>,
) -> Result<PartRender> {
    let mut result = PartRender::default();
    // Per node: local range to remove and the value inserted in its place
    let mut edits: BTreeMap<usize, SmallVec<[(std::ops::Range<usize>, Option<&str>); 2]>> =
        BTreeMap::new();
    let mut receiving_runs = HashSet::new();

    for occurrence in occurrences {
        let Some(value) = values.get(&occurrence.name) else {
            result.unresolved.insert(occurrence.name.clone());
            continue;
        };
        let touched: SmallVec<[_; 4]> = model.nodes_in(occurrence.span.clone()).collect();
        if touched.iter().any(|(node, _)| overrides.contains_key(node)) {
            continue;
        }
        for (i, (node, local)) in touched.into_iter().enumerate() {
            if i == 0 {
                receiving_runs.insert(model.nodes()[node].run);
            }
            edits
                .entry(node)
                .or_default()
                .push((local, (i == 0).then_some(value.as_str())));
        }
        result.replaced += 1;
    }

    let mut new_text: BTreeMap<usize, String> = overrides
        .iter()
        .map(|(&node, text)| (node, text.clone()))
        .collect();
    for (node, mut list) in edits {
        list.sort_by_key(|(range, _)| range.start);
        let text = &model.nodes()[node].text;
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (range, insert) in list {
            out.push_str(&text[cursor..range.start]);
            if let Some(value) = insert {
                out.push_str(value);
            }
            cursor = range.end;
        }
        out.push_str(&text[cursor..]);
        new_text.insert(node, out);
    }

    let touched_runs: BTreeSet<usize> = new_text.keys().map(|&n| model.nodes()[n].run).collect();
    let removed: HashSet<usize> = touched_runs
        .into_iter()
        .filter(|&r| {
            let run = &model.runs()[r];
            !receiving_runs.contains(&r)
                && !run.has_other_content
                && run.nodes.iter().all(|&n| {
                    new_text
                        .get(&n)
                        .map_or(model.nodes()[n].text.is_empty(), String::is_empty)
                })
        })
        .collect();

    let mut splices: Vec<Splice> = removed
        .iter()
        .map(|&r| Splice::delete(model.runs()[r].element.clone()))
        .collect();
    for (&node, text) in &new_text {
        let node = &model.nodes()[node];
        if removed.contains(&node.run) || *text == node.text {
            continue;
        }
        splices.push(Splice::new(node.element.clone(), text_element(&node.tag, text)));
    }

    if !splices.is_empty() {
        let xml = apply_splices(model.xml(), splices)?;
        if xml != model.xml() {
            result.xml = Some(xml);
        }
    }
    Ok(result)
}

/// Serialize text as one or more text elements.
///
/// Line feeds become `<w:br/>` and tabs `<w:tab/>` so multi-line values
/// display the way they were entered. Vertical tabs and form feeds, which
/// Word uses for manual line and page breaks in pasted text, also become
/// breaks; other characters XML cannot carry are dropped.
fn text_element(tag: &str, text: &str) -> Vec<u8> {
    let prefix = tag.strip_suffix('t').unwrap_or("");
    let text: String = text
        .replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\u{0B}' | '\u{0C}' => Some('\n'),
            c if is_xml_char(c) => Some(c),
            _ => None,
        })
        .collect();
    let mut out = String::with_capacity(text.len() + 40);
    let mut emitted = false;

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str(&format!("<{}br/>", prefix));
        }
        for (j, segment) in line.split('\t').enumerate() {
            if j > 0 {
                out.push_str(&format!("<{}tab/>", prefix));
            }
            if !segment.is_empty() {
                out.push_str(&format!(
                    r#"<{tag} xml:space="preserve">{}</{tag}>"#,
                    escape_xml(segment),
                    tag = tag
                ));
                emitted = true;
            }
        }
    }
    if !emitted && out.is_empty() {
        out.push_str(&format!("<{}/>", tag));
    }
    out.into_bytes()
}
