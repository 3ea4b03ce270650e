//! `DOCPROPERTY` field results.
//!
//! Word caches the displayed value of a field in ordinary runs between the
//! field's `separate` and `end` characters (complex fields) or inside a
//! `<w:fldSimple>` element. When a custom property changes, those cached runs
//! are refreshed so the document shows the new value without a field update.
use super::runs::{FieldCharKind, PartModel};
use std::collections::HashMap;
use tracing::debug;

/// A field found in a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The field instruction (e.g., `DOCPROPERTY Client \* MERGEFORMAT`)
    pub instruction: String,
    /// Text nodes holding the cached result, in order
    pub result_nodes: Vec<usize>,
}

impl Field {
    /// The field type: the first word of the instruction.
    pub fn field_type(&self) -> &str {
        self.instruction
            .split_whitespace()
            .next()
            .unwrap_or(&self.instruction)
    }

    /// The referenced property name, for `DOCPROPERTY` fields.
    pub fn property_name(&self) -> Option<&str> {
        docproperty_name(&self.instruction)
    }
}

/// Extract the property name from a `DOCPROPERTY` instruction.
///
/// ```
/// use loquat::template::fields::docproperty_name;
///
/// assert_eq!(docproperty_name(r#" DOCPROPERTY "Client Name" \* MERGEFORMAT "#), Some("Client Name"));
/// assert_eq!(docproperty_name("docproperty Version"), Some("Version"));
/// assert_eq!(docproperty_name("PAGE"), None);
/// ```
pub fn docproperty_name(instruction: &str) -> Option<&str> {
    let rest = instruction.trim_start();
    let split = rest.find(char::is_whitespace).unwrap_or(rest.len());
    if !rest[..split].eq_ignore_ascii_case("DOCPROPERTY") {
        return None;
    }
    let rest = rest[split..].trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(&quoted[..end]).filter(|name| !name.is_empty());
    }
    rest.split_whitespace().next().filter(|name| !name.starts_with('\\'))
}

/// All fields of a part, simple fields first, then complex fields in the
/// order their `end` character appears.
pub fn fields(model: &PartModel) -> Vec<Field> {
    let mut simple: Vec<Field> = Vec::new();
    let mut complex = Vec::new();
    // Open complex fields: instruction, whether `separate` was seen, result nodes
    let mut open: Vec<(String, bool, Vec<usize>)> = Vec::new();

    for run in model.runs() {
        if let Some(index) = run.simple_field {
            while simple.len() <= index {
                let instruction = model.simple_field(simple.len()).unwrap_or_default();
                simple.push(Field {
                    instruction: instruction.trim().to_string(),
                    result_nodes: Vec::new(),
                });
            }
            simple[index].result_nodes.extend(run.nodes.iter().copied());
        }

        match run.field_char {
            Some(FieldCharKind::Begin) => open.push((String::new(), false, Vec::new())),
            Some(FieldCharKind::Separate) => {
                if let Some(top) = open.last_mut() {
                    top.1 = true;
                }
            },
            Some(FieldCharKind::End) => {
                if let Some((instruction, _, result_nodes)) = open.pop() {
                    complex.push(Field {
                        instruction: instruction.trim().to_string(),
                        result_nodes,
                    });
                }
            },
            None => {
                if let Some((instruction, separated, result_nodes)) = open.last_mut() {
                    if *separated {
                        result_nodes.extend(run.nodes.iter().copied());
                    } else {
                        instruction.push_str(&run.instr_text);
                    }
                }
            },
        }
    }

    simple.retain(|f| !f.instruction.is_empty());
    simple.extend(complex);
    simple
}

/// New text for result nodes of `DOCPROPERTY` fields whose property is in
/// `values`: the first result node takes the value, the others are emptied.
pub fn plan_updates(model: &PartModel, values: &HashMap<String, String>) -> HashMap<usize, String> {
    let mut overrides = HashMap::new();
    if values.is_empty() {
        return overrides;
    }
    for field in fields(model) {
        let Some(name) = field.property_name() else { continue };
        let Some(value) = values.get(name) else { continue };
        let Some((&first, rest)) = field.result_nodes.split_first() else {
            debug!(part = model.name(), property = name, "field has no cached result");
            continue;
        };
        overrides.insert(first, value.clone());
        for &node in rest {
            overrides.insert(node, String::new());
        }
        debug!(part = model.name(), property = name, "refreshed field result");
    }
    overrides
}
