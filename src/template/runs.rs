//! Run-level model of a WordprocessingML part.
//!
//! A [`PartModel`] records, for one part, every `<w:r>` run and every `<w:t>`
//! text node with the byte range it occupies in the original XML. The text of
//! all nodes is concatenated in document order into a single logical stream,
//! and each node remembers which slice of the stream it contributed. Matching
//! happens on the stream; edits are mapped back to nodes and spliced into the
//! original bytes, so markup the engine does not touch is never re-serialized.
use crate::common::xml::{is_wml, resolve_ref, text_of};
use crate::error::{MergeError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use smallvec::SmallVec;
use std::ops::Range;

/// Stream character standing for non-text run content (tabs, breaks,
/// drawings, field characters). It is never part of a token.
pub const OBJECT_MARK: char = '\u{FFFC}';

/// Field character type carried by a `<w:fldChar>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCharKind {
    Begin,
    Separate,
    End,
}

/// One `<w:t>` element.
#[derive(Debug, Clone)]
pub struct TextNode {
    /// Byte range of the whole element, tags included
    pub element: Range<usize>,
    /// Qualified element name as written in the part (usually `w:t`)
    pub tag: String,
    /// Decoded text content
    pub text: String,
    /// Index of the owning run
    pub run: usize,
    /// Byte range of this node's text in the logical stream
    pub stream: Range<usize>,
}

/// One `<w:r>` element.
#[derive(Debug, Clone, Default)]
pub struct Run {
    /// Byte range of the whole element, tags included
    pub element: Range<usize>,
    /// Ordinal of the innermost enclosing paragraph
    pub paragraph: Option<usize>,
    /// Ordinal of the innermost enclosing table cell
    pub cell: Option<usize>,
    /// Text nodes in this run, in order
    pub nodes: SmallVec<[usize; 2]>,
    /// Whether the run holds anything besides properties and text nodes
    pub has_other_content: bool,
    /// `<w:fldChar>` carried by this run, if any
    pub field_char: Option<FieldCharKind>,
    /// Concatenated `<w:instrText>` content
    pub instr_text: String,
    /// Index of the enclosing `<w:fldSimple>`, if any
    pub simple_field: Option<usize>,
}

/// A position inside a run's text: run index and byte offset into the
/// concatenated text of that run's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPosition {
    pub run: usize,
    pub offset: usize,
}

/// Parsed view of one text part.
#[derive(Debug, Clone)]
pub struct PartModel {
    name: String,
    xml: Vec<u8>,
    runs: Vec<Run>,
    nodes: Vec<TextNode>,
    /// Instructions of `<w:fldSimple>` elements, indexed by `Run::simple_field`
    simple_fields: Vec<String>,
    stream: String,
}

/// Open element the parser must see closed again.
#[derive(Debug, Clone, Copy)]
enum Frame {
    Paragraph(usize),
    Cell(usize),
    Run(usize),
    SimpleField(usize),
    Text(usize),
    InstrText(usize),
    /// Non-text direct child of a run
    RunObject,
    Other,
}

impl PartModel {
    /// Parse a part.
    ///
    /// # Errors
    ///
    /// [`MergeError::ContainerCorrupt`] if the part is not well-formed XML.
    pub fn parse(name: impl Into<String>, xml: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let mut model = Self {
            name,
            xml: Vec::new(),
            runs: Vec::new(),
            nodes: Vec::new(),
            simple_fields: Vec::new(),
            stream: String::with_capacity(xml.len() / 8),
        };
        model.scan(&xml).map_err(|e| match e {
            MergeError::ContainerCorrupt(msg) => {
                MergeError::ContainerCorrupt(format!("{}: {}", model.name, msg))
            },
            other => other,
        })?;
        model.xml = xml;
        Ok(model)
    }

    fn scan(&mut self, xml: &[u8]) -> Result<()> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::with_capacity(1024);
        let mut stack: Vec<Frame> = Vec::with_capacity(32);
        let mut paragraphs = 0usize;
        let mut cells = 0usize;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event_into(&mut buf)?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Start(ref e) => {
                    let frame = self.open_element(e, start, false, &stack, &mut paragraphs, &mut cells)?;
                    stack.push(frame);
                },
                Event::Empty(ref e) => {
                    let frame = self.open_element(e, start, true, &stack, &mut paragraphs, &mut cells)?;
                    if let Frame::Text(node) = frame {
                        self.close_text(node, end);
                    }
                },
                Event::End(_) => match stack.pop() {
                    Some(Frame::Run(run)) => self.runs[run].element.end = end,
                    Some(Frame::Text(node)) => self.close_text(node, end),
                    Some(Frame::RunObject) => self.stream.push(OBJECT_MARK),
                    Some(_) => {},
                    None => {
                        return Err(MergeError::ContainerCorrupt(format!(
                            "unbalanced end tag at byte {}",
                            start
                        )));
                    },
                },
                Event::Text(ref t) => match stack.last() {
                    Some(Frame::Text(node)) => {
                        let text = text_of(t)?;
                        self.nodes[*node].text.push_str(&text);
                    },
                    Some(Frame::InstrText(run)) => {
                        let text = text_of(t)?;
                        self.runs[*run].instr_text.push_str(&text);
                    },
                    _ => {},
                },
                Event::GeneralRef(ref r) => match stack.last() {
                    Some(Frame::Text(node)) => {
                        let text = resolve_ref(r)?;
                        self.nodes[*node].text.push_str(&text);
                    },
                    Some(Frame::InstrText(run)) => {
                        let text = resolve_ref(r)?;
                        self.runs[*run].instr_text.push_str(&text);
                    },
                    _ => {},
                },
                Event::CData(ref c) => {
                    if let Some(Frame::Text(node)) = stack.last() {
                        let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                        self.nodes[*node].text.push_str(&text);
                    }
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(MergeError::ContainerCorrupt(
                "unexpected end of XML".to_string(),
            ));
        }
        Ok(())
    }

    /// Classify an opening (or self-closing) element and record what it starts.
    fn open_element(
        &mut self,
        e: &BytesStart<'_>,
        start: usize,
        empty: bool,
        stack: &[Frame],
        paragraphs: &mut usize,
        cells: &mut usize,
    ) -> Result<Frame> {
        let qname = e.name();
        let qname = qname.as_ref();

        // Direct children of a run
        if let Some(Frame::Run(run)) = stack.last().copied() {
            if is_wml(qname, b"t") {
                let node = self.nodes.len();
                self.nodes.push(TextNode {
                    element: start..start,
                    tag: String::from_utf8_lossy(qname).into_owned(),
                    text: String::new(),
                    run,
                    stream: 0..0,
                });
                self.runs[run].nodes.push(node);
                return Ok(Frame::Text(node));
            }
            if is_wml(qname, b"rPr") || is_wml(qname, b"lastRenderedPageBreak") {
                return Ok(Frame::Other);
            }
            self.runs[run].has_other_content = true;
            if is_wml(qname, b"instrText") {
                return Ok(Frame::InstrText(run));
            }
            if is_wml(qname, b"delText") {
                return Ok(Frame::Other);
            }
            if is_wml(qname, b"fldChar") {
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.local_name().as_ref() == b"fldCharType" {
                        self.runs[run].field_char = match attr.value.as_ref() {
                            b"begin" => Some(FieldCharKind::Begin),
                            b"separate" => Some(FieldCharKind::Separate),
                            b"end" => Some(FieldCharKind::End),
                            _ => None,
                        };
                    }
                }
            }
            self.stream.push(OBJECT_MARK);
            return Ok(Frame::RunObject);
        }

        if empty {
            return Ok(Frame::Other);
        }

        let paragraph = innermost(stack, |f| match f {
            Frame::Paragraph(id) => Some(id),
            _ => None,
        });

        if is_wml(qname, b"p") {
            *paragraphs += 1;
            return Ok(Frame::Paragraph(*paragraphs - 1));
        }
        if is_wml(qname, b"tc") {
            *cells += 1;
            return Ok(Frame::Cell(*cells - 1));
        }
        if is_wml(qname, b"r") {
            let run = self.runs.len();
            self.runs.push(Run {
                element: start..start,
                paragraph,
                cell: innermost(stack, |f| match f {
                    Frame::Cell(id) => Some(id),
                    _ => None,
                }),
                simple_field: innermost(stack, |f| match f {
                    Frame::SimpleField(id) => Some(id),
                    _ => None,
                }),
                ..Run::default()
            });
            return Ok(Frame::Run(run));
        }
        if is_wml(qname, b"fldSimple") {
            let mut instruction = String::new();
            for attr in e.attributes() {
                let attr = attr?;
                if attr.key.local_name().as_ref() == b"instr" {
                    instruction = attr.unescape_value()?.into_owned();
                }
            }
            self.simple_fields.push(instruction);
            return Ok(Frame::SimpleField(self.simple_fields.len() - 1));
        }
        Ok(Frame::Other)
    }

    fn close_text(&mut self, node: usize, end: usize) {
        let stream_start = self.stream.len();
        let node = &mut self.nodes[node];
        self.stream.push_str(&node.text);
        node.element.end = end;
        node.stream = stream_start..self.stream.len();
    }

    /// Part name inside the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The original XML bytes.
    pub fn xml(&self) -> &[u8] {
        &self.xml
    }

    /// The logical character stream of this part.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn nodes(&self) -> &[TextNode] {
        &self.nodes
    }

    /// Instruction of a `<w:fldSimple>` by index.
    pub fn simple_field(&self, index: usize) -> Option<&str> {
        self.simple_fields.get(index).map(String::as_str)
    }

    /// Text nodes overlapping a stream span, with the overlap expressed as a
    /// byte range local to each node's text.
    pub fn nodes_in(&self, span: Range<usize>) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        // Nodes are ordered by stream position
        let first = self.nodes.partition_point(|n| n.stream.end <= span.start);
        self.nodes[first..]
            .iter()
            .enumerate()
            .take_while(move |(_, n)| n.stream.start < span.end)
            .filter(|(_, n)| !n.stream.is_empty())
            .map(move |(i, n)| {
                let from = span.start.max(n.stream.start) - n.stream.start;
                let to = span.end.min(n.stream.end) - n.stream.start;
                (first + i, from..to)
            })
    }

    /// Map a stream offset to a position inside a run.
    ///
    /// `at_end` selects the node a boundary offset belongs to: the node that
    /// ends there (for span ends) or the node that starts there.
    pub fn run_position(&self, offset: usize, at_end: bool) -> Option<RunPosition> {
        // Nodes are ordered by stream position
        let index = if at_end {
            self.nodes.partition_point(|n| n.stream.end < offset)
        } else {
            self.nodes.partition_point(|n| n.stream.end <= offset)
        };
        let node = self.nodes.get(index)?;
        let inside = if at_end {
            node.stream.start < offset
        } else {
            node.stream.start <= offset
        };
        if !inside {
            return None;
        }
        let run = &self.runs[node.run];
        let before: usize = run
            .nodes
            .iter()
            .take_while(|&&n| n != index)
            .map(|&n| self.nodes[n].text.len())
            .sum();
        Some(RunPosition {
            run: node.run,
            offset: before + offset - node.stream.start,
        })
    }
}

fn innermost<F>(stack: &[Frame], pick: F) -> Option<usize>
where
    F: Fn(Frame) -> Option<usize>,
{
    stack.iter().rev().find_map(|f| pick(*f))
}
