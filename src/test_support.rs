//! Minimal WordprocessingML packages for tests.
//!
//! Only depends on `zip`, so integration tests can pull it in with
//! `#[path = "../src/test_support.rs"] mod test_support;`.
#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Builds a `.docx` byte buffer part by part.
#[derive(Debug, Clone)]
pub struct DocxBuilder {
    body: Option<String>,
    headers: Vec<(String, String)>,
    footers: Vec<(String, String)>,
    footnotes: Option<String>,
    endnotes: Option<String>,
    properties: Vec<(String, String, String)>,
    custom_xml: Option<String>,
    stored: Vec<(String, Vec<u8>)>,
}

impl Default for DocxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self {
            body: Some(String::new()),
            headers: Vec::new(),
            footers: Vec::new(),
            footnotes: None,
            endnotes: None,
            properties: Vec::new(),
            custom_xml: None,
            stored: Vec::new(),
        }
    }

    /// Content of `<w:body>`.
    pub fn body(mut self, xml: &str) -> Self {
        self.body = Some(xml.to_string());
        self
    }

    /// A header part `word/<name>` holding `xml` inside `<w:hdr>`.
    pub fn header(mut self, name: &str, xml: &str) -> Self {
        self.headers.push((name.to_string(), xml.to_string()));
        self
    }

    /// A footer part `word/<name>` holding `xml` inside `<w:ftr>`.
    pub fn footer(mut self, name: &str, xml: &str) -> Self {
        self.footers.push((name.to_string(), xml.to_string()));
        self
    }

    /// Content of `<w:footnotes>`.
    pub fn footnotes(mut self, xml: &str) -> Self {
        self.footnotes = Some(xml.to_string());
        self
    }

    /// Content of `<w:endnotes>`.
    pub fn endnotes(mut self, xml: &str) -> Self {
        self.endnotes = Some(xml.to_string());
        self
    }

    /// A custom property; `vt_type` is the variant element name without prefix.
    pub fn property(mut self, name: &str, vt_type: &str, value: &str) -> Self {
        self.properties
            .push((name.to_string(), vt_type.to_string(), value.to_string()));
        self
    }

    /// Verbatim `docProps/custom.xml`, overriding [`DocxBuilder::property`].
    pub fn custom_xml(mut self, xml: &str) -> Self {
        self.custom_xml = Some(xml.to_string());
        self
    }

    /// An extra entry written without compression.
    pub fn stored_part(mut self, name: &str, data: &[u8]) -> Self {
        self.stored.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn without_main_document(mut self) -> Self {
        self.body = None;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut parts: Vec<(String, Vec<u8>, CompressionMethod)> = Vec::new();
        let mut overrides = Vec::new();
        let mut doc_rels = Vec::new();

        let custom = self.custom_xml.clone().or_else(|| {
            (!self.properties.is_empty()).then(|| custom_properties_xml(&self.properties))
        });

        let mut package_rels = Vec::new();
        if self.body.is_some() {
            package_rels.push(format!(
                r#"<Relationship Id="rId1" Type="{R_NS}/officeDocument" Target="word/document.xml"/>"#
            ));
        }
        if custom.is_some() {
            package_rels.push(format!(
                r#"<Relationship Id="rId2" Type="{R_NS}/custom-properties" Target="docProps/custom.xml"/>"#
            ));
            overrides.push((
                "docProps/custom.xml".to_string(),
                "application/vnd.openxmlformats-officedocument.custom-properties+xml",
            ));
        }

        for (name, xml) in &self.headers {
            overrides.push((
                format!("word/{name}"),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml",
            ));
            doc_rels.push(("header", name.clone()));
            parts.push((
                format!("word/{name}"),
                wrap("w:hdr", xml).into_bytes(),
                CompressionMethod::Deflated,
            ));
        }
        for (name, xml) in &self.footers {
            overrides.push((
                format!("word/{name}"),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml",
            ));
            doc_rels.push(("footer", name.clone()));
            parts.push((
                format!("word/{name}"),
                wrap("w:ftr", xml).into_bytes(),
                CompressionMethod::Deflated,
            ));
        }
        if let Some(xml) = &self.footnotes {
            overrides.push((
                "word/footnotes.xml".to_string(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.footnotes+xml",
            ));
            doc_rels.push(("footnotes", "footnotes.xml".to_string()));
            parts.push((
                "word/footnotes.xml".to_string(),
                wrap("w:footnotes", xml).into_bytes(),
                CompressionMethod::Deflated,
            ));
        }
        if let Some(xml) = &self.endnotes {
            overrides.push((
                "word/endnotes.xml".to_string(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.endnotes+xml",
            ));
            doc_rels.push(("endnotes", "endnotes.xml".to_string()));
            parts.push((
                "word/endnotes.xml".to_string(),
                wrap("w:endnotes", xml).into_bytes(),
                CompressionMethod::Deflated,
            ));
        }

        if let Some(body) = &self.body {
            overrides.insert(
                0,
                (
                    "word/document.xml".to_string(),
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
                ),
            );
            let document = format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}"><w:body>{body}<w:sectPr/></w:body></w:document>"#
            );
            parts.insert(
                0,
                ("word/document.xml".to_string(), document.into_bytes(), CompressionMethod::Deflated),
            );
            let rels: String = doc_rels
                .iter()
                .enumerate()
                .map(|(i, (kind, target))| {
                    format!(
                        r#"<Relationship Id="rId{}" Type="{R_NS}/{kind}" Target="{target}"/>"#,
                        i + 10
                    )
                })
                .collect();
            parts.push((
                "word/_rels/document.xml.rels".to_string(),
                relationships(&rels).into_bytes(),
                CompressionMethod::Deflated,
            ));
        }

        if let Some(xml) = custom {
            parts.push(("docProps/custom.xml".to_string(), xml.into_bytes(), CompressionMethod::Deflated));
        }
        for (name, data) in self.stored {
            parts.push((name, data, CompressionMethod::Stored));
        }

        let overrides: String = overrides
            .iter()
            .map(|(name, ct)| format!(r#"<Override PartName="/{name}" ContentType="{ct}"/>"#))
            .collect();
        let content_types = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/>{overrides}</Types>"#
        );

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file("[Content_Types].xml", deflated).unwrap();
        writer.write_all(content_types.as_bytes()).unwrap();
        writer.start_file("_rels/.rels", deflated).unwrap();
        writer
            .write_all(relationships(&package_rels.concat()).as_bytes())
            .unwrap();
        for (name, data, method) in parts {
            let options = SimpleFileOptions::default().compression_method(method);
            writer.start_file(name, options).unwrap();
            writer.write_all(&data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}

fn wrap(root: &str, content: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<{root} xmlns:w="{W_NS}" xmlns:r="{R_NS}">{content}</{root}>"#
    )
}

fn relationships(content: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{content}</Relationships>"#
    )
}

fn custom_properties_xml(properties: &[(String, String, String)]) -> String {
    let body: String = properties
        .iter()
        .enumerate()
        .map(|(i, (name, vt, value))| {
            format!(
                r#"<property fmtid="{{D5CDD505-2E9C-101B-9397-08002B2CF9AE}}" pid="{}" name="{name}"><vt:{vt}>{value}</vt:{vt}></property>"#,
                i + 2
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/custom-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes">{body}</Properties>"#
    )
}

/// A plain run.
pub fn run(text: &str) -> String {
    format!(r#"<w:r><w:t xml:space="preserve">{text}</w:t></w:r>"#)
}

/// A bold run.
pub fn bold_run(text: &str) -> String {
    format!(r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{text}</w:t></w:r>"#)
}

/// A paragraph made of the given runs.
pub fn paragraph(runs: &[String]) -> String {
    format!("<w:p>{}</w:p>", runs.concat())
}

/// Read one entry of a built package as UTF-8.
pub fn read_entry(package: &[u8], name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(package)).ok()?;
    let mut file = archive.by_name(name).ok()?;
    let mut out = String::new();
    file.read_to_string(&mut out).ok()?;
    Some(out)
}

/// Concatenated `<w:t>` text of a part, one line per paragraph.
pub fn visible_text(xml: &str) -> String {
    let mut out = String::new();
    let mut rest = xml;
    while let Some(pos) = rest.find('<') {
        let tail = &rest[pos..];
        let Some(end) = tail.find('>') else { break };
        let tag = &tail[1..end];
        rest = &tail[end + 1..];
        if tag == "/w:p" {
            out.push('\n');
        } else if (tag == "w:t" || tag.starts_with("w:t ")) && !tag.ends_with('/') {
            if let Some(close) = rest.find("</w:t>") {
                out.push_str(&unescape(&rest[..close]));
                rest = &rest[close + 6..];
            }
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
