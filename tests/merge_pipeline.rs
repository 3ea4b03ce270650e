//! End-to-end behaviour of extraction, rendering and the worker.

#[path = "../src/test_support.rs"]
mod test_support;

use loquat::{
    Container, ErrorKind, MergeError, MergeOptions, Request, Response, Stage, Worker,
    extract_tokens, read_properties, render,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use test_support::{DocxBuilder, bold_run, paragraph, read_entry, run, visible_text};

fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn render_bytes(
    bytes: &[u8],
    tokens: &HashMap<String, String>,
    properties: &HashMap<String, String>,
) -> loquat::Result<(Vec<u8>, BTreeSet<String>)> {
    let container = Container::open(bytes.to_vec())?;
    let outcome = render(container, tokens, properties, &MergeOptions::default())?;
    Ok((outcome.container.serialize()?.to_vec(), outcome.unresolved))
}

fn tokens_of(bytes: &[u8]) -> BTreeSet<String> {
    let container = Container::open(bytes.to_vec()).unwrap();
    extract_tokens(&container, &MergeOptions::default()).unwrap()
}

#[test]
fn split_token_resolves_with_first_run_formatting() {
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[
            run("Dear "),
            bold_run("{{first"),
            run("_name}}, thanks"),
        ]))
        .build();
    assert_eq!(tokens_of(&bytes).into_iter().collect::<Vec<_>>(), vec!["first_name"]);

    let (out, unresolved) =
        render_bytes(&bytes, &values(&[("first_name", "Grace")]), &HashMap::new()).unwrap();
    assert!(unresolved.is_empty());
    let xml = read_entry(&out, "word/document.xml").unwrap();
    assert_eq!(visible_text(&xml), "Dear Grace, thanks\n");
    assert!(xml.contains(r#"<w:rPr><w:b/></w:rPr><w:t xml:space="preserve">Grace</w:t>"#));
    assert!(xml.contains(r#"<w:t xml:space="preserve">, thanks</w:t>"#));
}

#[test]
fn unknown_token_stays_literal() {
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("{{known}} and {{unknown}}")]))
        .build();
    let (out, unresolved) =
        render_bytes(&bytes, &values(&[("known", "K")]), &HashMap::new()).unwrap();
    assert_eq!(unresolved.into_iter().collect::<Vec<_>>(), vec!["unknown"]);
    let xml = read_entry(&out, "word/document.xml").unwrap();
    assert_eq!(visible_text(&xml), "K and {{unknown}}\n");
}

#[test]
fn lone_open_delimiter_is_literal() {
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("price {{ is"), run(" negotiable")]))
        .build();
    assert!(tokens_of(&bytes).is_empty());
    let (out, unresolved) = render_bytes(&bytes, &values(&[("is", "x")]), &HashMap::new()).unwrap();
    assert!(unresolved.is_empty());
    assert_eq!(out, bytes);
}

#[test]
fn rendering_twice_is_stable() {
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("{{a}}-"), bold_run("{{"), run("b}}")]))
        .header("header1.xml", &paragraph(&[run("{{a}}")]))
        .property("Project", "lpwstr", "Old")
        .property("Count", "i4", "1")
        .build();
    let tokens = values(&[("a", "alpha"), ("b", "beta")]);
    let properties = values(&[("Project", "Loquat"), ("Count", "7")]);

    let (first, _) = render_bytes(&bytes, &tokens, &properties).unwrap();
    let (second, _) = render_bytes(&first, &tokens, &properties).unwrap();

    for part in ["word/document.xml", "word/header1.xml"] {
        assert_eq!(
            visible_text(&read_entry(&first, part).unwrap()),
            visible_text(&read_entry(&second, part).unwrap())
        );
    }
    let first_props = read_properties(&Container::open(first).unwrap()).unwrap().pairs();
    let second_props = read_properties(&Container::open(second).unwrap()).unwrap().pairs();
    assert_eq!(first_props, second_props);
    assert_eq!(first_props[0], ("Project".to_string(), "Loquat".to_string()));
}

#[test]
fn new_property_is_appended_after_existing_ones() {
    let bytes = DocxBuilder::new()
        .property("Client", "lpwstr", "Acme")
        .property("Approved", "bool", "false")
        .build();
    let (out, _) = render_bytes(&bytes, &HashMap::new(), &values(&[("Reviewer", "Lin")])).unwrap();
    let props = read_properties(&Container::open(out).unwrap()).unwrap();
    let names: Vec<&str> = props.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["Client", "Approved", "Reviewer"]);
    assert_eq!(props.get("Approved").unwrap().vt_type(), "bool");
    assert_eq!(props.get("Reviewer").unwrap().pid(), 4);
}

#[test]
fn mistyped_property_value_fails() {
    let bytes = DocxBuilder::new().property("Count", "i4", "1").build();
    let err = render_bytes(&bytes, &HashMap::new(), &values(&[("Count", "many")])).unwrap_err();
    assert!(matches!(err, MergeError::PropertyWrite(_)));
}

#[test]
fn cell_boundary_ends_with_error_not_rendered() {
    let body = format!(
        "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
        paragraph(&[run("{{cl")]),
        paragraph(&[run("ient}}")])
    );
    let bytes = DocxBuilder::new().body(&body).build();
    let responses: Vec<Response> = loquat::pipeline::run(
        Request::render(bytes, values(&[("client", "Acme")]), HashMap::new()),
        MergeOptions::default(),
    )
    .collect();

    assert!(!responses.iter().any(|r| matches!(r, Response::Rendered { .. })));
    match responses.last().unwrap() {
        Response::Error {
            kind,
            message,
            stage,
        } => {
            assert_eq!(*kind, ErrorKind::RenderError);
            assert!(message.contains("table cell boundary"));
            assert_eq!(*stage, Some(Stage::FixingPlaceholders));
        },
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[test]
fn missing_main_document_is_part_missing() {
    let bytes = DocxBuilder::new().without_main_document().build();
    let responses: Vec<Response> =
        loquat::pipeline::run(Request::extract(bytes), MergeOptions::default()).collect();
    assert!(matches!(
        responses.last(),
        Some(Response::Error {
            kind: ErrorKind::PartMissing,
            stage: Some(Stage::Parsing),
            ..
        })
    ));
}

#[test]
fn extracted_properties_render_back_unchanged() {
    let custom = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/custom-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes">"#,
        r#"<property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="2" name="Client"><vt:lpwstr>Acme</vt:lpwstr></property>"#,
        r#"<property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="3" name="Count"><vt:i4>3</vt:i4></property>"#,
        r#"<property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="4" name="Signed"><vt:filetime>116444736000000000</vt:filetime></property>"#,
        r#"<property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="5" name="Tags"><vt:vector size="1" baseType="lpstr"><vt:lpstr>x</vt:lpstr></vt:vector></property>"#,
        r#"</Properties>"#
    );
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("{{client}}")]))
        .custom_xml(custom)
        .build();

    let extracted = loquat::pipeline::run(Request::extract(bytes.clone()), MergeOptions::default())
        .last()
        .unwrap();
    let properties = match extracted {
        Response::Extracted { properties, .. } => properties,
        other => panic!("unexpected terminal {other:?}"),
    };
    assert_eq!(properties.len(), 4);

    let request = Request::render(bytes.clone(), HashMap::new(), properties.into_iter().collect());
    match loquat::pipeline::run(request, MergeOptions::default()).last().unwrap() {
        Response::Rendered {
            bytes: rendered, ..
        } => assert_eq!(rendered.as_ref(), bytes.as_slice()),
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[test]
fn control_characters_in_values() {
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("{{x}}")]))
        .property("Note", "lpwstr", "ok")
        .build();

    let (out, _) = render_bytes(&bytes, &values(&[("x", "a\u{0B}b\u{0}c")]), &HashMap::new()).unwrap();
    let xml = read_entry(&out, "word/document.xml").unwrap();
    assert!(!xml.chars().any(|c| c < ' ' && !matches!(c, '\t' | '\n' | '\r')));
    assert_eq!(visible_text(&xml), "abc\n");

    let request = Request::render(bytes, HashMap::new(), values(&[("Note", "bad\u{1}")]));
    match loquat::pipeline::run(request, MergeOptions::default()).last().unwrap() {
        Response::Error { kind, stage, .. } => {
            assert_eq!(kind, ErrorKind::PropertyWriteError);
            assert_eq!(stage, Some(Stage::UpdatingFields));
        },
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[tokio::test]
async fn worker_streams_progress_then_result() {
    let worker = Worker::new(MergeOptions::default()).spawn();
    let bytes = DocxBuilder::new()
        .body(&paragraph(&[run("{{x}}")]))
        .property("Owner", "lpwstr", "me")
        .build();

    let responses = worker.submit(Request::extract(bytes)).await.unwrap().collect().await;
    assert_eq!(
        responses[..2],
        [
            Response::Progress {
                stage: Stage::Loading,
                percent: 0
            },
            Response::Progress {
                stage: Stage::Parsing,
                percent: 50
            },
        ]
    );
    assert_eq!(
        responses[2],
        Response::Extracted {
            tokens: BTreeSet::from(["x".to_string()]),
            properties: vec![("Owner".to_string(), "me".to_string())],
        }
    );
    worker.terminate();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn absent_tokens_return_input_bytes(
        names in prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..5),
        filler in "[A-Za-z ]{0,12}",
    ) {
        let runs: Vec<String> = names
            .iter()
            .map(|name| run(&format!("{filler}{{{{{name}}}}}")))
            .collect();
        let bytes = DocxBuilder::new().body(&paragraph(&runs)).build();
        let absent = values(&[("not_in_template!", "x")]);

        let (out, unresolved) = render_bytes(&bytes, &absent, &HashMap::new()).unwrap();
        prop_assert_eq!(out, bytes);
        prop_assert_eq!(unresolved, names.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn property_update_keeps_other_entries(
        entries in prop::collection::btree_map("[A-Z][a-zA-Z]{0,9}", (0u8..3, any::<i32>(), "[a-zA-Z0-9]{1,10}"), 1..6),
        pick in any::<prop::sample::Index>(),
        replacement in "[a-zA-Z0-9]{1,10}",
    ) {
        let mut builder = DocxBuilder::new();
        for (name, (kind, number, text)) in &entries {
            builder = match kind {
                0 => builder.property(name, "lpwstr", text),
                1 => builder.property(name, "i4", &number.to_string()),
                _ => builder.property(name, "bool", if number % 2 == 0 { "true" } else { "false" }),
            };
        }
        let bytes = builder.build();
        let before = read_properties(&Container::open(bytes.clone()).unwrap()).unwrap();

        let target = before.iter().nth(pick.index(before.len())).unwrap().name().to_string();
        let new_value = match before.get(&target).unwrap().vt_type() {
            "lpwstr" => replacement,
            "i4" => "42".to_string(),
            _ => "true".to_string(),
        };
        let (out, _) = render_bytes(&bytes, &HashMap::new(), &values(&[(target.as_str(), new_value.as_str())])).unwrap();
        let after = read_properties(&Container::open(out).unwrap()).unwrap();

        prop_assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(after.iter()) {
            prop_assert_eq!(old.name(), new.name());
            prop_assert_eq!(old.vt_type(), new.vt_type());
            prop_assert_eq!(old.pid(), new.pid());
            if old.name() == target {
                prop_assert_eq!(new.text(), new_value.as_str());
            } else {
                prop_assert_eq!(old.text(), new.text());
            }
        }
    }
}
