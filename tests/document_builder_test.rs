mod common;

use common::test_helpers::*;
use xsd_dom::{Config, DocumentBuilder, ParserConfig, build, build_with_resolver, build_with_schema};

#[test]
fn test_build_people_document() {
    let fixtures = TestFixtures::new();
    let doc = build(fixtures.people_xml().as_slice()).unwrap();

    let root = doc.root_element().unwrap();
    assert_eq!(root.name(), "People");
    assert_eq!(root.namespace().as_deref(), Some("urn:example:people"));

    let people = persons(&doc);
    assert_eq!(people.len(), 2);
    assert_eq!(people[0].attribute("Name").as_deref(), Some("John Doe"));
    assert_eq!(people[0].line(), Some(3));
    assert_eq!(people[0].child("Age").unwrap().text(), "42");
    assert!(people[0].attribute("Role").is_none());
}

#[test]
fn test_build_malformed_xml() {
    let error = build(MALFORMED_XML.as_bytes()).unwrap_err();

    assert!(error.is_processing());
    assert!(error.to_string().contains("line 2"));
}

#[test]
fn test_build_unbound_prefix_is_processing_failure() {
    let error = build(&b"<p:root xmlns:q=\"urn:q\"/>"[..]).unwrap_err();
    assert!(error.is_processing());
}

#[test]
fn test_build_with_resolver_materializes_defaults() {
    let fixtures = TestFixtures::new();
    let resolver = fixtures.resolver();

    let doc = build_with_resolver(
        fixtures.people_xml().as_slice(),
        &fixtures.person_xsd(),
        Some(&resolver),
    )
    .unwrap();

    let people = persons(&doc);
    assert_eq!(people[0].attribute("Role").as_deref(), Some("User"));
    assert_eq!(people[1].attribute("Role").as_deref(), Some("Admin"));
}

#[test]
fn test_build_with_schema_reports_violation() {
    let fixtures = TestFixtures::new();
    let resolver = fixtures.resolver();

    let error = build_with_resolver(
        fixtures.missing_name_xml().as_slice(),
        &fixtures.person_xsd(),
        Some(&resolver),
    )
    .unwrap_err();

    assert!(error.is_schema_violation());
    let violations = error.violations().unwrap();
    assert_eq!(violations.len(), 1);
    assert!(violations.messages()[0].contains("'Name'"));
}

#[test]
fn test_build_with_schema_without_resolver_fails_on_include() {
    let fixtures = TestFixtures::new();

    let error = build_with_schema(fixtures.people_xml().as_slice(), &fixtures.person_xsd())
        .unwrap_err();

    assert!(error.is_processing());
    assert!(!error.is_schema_violation());
}

#[test]
fn test_build_with_schema_self_contained() {
    let doc = build_with_schema(VALID_XML.as_bytes(), SIMPLE_XSD.as_bytes()).unwrap();
    assert_eq!(doc.root_element().unwrap().text(), "Hello World");

    let error = build_with_schema(INVALID_XML.as_bytes(), SIMPLE_XSD.as_bytes()).unwrap_err();
    assert!(error.is_schema_violation());
}

#[test]
fn test_builder_uses_configured_schema_dir() {
    let fixtures = TestFixtures::new();
    let mut config = Config::default();
    config.validation.schema_dir = Some(fixtures.xsd_dir());

    let builder = DocumentBuilder::with_config(config);
    let doc = builder
        .build_with_schema(fixtures.people_xml().as_slice(), &fixtures.person_xsd())
        .unwrap();

    assert_eq!(persons(&doc)[0].attribute("Role").as_deref(), Some("User"));
}

#[test]
fn test_builder_strips_blank_text() {
    let fixtures = TestFixtures::new();
    let builder = DocumentBuilder::new().parser_config(ParserConfig {
        strip_blank_text: true,
        ..ParserConfig::default()
    });

    let doc = builder.build(fixtures.people_xml().as_slice()).unwrap();
    let text = doc.to_xml_string(false).unwrap();
    assert!(text.contains("<People xmlns=\"urn:example:people\"><Person Name=\"John Doe\">"));
}

#[test]
fn test_serialization_round_trip() {
    let fixtures = TestFixtures::new();
    let doc = build(fixtures.people_xml().as_slice()).unwrap();

    let text = doc.to_xml_string(true).unwrap();
    let reparsed = build(text.as_bytes()).unwrap();

    assert_eq!(persons(&reparsed).len(), 2);
    assert_eq!(
        reparsed.root_element().unwrap().qualified_name(),
        doc.root_element().unwrap().qualified_name()
    );
}
