mod common;

use common::test_helpers::*;
use rayon::prelude::*;
use xsd_dom::{DirectoryResolver, MemoryResolver, build, validate_document_with, validate_stream_with};

#[test]
fn test_concurrent_calls_do_not_share_state() {
    let fixtures = TestFixtures::new();
    let xsd = fixtures.person_xsd();
    let valid = fixtures.people_xml();
    let invalid = fixtures.two_violations_xml();
    let schema_dir = fixtures.xsd_dir();

    let outcomes: Vec<(usize, Option<usize>)> = (0..32usize)
        .into_par_iter()
        .map(|i| {
            let resolver = DirectoryResolver::new(&schema_dir);
            let xml = if i % 2 == 0 { &valid } else { &invalid };
            let result = validate_stream_with(xml.as_slice(), &xsd, Some(&resolver));
            (i, result.err().map(|e| e.violations().map_or(0, |v| v.len())))
        })
        .collect();

    for (i, outcome) in outcomes {
        if i % 2 == 0 {
            assert_eq!(outcome, None, "call {} should be valid", i);
        } else {
            assert_eq!(outcome, Some(2), "call {} should report two violations", i);
        }
    }
}

#[test]
fn test_concurrent_resolvers_stay_thread_scoped() {
    let fixtures = TestFixtures::new();
    let xsd = fixtures.person_xsd();
    let common = fixtures.common_xsd();

    let results: Vec<bool> = (0..16usize)
        .into_par_iter()
        .map(|i| {
            let doc = build(fixtures.people_xml().as_slice()).unwrap();
            // Every other call brings an empty resolver and must not see its neighbour's
            let resolver = if i % 2 == 0 {
                MemoryResolver::new().with_schema("Common.xsd", common.clone())
            } else {
                MemoryResolver::new()
            };
            validate_document_with(&doc, &xsd, Some(&resolver)).is_ok()
        })
        .collect();

    for (i, ok) in results.into_iter().enumerate() {
        assert_eq!(ok, i % 2 == 0, "call {}", i);
    }
}
