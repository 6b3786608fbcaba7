use std::path::PathBuf;
use traceai::model::{EdgeKind, SourceKind};
use traceai::parsers::jcl::JclParser;
use traceai::parsers::FormatParser;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn parsed() -> traceai::model::ParsedDocument {
    JclParser::new()
        .parse(&fixture_path("mainframe/nightly.jcl"))
        .unwrap()
}

#[test]
fn job_card_names_the_document() {
    let parsed = parsed();
    assert_eq!(parsed.document.name, "NIGHTLY");
}

#[test]
fn exec_statements_become_steps() {
    let parsed = parsed();
    let names: Vec<&str> = parsed.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["STEP1", "STEP2"]);
    let step1 = &parsed.components[0];
    assert_eq!(step1.component_type, "step");
    assert_eq!(step1.properties.get("program").map(String::as_str), Some("CUST001"));
}

#[test]
fn sequential_steps_induce_precedes() {
    let parsed = parsed();
    let doc_id = parsed.document.id.clone();
    let precedes: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::Precedes)
        .collect();
    assert_eq!(precedes.len(), 1);
    assert_eq!(precedes[0].from_id, format!("{doc_id}/STEP1"));
    assert_eq!(precedes[0].to_id, format!("{doc_id}/STEP2"));
}

#[test]
fn dd_disp_classifies_reads_and_writes() {
    let parsed = parsed();
    let doc_id = parsed.document.id.clone();
    let step1 = format!("{doc_id}/STEP1");

    let custmast = parsed
        .data_sources
        .iter()
        .find(|s| s.name == "CUSTMAST")
        .unwrap();
    assert_eq!(custmast.kind, SourceKind::Dataset);

    let step1_writes: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::WritesTo && d.from_id == step1)
        .collect();
    assert_eq!(step1_writes.len(), 1);
    assert_eq!(step1_writes[0].to_id, custmast.id);
    assert_eq!(step1_writes[0].properties.get("dd").map(String::as_str), Some("CUSTOUT"));

    let input = parsed
        .data_sources
        .iter()
        .find(|s| s.name == "CUSTOMER.INPUT.MASTER")
        .unwrap();
    assert!(parsed
        .dependencies
        .iter()
        .any(|d| d.kind == EdgeKind::ReadsFrom && d.from_id == step1 && d.to_id == input.id));

    // STEP2 reads CUSTMAST back.
    assert!(parsed.dependencies.iter().any(|d| {
        d.kind == EdgeKind::ReadsFrom && d.from_id == format!("{doc_id}/STEP2") && d.to_id == custmast.id
    }));
}

#[test]
fn exec_pgm_defers_a_call_per_step() {
    let parsed = parsed();
    let deferred: Vec<&str> = parsed
        .dependencies
        .iter()
        .filter_map(|d| d.deferred.as_ref())
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(deferred, vec!["CUST001", "RPT100"]);
}

#[test]
fn validate_requires_jcl_card_prefix() {
    let parser = JclParser::new();
    assert!(parser.validate(&fixture_path("mainframe/nightly.jcl")));
    assert!(!parser.validate(&fixture_path("mixed_tree/readme.txt")));
}
