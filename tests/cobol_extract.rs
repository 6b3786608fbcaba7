use std::path::PathBuf;
use traceai::model::{EdgeKind, EntityKind, SourceKind};
use traceai::parsers::cobol::CobolParser;
use traceai::parsers::FormatParser;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn parsed() -> traceai::model::ParsedDocument {
    CobolParser::with_free_form(false)
        .parse(&fixture_path("mainframe/cust001.cbl"))
        .unwrap()
}

#[test]
fn program_id_names_the_document() {
    let parsed = parsed();
    assert_eq!(parsed.document.name, "CUST001");
    assert_eq!(
        parsed.document.custom.get("author").map(String::as_str),
        Some("M WILLIAMS")
    );
}

#[test]
fn paragraphs_become_components() {
    let parsed = parsed();
    let mut names: Vec<&str> = parsed.components.iter().map(|c| c.name.as_str()).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["0000-MAIN", "1000-READ-CUSTOMERS", "2000-WRITE-MASTER"]
    );
    assert!(parsed.components.iter().all(|c| c.component_type == "paragraph"));
}

#[test]
fn select_clauses_become_file_sources() {
    let parsed = parsed();
    let customer_file = parsed
        .data_sources
        .iter()
        .find(|s| s.name == "CUSTOMER-FILE")
        .unwrap();
    assert_eq!(customer_file.kind, SourceKind::File);
    assert_eq!(customer_file.locator, "CUSTIN");
    // WRITE CUSTMAST names a file never declared in FILE-CONTROL; the parser
    // synthesizes it so the document stays self-consistent.
    assert!(parsed.data_sources.iter().any(|s| s.name == "CUSTMAST"));
}

#[test]
fn working_storage_records_become_entities() {
    let parsed = parsed();
    let record = parsed
        .data_entities
        .iter()
        .find(|e| e.name == "CUSTOMER-RECORD")
        .unwrap();
    assert_eq!(record.entity_type, EntityKind::Record);
    assert_eq!(record.columns, vec!["CUST-ID", "CUST-NAME", "CUST-REGION"]);
}

#[test]
fn perform_links_paragraphs_and_call_defers() {
    let parsed = parsed();
    let doc_id = parsed.document.id.clone();
    let main_id = format!("{doc_id}/0000-MAIN");

    let intra_calls: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::Calls && d.deferred.is_none())
        .collect();
    assert_eq!(intra_calls.len(), 2);
    assert!(intra_calls.iter().all(|d| d.from_id == main_id));

    let deferred: Vec<_> = parsed
        .dependencies
        .iter()
        .filter_map(|d| d.deferred.as_ref())
        .collect();
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].name, "ACCT999");
}

#[test]
fn file_io_becomes_reads_and_writes() {
    let parsed = parsed();
    let doc_id = parsed.document.id.clone();

    let reads: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::ReadsFrom)
        .collect();
    assert!(reads
        .iter()
        .any(|d| d.from_id == format!("{doc_id}/1000-READ-CUSTOMERS")));

    let writes: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::WritesTo)
        .collect();
    // WRITE CUSTMAST plus the EXEC SQL UPDATE.
    assert!(writes.len() >= 2);
    assert!(writes
        .iter()
        .all(|d| d.from_id == format!("{doc_id}/2000-WRITE-MASTER")));
}

#[test]
fn exec_sql_is_scanned_with_confidence_flag() {
    let parsed = parsed();
    let summary = parsed
        .data_entities
        .iter()
        .find(|e| e.name == "CUSTOMER_SUMMARY")
        .unwrap();
    assert_eq!(summary.entity_type, EntityKind::Table);

    let sql_write = parsed
        .dependencies
        .iter()
        .find(|d| d.kind == EdgeKind::WritesTo && d.to_id == summary.id)
        .unwrap();
    assert_eq!(
        sql_write.properties.get("confidence").map(String::as_str),
        Some("best_effort")
    );
}

#[test]
fn comment_lines_are_ignored() {
    let parsed = parsed();
    // Column-7 comment mentions CUSTOMER MASTER EXTRACT; no paragraph or
    // entity may leak out of it.
    assert!(parsed.components.iter().all(|c| c.name != "MAINTAINS"));
}

#[test]
fn validate_sniffs_identification_division() {
    let parser = CobolParser::with_free_form(false);
    assert!(parser.validate(&fixture_path("mainframe/cust001.cbl")));
    assert!(!parser.validate(&fixture_path("mixed_tree/readme.txt")));
}
