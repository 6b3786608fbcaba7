use std::path::PathBuf;
use traceai::model::{EdgeKind, SourceKind};
use traceai::parsers::ssis::SsisParser;
use traceai::parsers::FormatParser;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn parses_package_metadata() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();

    let doc = &parsed.document;
    assert_eq!(doc.name, "SalesETL");
    assert_eq!(doc.custom.get("creator").map(String::as_str), Some("dataops"));
    assert_eq!(doc.custom.get("version").map(String::as_str), Some("8.2"));
    assert_eq!(
        doc.custom.get("description").map(String::as_str),
        Some("Nightly sales warehouse load")
    );
    assert!(parsed.warnings.is_empty());
}

#[test]
fn extracts_tasks_as_components() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();

    let mut names: Vec<&str> = parsed.components.iter().map(|c| c.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["AggregateSales", "ExtractCustomers", "MergeToWarehouse"]);

    let extract = parsed
        .components
        .iter()
        .find(|c| c.name == "ExtractCustomers")
        .unwrap();
    assert_eq!(extract.component_type, "Microsoft.ExecuteSQLTask");
    assert_eq!(extract.description.as_deref(), Some("Pull the customer dimension"));
    assert!(extract.source_excerpt.as_deref().unwrap().contains("FROM Customer"));
}

#[test]
fn extracts_connection_managers_as_data_sources() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();

    assert_eq!(parsed.data_sources.len(), 2);
    let warehouse = parsed
        .data_sources
        .iter()
        .find(|s| s.name == "WarehouseDB")
        .unwrap();
    assert_eq!(warehouse.kind, SourceKind::Db);
    assert!(warehouse.locator.contains("Data Source=SQL01"));
    assert_eq!(warehouse.properties.get("server").map(String::as_str), Some("SQL01"));
    assert_eq!(
        warehouse.properties.get("database").map(String::as_str),
        Some("Warehouse")
    );

    let landing = parsed
        .data_sources
        .iter()
        .find(|s| s.name == "LandingZone")
        .unwrap();
    assert_eq!(landing.kind, SourceKind::File);
}

#[test]
fn extracts_variables_as_parameters() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();

    assert_eq!(parsed.parameters.len(), 2);
    let batch_date = parsed.parameters.iter().find(|p| p.name == "BatchDate").unwrap();
    assert_eq!(batch_date.value.as_deref(), Some("2019-04-02"));
    assert_eq!(batch_date.data_type.as_deref(), Some("DateTime"));
    assert_eq!(
        batch_date.properties.get("namespace").map(String::as_str),
        Some("User")
    );
}

#[test]
fn precedence_constraints_become_precedes_edges() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();
    let doc_id = parsed.document.id.clone();

    let precedes: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::Precedes)
        .collect();
    assert_eq!(precedes.len(), 2);

    let first = precedes
        .iter()
        .find(|d| d.from_id == format!("{doc_id}/ExtractCustomers"))
        .unwrap();
    assert_eq!(first.to_id, format!("{doc_id}/MergeToWarehouse"));
    assert_eq!(first.properties.get("condition").map(String::as_str), Some("success"));

    let second = precedes
        .iter()
        .find(|d| d.from_id == format!("{doc_id}/MergeToWarehouse"))
        .unwrap();
    assert_eq!(
        second.properties.get("condition").map(String::as_str),
        Some("completion")
    );
    assert!(second.properties.contains_key("expression"));
}

#[test]
fn sql_statements_yield_best_effort_lineage() {
    let parser = SsisParser::new();
    let parsed = parser.parse(&fixture_path("ssis_sales/sales_etl.dtsx")).unwrap();
    let doc_id = parsed.document.id.clone();

    let mut entity_names: Vec<&str> = parsed.data_entities.iter().map(|e| e.name.as_str()).collect();
    entity_names.sort();
    assert_eq!(entity_names, vec!["Customer", "Sales", "Staging_Customer"]);

    let reads: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::ReadsFrom)
        .collect();
    let writes: Vec<_> = parsed
        .dependencies
        .iter()
        .filter(|d| d.kind == EdgeKind::WritesTo)
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].from_id, format!("{doc_id}/MergeToWarehouse"));
    assert!(reads.len() >= 3);
    for dep in reads.iter().chain(writes.iter()) {
        assert_eq!(
            dep.properties.get("confidence").map(String::as_str),
            Some("best_effort")
        );
    }
}

#[test]
fn validate_sniffs_dts_namespace() {
    let parser = SsisParser::new();
    assert!(parser.validate(&fixture_path("ssis_sales/sales_etl.dtsx")));
    assert!(!parser.validate(&fixture_path("mixed_tree/readme.txt")));
}

#[test]
fn parse_is_deterministic() {
    let parser = SsisParser::new();
    let fixture = fixture_path("ssis_sales/sales_etl.dtsx");
    let a = parser.parse(&fixture).unwrap();
    let b = parser.parse(&fixture).unwrap();
    assert_eq!(a.document.id, b.document.id);
    assert_eq!(a.document.content_hash, b.document.content_hash);
    assert_eq!(
        serde_json::to_string(&a.components).unwrap(),
        serde_json::to_string(&b.components).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&a.dependencies).unwrap(),
        serde_json::to_string(&b.dependencies).unwrap()
    );
}

#[test]
fn malformed_xml_is_rejected() {
    let parser = SsisParser::new();
    let err = parser
        .parse(&fixture_path("mixed_tree/broken_package.dtsx"))
        .unwrap_err();
    assert_eq!(err.kind(), "malformed_input");
}
