use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use traceai::graph::GraphBuilder;
use traceai::ingest::{CancellationToken, IngestCoordinator, IngestOptions};
use traceai::parsers::ParserRegistry;
use traceai::tools;
use traceai::vector::MemoryVectorIndex;

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn temp_tree(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.push(format!("traceai-tools-{label}-{nanos}-{counter}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}

struct Engine {
    registry: ParserRegistry,
    builder: GraphBuilder,
    vectors: MemoryVectorIndex,
    root: PathBuf,
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

impl Engine {
    fn ingested(fixture: &str) -> Self {
        let root = temp_tree(fixture);
        copy_dir(&fixture_path(fixture), &root);
        let engine = Engine {
            registry: ParserRegistry::with_default_parsers().unwrap(),
            builder: GraphBuilder::new(),
            vectors: MemoryVectorIndex::with_default_embedder(),
            root,
        };
        let coordinator =
            IngestCoordinator::new(&engine.registry, &engine.builder, &engine.vectors);
        coordinator
            .run(&engine.root, &IngestOptions::default(), &CancellationToken::new())
            .unwrap();
        engine
    }
}

#[test]
fn graph_query_filters_by_kind_and_substring() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();

    let params = tools::GraphQueryParams {
        kind: Some("component".to_string()),
        name_substring: Some("customers".to_string()),
        limit: 10,
    };
    let result = tools::graph_query(&snapshot, &params).unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.nodes[0].name, "ExtractCustomers");
}

#[test]
fn graph_query_rejects_unknown_kind() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();
    let params = tools::GraphQueryParams {
        kind: Some("tables".to_string()),
        name_substring: None,
        limit: 10,
    };
    let err = tools::graph_query(&snapshot, &params).unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn dispatch_validates_direction() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();
    let err = tools::dispatch(
        &snapshot,
        &engine.vectors,
        "trace_lineage",
        serde_json::json!({ "entity_name": "Customer", "direction": "sideways" }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn dispatch_rejects_unknown_tool_and_fields() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();
    let err = tools::dispatch(&snapshot, &engine.vectors, "run_pipeline", serde_json::json!({}))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    let err = tools::dispatch(
        &snapshot,
        &engine.vectors,
        "analyze_impact",
        serde_json::json!({ "entity_name": "Customer", "surprise": 1 }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn graph_stats_counts_by_kind() {
    let engine = Engine::ingested("ssis_sales");
    let stats = tools::graph_stats(&engine.builder.snapshot());
    assert!(stats.nodes > 0);
    assert_eq!(stats.by_document_type.get("ssis").copied(), Some(1));
    assert_eq!(stats.by_node_kind.get("component").copied(), Some(3));
}

// Every id returned by semantic_search resolves through the graph.
#[test]
fn semantic_search_is_consistent_with_the_graph() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();

    let params = tools::SemanticSearchParams {
        text: "customer data".to_string(),
        k: 10,
        filter: None,
    };
    let result = tools::semantic_search(&snapshot, &engine.vectors, &params).unwrap();
    assert!(!result.matches.is_empty());
    for m in &result.matches {
        assert!(snapshot.contains_node(&m.id), "dangling id {}", m.id);
    }
}

// Removing a document never leaves its exclusive ids reachable via search.
#[test]
fn removed_documents_disappear_from_search() {
    let engine = Engine::ingested("mainframe");
    let coordinator = IngestCoordinator::new(&engine.registry, &engine.builder, &engine.vectors);

    let cobol_doc = engine
        .builder
        .snapshot()
        .documents_by_name("CUST001")
        .first()
        .cloned()
        .unwrap();
    assert!(coordinator.remove_document(&cobol_doc));
    assert!(!coordinator.remove_document(&cobol_doc));

    let snapshot = engine.builder.snapshot();
    let params = tools::SemanticSearchParams {
        text: "customer master".to_string(),
        k: 50,
        filter: None,
    };
    let result = tools::semantic_search(&snapshot, &engine.vectors, &params).unwrap();
    for m in &result.matches {
        assert!(snapshot.contains_node(&m.id));
        assert!(!m.id.starts_with(&cobol_doc));
    }
}

#[test]
fn semantic_search_filter_narrows_by_node_kind() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();

    let mut filter = std::collections::BTreeMap::new();
    filter.insert("node_kind".to_string(), "component".to_string());
    let params = tools::SemanticSearchParams {
        text: "customers".to_string(),
        k: 10,
        filter: Some(filter),
    };
    let result = tools::semantic_search(&snapshot, &engine.vectors, &params).unwrap();
    assert!(!result.matches.is_empty());
    for m in &result.matches {
        assert_eq!(
            m.metadata.get("node_kind").map(String::as_str),
            Some("component")
        );
    }
}

#[test]
fn find_dependencies_walks_precedes_closure() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();
    let doc_id = snapshot
        .documents_by_name("SalesETL")
        .first()
        .cloned()
        .unwrap();

    let params = tools::FindDependenciesParams {
        component_id: format!("{doc_id}/ExtractCustomers"),
        direction: "downstream".to_string(),
        max_depth: 8,
    };
    let result = tools::find_dependencies(&snapshot, &params).unwrap();
    let names: Vec<&str> = result
        .dependencies
        .iter()
        .map(|hop| hop.node.name.as_str())
        .collect();
    assert_eq!(names, vec!["MergeToWarehouse", "AggregateSales"]);
    assert_eq!(result.dependencies[0].depth, 1);
    assert_eq!(result.dependencies[1].depth, 2);
}

#[test]
fn unknown_component_is_a_typed_error() {
    let engine = Engine::ingested("ssis_sales");
    let snapshot = engine.builder.snapshot();
    let params = tools::FindDependenciesParams {
        component_id: "doc_missing/Task".to_string(),
        direction: "downstream".to_string(),
        max_depth: 8,
    };
    let err = tools::find_dependencies(&snapshot, &params).unwrap_err();
    assert_eq!(err.kind(), "unknown_entity");
}
