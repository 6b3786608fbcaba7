use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use traceai::graph::{query, GraphBuilder};
use traceai::ingest::{CancellationToken, IngestCoordinator, IngestOptions};
use traceai::parsers::ParserRegistry;
use traceai::vector::{MemoryVectorIndex, VectorIndex};

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
    dir.push(format!("traceai-ingest-{label}-{nanos}-{counter}"));
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

struct TempTree {
    root: PathBuf,
}

impl TempTree {
    fn new(fixture: &str) -> Self {
        let root = temp_tree(fixture);
        copy_dir(&fixture_path(fixture), &root);
        TempTree { root }
    }

    fn empty(label: &str) -> Self {
        TempTree {
            root: temp_tree(label),
        }
    }
}

impl Drop for TempTree {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

struct Engine {
    registry: ParserRegistry,
    builder: GraphBuilder,
    vectors: MemoryVectorIndex,
}

impl Engine {
    fn new() -> Self {
        Engine {
            registry: ParserRegistry::with_default_parsers().unwrap(),
            builder: GraphBuilder::new(),
            vectors: MemoryVectorIndex::with_default_embedder(),
        }
    }

    fn run(&self, root: &Path) -> traceai::model::IngestReport {
        let coordinator = IngestCoordinator::new(&self.registry, &self.builder, &self.vectors);
        coordinator
            .run(root, &IngestOptions::default(), &CancellationToken::new())
            .unwrap()
    }
}

#[test]
fn empty_tree_yields_empty_report_and_graph() {
    let tree = TempTree::empty("empty");
    let engine = Engine::new();
    let report = engine.run(&tree.root);

    assert_eq!(report.discovered, 0);
    assert_eq!(report.added, 0);
    assert_eq!(report.failures.len(), 0);
    assert_eq!(query::stats(&engine.builder.snapshot()).nodes, 0);
}

// Re-running ingestion on an unchanged tree performs no writes.
#[test]
fn reingest_of_unchanged_tree_is_a_noop() {
    let tree = TempTree::new("mainframe");
    let engine = Engine::new();

    let first = engine.run(&tree.root);
    assert_eq!(first.added, 2);
    assert_eq!(first.updated, 0);
    let stats_before = query::stats(&engine.builder.snapshot());
    let vectors_before = engine.vectors.len().unwrap();

    let second = engine.run(&tree.root);
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 2);

    let stats_after = query::stats(&engine.builder.snapshot());
    assert_eq!(stats_before.nodes, stats_after.nodes);
    assert_eq!(stats_before.edges, stats_after.edges);
    assert_eq!(engine.vectors.len().unwrap(), vectors_before);
}

// Two malformed packages in a tree of seven files: the run completes, the
// failures are listed with paths and kinds, everything else is queryable.
#[test]
fn partial_ingest_reports_failures_and_commits_the_rest() {
    let tree = TempTree::new("mixed_tree");
    let engine = Engine::new();
    let report = engine.run(&tree.root);

    assert_eq!(report.failures.len(), 2);
    let mut failed_paths: Vec<&str> = report.failures.iter().map(|f| f.path.as_str()).collect();
    failed_paths.sort();
    assert!(failed_paths[0].ends_with("broken_package.dtsx"));
    assert!(failed_paths[1].ends_with("truncated_package.dtsx"));
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == "malformed_input"));

    // readme.txt has no parser.
    assert_eq!(report.skipped_unsupported, 1);
    assert_eq!(report.added, 4);

    let snapshot = engine.builder.snapshot();
    assert!(query::analyze_impact(&snapshot, "Orders").is_ok());
    assert!(!snapshot.documents_by_name("OrdersETL").is_empty());
}

#[test]
fn modified_file_is_replaced_not_duplicated() {
    let tree = TempTree::new("mainframe");
    let engine = Engine::new();
    engine.run(&tree.root);
    let nodes_before = query::stats(&engine.builder.snapshot()).nodes;

    // Append a new step to the JCL job.
    let jcl = tree.root.join("nightly.jcl");
    let mut content = std::fs::read_to_string(&jcl).unwrap();
    content.push_str("//STEP3    EXEC PGM=ARCH001\n//ARCIN    DD DSN=CUSTMAST,DISP=SHR\n");
    std::fs::write(&jcl, content).unwrap();

    let report = engine.run(&tree.root);
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);

    let snapshot = engine.builder.snapshot();
    // One more component; the old job document is gone.
    assert_eq!(query::stats(&snapshot).nodes, nodes_before + 1);
    assert_eq!(snapshot.documents_by_name("NIGHTLY").len(), 1);
}

#[test]
fn glob_patterns_restrict_the_run() {
    let tree = TempTree::new("mixed_tree");
    let engine = Engine::new();
    let coordinator = IngestCoordinator::new(&engine.registry, &engine.builder, &engine.vectors);
    let options = IngestOptions {
        patterns: vec!["*.jcl".to_string()],
        ..Default::default()
    };
    let report = coordinator
        .run(&tree.root, &options, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.discovered, 1);
    assert_eq!(report.added, 1);
    assert_eq!(report.failures.len(), 0);
}

#[test]
fn invalid_glob_is_rejected() {
    let tree = TempTree::empty("badglob");
    let engine = Engine::new();
    let coordinator = IngestCoordinator::new(&engine.registry, &engine.builder, &engine.vectors);
    let options = IngestOptions {
        patterns: vec!["[".to_string()],
        ..Default::default()
    };
    let err = coordinator
        .run(&tree.root, &options, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn cancelled_run_reports_cancelled() {
    let tree = TempTree::new("mixed_tree");
    let engine = Engine::new();
    let coordinator = IngestCoordinator::new(&engine.registry, &engine.builder, &engine.vectors);
    let token = CancellationToken::new();
    token.cancel();
    let report = coordinator
        .run(&tree.root, &IngestOptions::default(), &token)
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.parsed, 0);
}

#[test]
fn unresolved_program_calls_are_surfaced() {
    let tree = TempTree::new("mainframe");
    let engine = Engine::new();
    let report = engine.run(&tree.root);

    // STEP2 runs RPT100 and the COBOL program calls ACCT999; neither
    // document exists in the tree.
    let mut names: Vec<&str> = report
        .unresolved_refs
        .iter()
        .map(|r| r.target_name.as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["ACCT999", "RPT100"]);
}

#[test]
fn vector_index_tracks_graph_nodes() {
    let tree = TempTree::new("mainframe");
    let engine = Engine::new();
    engine.run(&tree.root);

    let snapshot = engine.builder.snapshot();
    assert_eq!(engine.vectors.len().unwrap(), query::stats(&snapshot).nodes);
}
