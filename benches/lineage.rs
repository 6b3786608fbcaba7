use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::{Path, PathBuf};
use traceai::graph::query::{self, Direction};
use traceai::graph::GraphBuilder;
use traceai::ingest::{CancellationToken, IngestCoordinator, IngestOptions};
use traceai::parsers::ParserRegistry;
use traceai::vector::MemoryVectorIndex;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
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

fn setup_graph() -> GraphBuilder {
    let root = std::env::temp_dir().join(format!(
        "traceai-bench-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    copy_dir(&fixture_path("mainframe"), &root);
    copy_dir(&fixture_path("ssis_sales"), &root);
    copy_dir(&fixture_path("lineage_maps"), &root);

    let registry = ParserRegistry::with_default_parsers().unwrap();
    let builder = GraphBuilder::new();
    let vectors = MemoryVectorIndex::with_default_embedder();
    let coordinator = IngestCoordinator::new(&registry, &builder, &vectors);
    let report = coordinator
        .run(&root, &IngestOptions::default(), &CancellationToken::new())
        .unwrap();
    eprintln!(
        "indexed {} documents, {} nodes",
        report.added,
        query::stats(&builder.snapshot()).nodes
    );
    let _ = std::fs::remove_dir_all(&root);
    builder
}

fn bench_lineage(c: &mut Criterion) {
    let builder = setup_graph();
    let snapshot = builder.snapshot();

    c.bench_function("trace_lineage_custmast_both", |b| {
        b.iter(|| {
            let result = query::trace_lineage(
                black_box(&snapshot),
                black_box("CUSTMAST"),
                Direction::Both,
                8,
            )
            .unwrap();
            black_box(result)
        })
    });

    c.bench_function("analyze_impact_customer", |b| {
        b.iter(|| {
            let result = query::analyze_impact(black_box(&snapshot), black_box("Customer")).unwrap();
            black_box(result)
        })
    });
}

criterion_group!(benches, bench_lineage);
criterion_main!(benches);
