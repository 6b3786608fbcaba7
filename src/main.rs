use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use traceai::error::Error;
use traceai::graph::query::Direction;
use traceai::graph::GraphBuilder;
use traceai::ingest::{CancellationToken, IngestCoordinator, IngestOptions};
use traceai::parsers::ParserRegistry;
use traceai::vector::{HashEmbedder, SqliteVectorIndex, VectorIndex};
use traceai::{cli, mcp, persist, tools};

fn main() {
    let args = cli::Args::parse();
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("traceai: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn state_dir(dir: &Path, persist_dir: Option<PathBuf>) -> PathBuf {
    persist_dir.unwrap_or_else(|| dir.join(".traceai"))
}

fn open_state(state: &Path) -> Result<(GraphBuilder, SqliteVectorIndex), Error> {
    let builder = persist::load(state)?;
    let vectors = SqliteVectorIndex::open(
        &state.join(persist::VECTOR_FILE),
        Arc::new(HashEmbedder::from_config()),
    )?;
    Ok((builder, vectors))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| Error::Internal(format!("encode output: {err}")))?;
    println!("{json}");
    Ok(())
}

fn run(args: cli::Args) -> Result<i32, Error> {
    match args.command {
        cli::Command::Ingest {
            dir,
            pattern,
            persist_dir,
            max_parsers,
        } => {
            let state = state_dir(&dir, persist_dir);
            let registry = ParserRegistry::with_default_parsers()?;
            let (builder, vectors) = open_state(&state)?;
            let mut options = IngestOptions {
                patterns: pattern,
                ..Default::default()
            };
            if let Some(workers) = max_parsers {
                options.max_concurrent_parsers = workers;
            }
            let coordinator = IngestCoordinator::new(&registry, &builder, &vectors);
            let report = coordinator.run(&dir, &options, &CancellationToken::new())?;
            persist::save(&builder.snapshot(), &state)?;
            print_json(&report)?;
            Ok(if report.has_failures() { 4 } else { 0 })
        }
        cli::Command::Stats { dir, persist_dir } => {
            let state = state_dir(&dir, persist_dir);
            let (builder, _vectors) = open_state(&state)?;
            print_json(&tools::graph_stats(&builder.snapshot()))?;
            Ok(0)
        }
        cli::Command::Trace {
            entity,
            direction,
            max_depth,
            dir,
            persist_dir,
        } => {
            let state = state_dir(&dir, persist_dir);
            let (builder, _vectors) = open_state(&state)?;
            let direction = Direction::parse(&direction)?;
            let result = traceai::graph::query::trace_lineage(
                &builder.snapshot(),
                &entity,
                direction,
                max_depth,
            )?;
            print_json(&result)?;
            Ok(0)
        }
        cli::Command::Impact {
            entity,
            dir,
            persist_dir,
        } => {
            let state = state_dir(&dir, persist_dir);
            let (builder, _vectors) = open_state(&state)?;
            let result = traceai::graph::query::analyze_impact(&builder.snapshot(), &entity)?;
            print_json(&result)?;
            Ok(0)
        }
        cli::Command::Search {
            text,
            k,
            dir,
            persist_dir,
        } => {
            let state = state_dir(&dir, persist_dir);
            let (builder, vectors) = open_state(&state)?;
            let params = tools::SemanticSearchParams {
                text,
                k,
                filter: None,
            };
            let result = tools::semantic_search(&builder.snapshot(), &vectors, &params)?;
            print_json(&result)?;
            Ok(0)
        }
        cli::Command::McpServe { dir, persist_dir } => {
            let state = state_dir(&dir, persist_dir);
            let (builder, vectors) = open_state(&state)?;
            let vectors: &dyn VectorIndex = &vectors;
            mcp::serve(&builder, vectors)
                .map_err(|err| Error::Internal(format!("mcp serve: {err}")))?;
            Ok(0)
        }
    }
}
