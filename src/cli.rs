use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "traceai",
    version,
    about = "ETL lineage, impact and discovery over heterogeneous pipeline artifacts",
    after_help = r#"Examples:
  traceai ingest ./etl --pattern '**/*.dtsx' --pattern '**/*.cbl'
  traceai stats --dir ./etl
  traceai trace CUSTMAST --dir ./etl --direction upstream
  traceai impact Customer --dir ./etl
  traceai search "jobs touching customer data" --dir ./etl -k 5
  traceai mcp-serve --dir ./etl
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a tree of pipeline artifacts into the knowledge graph.
    Ingest {
        dir: PathBuf,
        /// Glob pattern(s) relative to the root; repeatable.
        #[arg(long)]
        pattern: Vec<String>,
        /// State directory (default: <dir>/.traceai).
        #[arg(long)]
        persist_dir: Option<PathBuf>,
        /// Parser worker pool size.
        #[arg(long)]
        max_parsers: Option<usize>,
    },
    /// Print graph statistics.
    Stats {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        persist_dir: Option<PathBuf>,
    },
    /// Trace data lineage for a named entity.
    Trace {
        entity: String,
        #[arg(long, default_value = "both")]
        direction: String,
        #[arg(long, default_value_t = 8)]
        max_depth: usize,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        persist_dir: Option<PathBuf>,
    },
    /// List components reading/writing a named entity.
    Impact {
        entity: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        persist_dir: Option<PathBuf>,
    },
    /// Semantic search over the vector index.
    Search {
        text: String,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        persist_dir: Option<PathBuf>,
    },
    /// Serve the tool surface over MCP stdio.
    McpServe {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        persist_dir: Option<PathBuf>,
    },
}
