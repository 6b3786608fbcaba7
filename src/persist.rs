//! Graph snapshot persistence.
//!
//! One versioned JSON artifact under `persist_dir`: a small metadata header
//! (`schema_version`, `created_at`, `document_hashes`) plus the full node
//! and edge sets. Readers accept any schema version up to the current one.

use crate::error::{Error, Result};
use crate::graph::{GraphBuilder, GraphSnapshot};
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;
pub const GRAPH_FILE: &str = "graph.json";
pub const VECTOR_FILE: &str = "vectors.sqlite";

#[derive(Debug, Serialize, Deserialize)]
struct GraphDump {
    schema_version: u32,
    created_at: i64,
    document_hashes: BTreeMap<String, String>,
    graph: GraphSnapshot,
}

pub fn save(snapshot: &GraphSnapshot, persist_dir: &Path) -> Result<()> {
    let path = persist_dir.join(GRAPH_FILE);
    util::ensure_parent_dir(&path)
        .map_err(|err| Error::Internal(format!("prepare {}: {err}", path.display())))?;
    let dump = GraphDump {
        schema_version: SCHEMA_VERSION,
        created_at: util::unix_now(),
        document_hashes: snapshot.document_hashes().clone(),
        graph: snapshot.clone(),
    };
    let json = serde_json::to_string(&dump)
        .map_err(|err| Error::Internal(format!("encode graph dump: {err}")))?;
    std::fs::write(&path, json)
        .map_err(|err| Error::Internal(format!("write {}: {err}", path.display())))?;
    Ok(())
}

pub fn load(persist_dir: &Path) -> Result<GraphBuilder> {
    let path = persist_dir.join(GRAPH_FILE);
    if !path.exists() {
        return Ok(GraphBuilder::new());
    }
    let json = std::fs::read_to_string(&path)
        .map_err(|err| Error::Internal(format!("read {}: {err}", path.display())))?;
    let dump: GraphDump = serde_json::from_str(&json).map_err(|err| {
        Error::malformed(path.display().to_string(), format!("graph dump: {err}"))
    })?;
    if dump.schema_version > SCHEMA_VERSION {
        return Err(Error::malformed(
            path.display().to_string(),
            format!(
                "graph dump schema {} is newer than supported {}",
                dump.schema_version, SCHEMA_VERSION
            ),
        ));
    }
    Ok(GraphBuilder::from_snapshot(dump.graph))
}

pub fn exists(persist_dir: &Path) -> bool {
    persist_dir.join(GRAPH_FILE).exists()
}
