//! Vector index over node text surfaces.
//!
//! The embedder is pluggable: the default is a local hash-TF embedder that
//! needs no model download; `fastembed` sits behind the `semantic-search`
//! feature. Stores are interchangeable behind `VectorIndex`: an in-memory
//! map for ephemeral runs and a sqlite-backed store (single write connection
//! plus a pooled read side) when `persist_dir` is configured. The index is
//! authoritative only for discovery and is rebuildable from the graph.

use crate::config::Config;
use crate::error::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Local term-frequency hash embedder. Deterministic, dependency-free, and
/// good enough for name/locator discovery; swap in FastEmbed for semantics.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        HashEmbedder { dimensions }
    }

    pub fn from_config() -> Self {
        HashEmbedder::new(Config::get().embed_dimensions)
    }
}

fn term_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }
        for (term, count) in &tf {
            let idx = term_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

/// FastEmbed embedder, local ONNX models.
#[cfg(feature = "semantic-search")]
pub struct FastEmbedder {
    model: Mutex<fastembed::TextEmbedding>,
    dims: usize,
}

#[cfg(feature = "semantic-search")]
impl FastEmbedder {
    pub fn new() -> Result<Self> {
        use fastembed::{InitOptions, TextEmbedding};
        let model = TextEmbedding::try_new(InitOptions::default())
            .map_err(|err| Error::Internal(format!("fastembed init: {err}")))?;
        let probe = model
            .embed(vec!["probe"], None)
            .map_err(|err| Error::Internal(format!("fastembed probe: {err}")))?;
        let dims = probe.first().map(|v| v.len()).unwrap_or(384);
        Ok(FastEmbedder {
            model: Mutex::new(model),
            dims,
        })
    }
}

#[cfg(feature = "semantic-search")]
impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut model = self.model.lock().unwrap_or_else(|p| p.into_inner());
        match model.embed(vec![text], None) {
            Ok(embeddings) => embeddings
                .into_iter()
                .next()
                .unwrap_or_else(|| vec![0.0; self.dims]),
            Err(err) => {
                eprintln!("traceai: fastembed error: {err}, returning zero vector");
                vec![0.0; self.dims]
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

pub trait VectorIndex: Send + Sync {
    /// Idempotent by id; replaces any prior vector.
    fn upsert(&self, id: &str, text: &str, metadata: BTreeMap<String, String>) -> Result<()>;

    fn delete(&self, id: &str) -> Result<bool>;

    /// Cosine top-k, score monotone decreasing, ties broken by id. The
    /// filter is a metadata-equality predicate over all given keys.
    fn similarity_search(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<SearchMatch>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn matches_filter(
    metadata: &BTreeMap<String, String>,
    filter: Option<&BTreeMap<String, String>>,
) -> bool {
    match filter {
        Some(wanted) => wanted
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value)),
        None => true,
    }
}

fn top_k(mut scored: Vec<SearchMatch>, k: usize) -> Vec<SearchMatch> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(k);
    scored
}

struct StoredVector {
    vector: Vec<f32>,
    metadata: BTreeMap<String, String>,
}

/// Ephemeral store used when no persist dir is configured and in tests.
pub struct MemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: Mutex<BTreeMap<String, StoredVector>>,
}

impl MemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        MemoryVectorIndex {
            embedder,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_default_embedder() -> Self {
        MemoryVectorIndex::new(Arc::new(HashEmbedder::from_config()))
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn upsert(&self, id: &str, text: &str, metadata: BTreeMap<String, String>) -> Result<()> {
        let vector = self.embedder.embed(text);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(id.to_string(), StoredVector { vector, metadata });
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.remove(id).is_some())
    }

    fn similarity_search(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<SearchMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text);
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let scored: Vec<SearchMatch> = entries
            .iter()
            .filter(|(_, stored)| matches_filter(&stored.metadata, filter))
            .map(|(id, stored)| SearchMatch {
                id: id.clone(),
                score: dot(&query, &stored.vector),
                metadata: stored.metadata.clone(),
            })
            .collect();
        Ok(top_k(scored, k))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap_or_else(|p| p.into_inner()).len())
    }
}

/// Vectors are L2-normalized at embed time, so dot product is cosine.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Persistent store: one sqlite file under `persist_dir`, WAL mode, single
/// write connection behind a mutex plus a pooled read side. Upserts keyed
/// by graph node id round-trip across restarts.
pub struct SqliteVectorIndex {
    embedder: Arc<dyn Embedder>,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

const VECTOR_SCHEMA_VERSION: i32 = 1;

impl SqliteVectorIndex {
    pub fn open(db_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::Internal(format!("create {}: {err}", parent.display())))?;
        }
        let write_conn = Connection::open(db_path)
            .map_err(|err| Error::Internal(format!("open {}: {err}", db_path.display())))?;
        write_conn
            .busy_timeout(Duration::from_secs(30))
            .map_err(internal)?;
        write_conn
            .execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )
            .map_err(internal)?;
        migrate(&write_conn)?;

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(Config::get().pool_size)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(|err| Error::Internal(format!("vector read pool: {err}")))?;

        Ok(SqliteVectorIndex {
            embedder,
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(internal)?;
    if version < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            ",
        )
        .map_err(internal)?;
    }
    if version != VECTOR_SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", VECTOR_SCHEMA_VERSION)
            .map_err(internal)?;
    }
    Ok(())
}

fn internal(err: rusqlite::Error) -> Error {
    Error::Internal(format!("vector store: {err}"))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&self, id: &str, text: &str, metadata: BTreeMap<String, String>) -> Result<()> {
        let vector = self.embedder.embed(text);
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|err| Error::Internal(format!("metadata encode: {err}")))?;
        let conn = self.write_conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO vectors (id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET text = ?2, metadata = ?3, embedding = ?4",
            params![id, text, metadata_json, encode_vector(&vector)],
        )
        .map_err(internal)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap_or_else(|p| p.into_inner());
        let affected = conn
            .execute("DELETE FROM vectors WHERE id = ?1", params![id])
            .map_err(internal)?;
        Ok(affected > 0)
    }

    fn similarity_search(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<SearchMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text);
        let conn = self
            .read_pool
            .get()
            .map_err(|err| Error::Internal(format!("vector read conn: {err}")))?;
        let mut stmt = conn
            .prepare("SELECT id, metadata, embedding FROM vectors")
            .map_err(internal)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let metadata: String = row.get(1)?;
                let embedding: Vec<u8> = row.get(2)?;
                Ok((id, metadata, embedding))
            })
            .map_err(internal)?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, metadata_json, embedding) = row.map_err(internal)?;
            let metadata: BTreeMap<String, String> =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            if !matches_filter(&metadata, filter) {
                continue;
            }
            scored.push(SearchMatch {
                id,
                score: dot(&query, &decode_vector(&embedding)),
                metadata,
            });
        }
        Ok(top_k(scored, k))
    }

    fn len(&self) -> Result<usize> {
        let conn = self
            .read_pool
            .get()
            .map_err(|err| Error::Internal(format!("vector read conn: {err}")))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
            .optional()
            .map_err(internal)?
            .unwrap_or(0);
        Ok(count as usize)
    }
}
