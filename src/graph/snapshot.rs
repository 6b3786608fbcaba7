//! Immutable graph state.
//!
//! A `GraphSnapshot` is the unit readers see: the builder clones the current
//! snapshot, mutates the clone, rebuilds the derived indexes and swaps the
//! `Arc`. A query holding a snapshot can never observe a partially applied
//! commit.

use crate::ident;
use crate::model::{DocumentKind, Edge, EdgeKind, GraphStats, Node, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Edge keys embed the owning document so that unloading a document removes
/// exactly the edges it contributed, even entity-to-entity ones.
pub(crate) fn edge_key(owner: &str, edge: &Edge) -> String {
    format!(
        "{owner}\x00{}\x00{}\x00{}",
        edge.from_id,
        edge.kind.as_str(),
        edge.to_id
    )
}

pub(crate) fn edge_owner(key: &str) -> &str {
    key.split('\x00').next().unwrap_or("")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) edges: BTreeMap<String, Edge>,
    /// document id -> node ids owned by that document (components, parameters).
    pub(crate) owned: BTreeMap<String, Vec<String>>,
    /// document id -> shared node ids (data sources/entities) it references.
    pub(crate) shared_refs: BTreeMap<String, BTreeSet<String>>,
    /// shared node id -> number of referencing documents.
    pub(crate) refcounts: BTreeMap<String, usize>,
    /// document id -> content hash, for idempotent re-ingest.
    pub(crate) document_hashes: BTreeMap<String, String>,
    /// source path -> document id.
    pub(crate) doc_by_path: BTreeMap<String, String>,

    // Derived indexes, rebuilt after every mutation and after load.
    #[serde(skip)]
    pub(crate) out_edges: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub(crate) in_edges: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub(crate) name_index: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub(crate) doc_name_index: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    stats: GraphCounters,
}

#[derive(Debug, Clone, Default, Serialize)]
struct GraphCounters {
    by_node_kind: BTreeMap<String, usize>,
    by_edge_kind: BTreeMap<String, usize>,
    by_document_type: BTreeMap<String, usize>,
}

impl GraphSnapshot {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edges of a node, optionally filtered by kind.
    pub fn outgoing(&self, id: &str, kind: Option<EdgeKind>) -> Vec<&Edge> {
        self.adjacent(&self.out_edges, id, kind)
    }

    /// Incoming edges of a node, optionally filtered by kind.
    pub fn incoming(&self, id: &str, kind: Option<EdgeKind>) -> Vec<&Edge> {
        self.adjacent(&self.in_edges, id, kind)
    }

    fn adjacent(
        &self,
        index: &BTreeMap<String, Vec<String>>,
        id: &str,
        kind: Option<EdgeKind>,
    ) -> Vec<&Edge> {
        let Some(keys) = index.get(id) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| self.edges.get(key))
            .filter(|edge| kind.map(|k| edge.kind == k).unwrap_or(true))
            .collect()
    }

    /// Node ids whose normalized name equals the given name.
    pub fn ids_by_name(&self, name: &str) -> &[String] {
        self.name_index
            .get(&ident::normalize_name(name))
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    /// Document ids whose name matches, case-insensitive.
    pub fn documents_by_name(&self, name: &str) -> &[String] {
        self.doc_name_index
            .get(&name.to_lowercase())
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn document_for_path(&self, source_path: &str) -> Option<&String> {
        self.doc_by_path.get(source_path)
    }

    pub fn document_hash(&self, document_id: &str) -> Option<&String> {
        self.document_hashes.get(document_id)
    }

    pub fn document_hashes(&self) -> &BTreeMap<String, String> {
        &self.document_hashes
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            by_node_kind: self.stats.by_node_kind.clone(),
            by_edge_kind: self.stats.by_edge_kind.clone(),
            by_document_type: self.stats.by_document_type.clone(),
        }
    }

    /// Rebuild adjacency, name and counter indexes from nodes/edges. Called
    /// by the builder before a snapshot becomes visible and after load.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.out_edges.clear();
        self.in_edges.clear();
        self.name_index.clear();
        self.doc_name_index.clear();
        self.stats = GraphCounters::default();

        for (key, edge) in &self.edges {
            self.out_edges
                .entry(edge.from_id.clone())
                .or_default()
                .push(key.clone());
            self.in_edges
                .entry(edge.to_id.clone())
                .or_default()
                .push(key.clone());
            *self
                .stats
                .by_edge_kind
                .entry(edge.kind.as_str().to_string())
                .or_default() += 1;
        }
        // Deterministic traversal order.
        for keys in self.out_edges.values_mut() {
            keys.sort();
        }
        for keys in self.in_edges.values_mut() {
            keys.sort();
        }

        for (id, node) in &self.nodes {
            self.name_index
                .entry(ident::normalize_name(node.name()))
                .or_default()
                .push(id.clone());
            *self
                .stats
                .by_node_kind
                .entry(node.kind().as_str().to_string())
                .or_default() += 1;
            if let Node::Document(doc) = node {
                self.doc_name_index
                    .entry(doc.name.to_lowercase())
                    .or_default()
                    .push(id.clone());
                *self
                    .stats
                    .by_document_type
                    .entry(doc.kind.as_str().to_string())
                    .or_default() += 1;
            }
        }
        for ids in self.name_index.values_mut() {
            ids.sort();
        }
        for ids in self.doc_name_index.values_mut() {
            ids.sort();
        }
    }

    /// Documents currently loaded, as (id, kind) pairs.
    pub fn documents(&self) -> Vec<(&str, DocumentKind)> {
        self.nodes
            .values()
            .filter_map(|node| match node {
                Node::Document(doc) => Some((doc.id.as_str(), doc.kind)),
                _ => None,
            })
            .collect()
    }

    pub fn node_kind(&self, id: &str) -> Option<NodeKind> {
        self.nodes.get(id).map(|node| node.kind())
    }
}
