//! Typed multigraph builder.
//!
//! Single-writer, many-reader: all commits serialize through one writer
//! lock and become visible as a whole via an `Arc` pointer swap. Readers
//! take `snapshot()` and are never blocked by a commit in progress.

use crate::error::Result;
use crate::model::{
    CommitReport, Dependency, Edge, EdgeKind, Node, ParsedDocument, RemovalReport, UnresolvedRef,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

mod snapshot;
pub mod query;

pub use snapshot::GraphSnapshot;
use snapshot::{edge_key, edge_owner};

/// A CALLS edge whose target document was not loaded at commit time.
/// Retried on every subsequent commit until it resolves or the builder is
/// sealed.
#[derive(Debug, Clone)]
struct PendingRef {
    owner_doc: String,
    from_id: String,
    target_name: String,
    properties: BTreeMap<String, String>,
}

#[derive(Default)]
struct WriterState {
    pending: Vec<PendingRef>,
    sealed: bool,
}

pub struct GraphBuilder {
    current: RwLock<Arc<GraphSnapshot>>,
    writer: Mutex<WriterState>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            current: RwLock::new(Arc::new(GraphSnapshot::default())),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Rehydrate from a persisted snapshot. Deferred references are not
    /// persisted; unresolved calls simply stay absent until re-ingest.
    pub fn from_snapshot(mut snapshot: GraphSnapshot) -> Self {
        snapshot.rebuild_indexes();
        GraphBuilder {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Current immutable view. Cheap: a pointer clone.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn publish(&self, mut next: GraphSnapshot) {
        next.rebuild_indexes();
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(next);
    }

    /// Atomic per-document commit. Re-ingesting an unchanged file is a
    /// no-op; a changed file replaces the nodes and edges the old version
    /// owned and reconciles shared nodes by refcount.
    pub fn add_document(&self, parsed: ParsedDocument) -> Result<CommitReport> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let base = self.snapshot();

        let document = &parsed.document;
        let mut report = CommitReport {
            document_id: document.id.clone(),
            ..Default::default()
        };

        // Step 2: same path, same content hash -> nothing to do.
        if let Some(existing_id) = base.document_for_path(&document.source_path) {
            if base.document_hash(existing_id).map(|h| h.as_str())
                == Some(document.content_hash.as_str())
            {
                report.document_id = existing_id.clone();
                report.no_op = true;
                return Ok(report);
            }
        }

        let mut next = (*base).clone();

        // Step 3: drop the previous version of this path, if any.
        if let Some(old_id) = next.doc_by_path.get(&document.source_path).cloned() {
            let removal = remove_document_inner(&mut next, &mut writer.pending, &old_id);
            report.removed_nodes = removal.removed_nodes;
            report.removed_edges = removal.removed_edges;
            report.removed_node_ids = removal.removed_node_ids;
        }

        // Step 4: insert nodes, then edges.
        let doc_id = document.id.clone();
        let mut owned: Vec<String> = Vec::new();
        let mut shared: BTreeSet<String> = BTreeSet::new();

        insert_node(&mut next, &mut report, Node::Document(document.clone()));
        next.document_hashes
            .insert(doc_id.clone(), document.content_hash.clone());
        next.doc_by_path
            .insert(document.source_path.clone(), doc_id.clone());

        for component in &parsed.components {
            owned.push(component.id.clone());
            insert_node(&mut next, &mut report, Node::Component(component.clone()));
        }
        for parameter in &parsed.parameters {
            owned.push(parameter.id.clone());
            insert_node(&mut next, &mut report, Node::Parameter(parameter.clone()));
        }
        for source in &parsed.data_sources {
            shared.insert(source.id.clone());
            insert_shared_node(&mut next, &mut report, Node::DataSource(source.clone()));
        }
        for entity in &parsed.data_entities {
            shared.insert(entity.id.clone());
            insert_shared_node(&mut next, &mut report, Node::DataEntity(entity.clone()));
        }
        for id in &shared {
            *next.refcounts.entry(id.clone()).or_insert(0) += 1;
        }
        next.owned.insert(doc_id.clone(), owned.clone());
        next.shared_refs.insert(doc_id.clone(), shared);

        // Ownership edges.
        for id in &owned {
            insert_edge(
                &mut next,
                &mut report,
                &doc_id,
                Edge {
                    from_id: doc_id.clone(),
                    to_id: id.clone(),
                    kind: EdgeKind::Contains,
                    properties: BTreeMap::new(),
                },
            );
        }

        for dependency in &parsed.dependencies {
            self.apply_dependency(&mut next, &mut writer.pending, &mut report, &doc_id, dependency);
        }

        // Step 5: retry every deferred reference now that a new document
        // (and possibly its name) exists.
        report.resolved_refs = resolve_pending(&mut next, &mut writer.pending);

        self.publish(next);
        Ok(report)
    }

    fn apply_dependency(
        &self,
        next: &mut GraphSnapshot,
        pending: &mut Vec<PendingRef>,
        report: &mut CommitReport,
        doc_id: &str,
        dependency: &Dependency,
    ) {
        if let Some(target) = &dependency.deferred {
            pending.push(PendingRef {
                owner_doc: doc_id.to_string(),
                from_id: dependency.from_id.clone(),
                target_name: target.name.clone(),
                properties: dependency.properties.clone(),
            });
            return;
        }
        if !next.contains_node(&dependency.from_id) || !next.contains_node(&dependency.to_id) {
            eprintln!(
                "traceai: dropping edge with unknown endpoint {} -> {}",
                dependency.from_id, dependency.to_id
            );
            return;
        }
        insert_edge(
            next,
            report,
            doc_id,
            Edge {
                from_id: dependency.from_id.clone(),
                to_id: dependency.to_id.clone(),
                kind: dependency.kind,
                properties: dependency.properties.clone(),
            },
        );
    }

    /// Unload a document: its owned nodes, every edge it contributed, and
    /// shared nodes whose refcount reaches zero.
    pub fn remove_document(&self, document_id: &str) -> Option<RemovalReport> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let base = self.snapshot();
        if !base.contains_node(document_id) {
            return None;
        }
        let mut next = (*base).clone();
        let report = remove_document_inner(&mut next, &mut writer.pending, document_id);
        self.publish(next);
        Some(report)
    }

    /// Resolve what can be resolved; report what remains.
    pub fn resolve_deferred_references(&self) -> Vec<UnresolvedRef> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let base = self.snapshot();
        let mut next = (*base).clone();
        let resolved = resolve_pending(&mut next, &mut writer.pending);
        if resolved > 0 {
            self.publish(next);
        }
        writer
            .pending
            .iter()
            .map(|p| UnresolvedRef {
                from_id: p.from_id.clone(),
                target_name: p.target_name.clone(),
                ambiguous: false,
            })
            .collect()
    }

    /// Stop retrying deferred references on future commits.
    pub fn seal(&self) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.sealed = true;
        writer.pending.clear();
    }

    pub fn pending_reference_count(&self) -> usize {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pending
            .len()
    }
}

fn insert_node(next: &mut GraphSnapshot, report: &mut CommitReport, node: Node) {
    let id = node.id().to_string();
    match next.nodes.insert(id.clone(), node) {
        Some(_) => report.updated_nodes += 1,
        None => report.added_nodes += 1,
    }
    report.added_node_ids.push(id);
}

/// Shared nodes keep their identity across documents; a later document
/// replaces the attribute set but must not change the node type.
fn insert_shared_node(next: &mut GraphSnapshot, report: &mut CommitReport, node: Node) {
    let id = node.id().to_string();
    if let Some(existing) = next.nodes.get(&id) {
        if existing.kind() != node.kind() {
            eprintln!(
                "traceai: node kind conflict for {id}: {} vs {}",
                existing.kind().as_str(),
                node.kind().as_str()
            );
            return;
        }
        next.nodes.insert(id.clone(), node);
        report.updated_nodes += 1;
    } else {
        next.nodes.insert(id.clone(), node);
        report.added_nodes += 1;
    }
    report.added_node_ids.push(id);
}

fn insert_edge(next: &mut GraphSnapshot, report: &mut CommitReport, owner: &str, edge: Edge) {
    let key = edge_key(owner, &edge);
    if next.edges.insert(key, edge).is_none() {
        report.added_edges += 1;
    }
}

fn remove_document_inner(
    next: &mut GraphSnapshot,
    pending: &mut Vec<PendingRef>,
    document_id: &str,
) -> RemovalReport {
    let mut removed_node_ids: Vec<String> = Vec::new();
    let mut removed_edges = 0usize;

    let owned = next.owned.remove(document_id).unwrap_or_default();
    let shared = next.shared_refs.remove(document_id).unwrap_or_default();

    // Edges contributed by this document.
    let keys: Vec<String> = next
        .edges
        .keys()
        .filter(|key| edge_owner(key) == document_id)
        .cloned()
        .collect();
    for key in keys {
        next.edges.remove(&key);
        removed_edges += 1;
    }

    // Owned nodes go unconditionally.
    for id in owned {
        if next.nodes.remove(&id).is_some() {
            removed_node_ids.push(id);
        }
    }

    // Shared nodes go when no other document still references them.
    for id in shared {
        let count = next.refcounts.get(&id).copied().unwrap_or(0);
        if count <= 1 {
            next.refcounts.remove(&id);
            if next.nodes.remove(&id).is_some() {
                removed_node_ids.push(id);
            }
        } else {
            next.refcounts.insert(id, count - 1);
        }
    }

    if next.nodes.remove(document_id).is_some() {
        removed_node_ids.push(document_id.to_string());
    }
    next.document_hashes.remove(document_id);
    next.doc_by_path
        .retain(|_, doc_id| doc_id.as_str() != document_id);

    // Edges from other documents that pointed at now-removed nodes are gone
    // too (they would dangle otherwise), and this document's unresolved
    // references are dropped.
    let removed_set: BTreeSet<&String> = removed_node_ids.iter().collect();
    let dangling: Vec<String> = next
        .edges
        .iter()
        .filter(|(_, edge)| {
            removed_set.contains(&edge.from_id) || removed_set.contains(&edge.to_id)
        })
        .map(|(key, _)| key.clone())
        .collect();
    for key in dangling {
        next.edges.remove(&key);
        removed_edges += 1;
    }
    pending.retain(|p| p.owner_doc != document_id);

    RemovalReport {
        document_id: document_id.to_string(),
        removed_nodes: removed_node_ids.len(),
        removed_edges,
        removed_node_ids,
    }
}

/// Try every pending reference against the documents now in the graph.
/// Name matching is case-insensitive; if several documents share the name
/// the lexicographically smallest id wins and the edge is marked ambiguous.
fn resolve_pending(next: &mut GraphSnapshot, pending: &mut Vec<PendingRef>) -> usize {
    // The snapshot's doc-name index is stale during a commit; scan documents
    // directly. Document counts are small relative to nodes.
    let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in next.nodes.values() {
        if let Node::Document(doc) = node {
            by_name
                .entry(doc.name.to_lowercase())
                .or_default()
                .push(doc.id.clone());
        }
    }
    for ids in by_name.values_mut() {
        ids.sort();
    }

    let mut resolved = 0usize;
    pending.retain(|p| {
        let Some(candidates) = by_name.get(&p.target_name.to_lowercase()) else {
            return true;
        };
        if !next.contains_node(&p.from_id) {
            // Source side vanished (document replaced); drop the reference.
            return false;
        }
        let target = candidates[0].clone();
        let mut properties = p.properties.clone();
        properties.insert("resolved_by".to_string(), "name".to_string());
        if candidates.len() > 1 {
            properties.insert("ambiguous".to_string(), "true".to_string());
        }
        let edge = Edge {
            from_id: p.from_id.clone(),
            to_id: target,
            kind: EdgeKind::Calls,
            properties,
        };
        let key = edge_key(&p.owner_doc, &edge);
        next.edges.insert(key, edge);
        resolved += 1;
        false
    });
    resolved
}
