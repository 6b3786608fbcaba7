//! Read-side query engine.
//!
//! Every query runs against one immutable snapshot, so results are
//! internally consistent. Traversals are depth- and visit-bounded; cycles
//! terminate via visited sets and truncation is reported, never panicked on.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::GraphSnapshot;
use crate::ident;
use crate::model::{EdgeKind, GraphStats, Node, NodeKind, NodeRef};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upstream,
    Downstream,
    Both,
}

impl Direction {
    pub fn parse(raw: &str) -> Result<Direction> {
        match raw.to_lowercase().as_str() {
            "upstream" => Ok(Direction::Upstream),
            "downstream" => Ok(Direction::Downstream),
            "both" => Ok(Direction::Both),
            other => Err(Error::invalid_argument(
                "direction",
                format!("expected upstream|downstream|both, got `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageHop {
    #[serde(flatten)]
    pub node: NodeRef,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageResult {
    pub entity: String,
    pub upstream: Vec<LineageHop>,
    pub downstream: Vec<LineageHop>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactResult {
    pub entity: String,
    pub readers: Vec<NodeRef>,
    pub writers: Vec<NodeRef>,
    pub total: usize,
}

pub fn stats(snapshot: &GraphSnapshot) -> GraphStats {
    snapshot.stats()
}

/// Linear scan with deterministic (kind, name, id) ordering.
pub fn find_nodes(
    snapshot: &GraphSnapshot,
    kind: Option<NodeKind>,
    name_substring: Option<&str>,
    limit: usize,
) -> Vec<NodeRef> {
    let needle = name_substring.map(|s| s.to_lowercase());
    let mut matches: Vec<NodeRef> = snapshot
        .nodes()
        .filter(|node| kind.map(|k| node.kind() == k).unwrap_or(true))
        .filter(|node| {
            needle
                .as_ref()
                .map(|n| node.name().to_lowercase().contains(n.as_str()))
                .unwrap_or(true)
        })
        .map(NodeRef::from)
        .collect();
    matches.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(limit);
    matches
}

/// Case-insensitive substring match over node names.
pub fn find_by_name(snapshot: &GraphSnapshot, pattern: &str) -> Vec<NodeRef> {
    find_nodes(snapshot, None, Some(pattern), usize::MAX)
}

pub fn find_node<'a>(snapshot: &'a GraphSnapshot, id: &str) -> Option<&'a Node> {
    snapshot.node(id)
}

fn is_data_node(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::DataEntity | NodeKind::DataSource)
}

/// Starting points for lineage/impact: all data entities and data sources
/// whose normalized name equals the query.
fn data_seeds(snapshot: &GraphSnapshot, entity_name: &str) -> Result<Vec<String>> {
    let seeds: Vec<String> = snapshot
        .ids_by_name(&ident::normalize_name(entity_name))
        .iter()
        .filter(|id| snapshot.node_kind(id).map(is_data_node).unwrap_or(false))
        .cloned()
        .collect();
    if seeds.is_empty() {
        return Err(Error::UnknownEntity {
            name: entity_name.to_string(),
        });
    }
    Ok(seeds)
}

/// Transitive data lineage.
///
/// Upstream producers of an entity: components writing it, collapsed to the
/// entities those components read; a direct entity-to-entity data edge (CSV
/// lineage rows) counts as one hop. Downstream is the mirror image.
pub fn trace_lineage(
    snapshot: &GraphSnapshot,
    entity_name: &str,
    direction: Direction,
    max_depth: usize,
) -> Result<LineageResult> {
    let seeds = data_seeds(snapshot, entity_name)?;
    let mut result = LineageResult {
        entity: entity_name.to_string(),
        upstream: Vec::new(),
        downstream: Vec::new(),
        truncated: false,
    };

    if matches!(direction, Direction::Upstream | Direction::Both) {
        let (hops, truncated) = lineage_walk(snapshot, &seeds, max_depth, true);
        result.upstream = hops;
        result.truncated |= truncated;
    }
    if matches!(direction, Direction::Downstream | Direction::Both) {
        let (hops, truncated) = lineage_walk(snapshot, &seeds, max_depth, false);
        result.downstream = hops;
        result.truncated |= truncated;
    }
    Ok(result)
}

/// Layered BFS over the producer/consumer relation between data nodes.
fn lineage_walk(
    snapshot: &GraphSnapshot,
    seeds: &[String],
    max_depth: usize,
    upstream: bool,
) -> (Vec<LineageHop>, bool) {
    let cap = Config::get().traversal_node_cap;
    let mut visited: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut hops: Vec<LineageHop> = Vec::new();
    let mut truncated = false;

    let mut frontier: Vec<String> = seeds.to_vec();
    frontier.sort();
    for id in &frontier {
        if let Some(node) = snapshot.node(id) {
            hops.push(LineageHop {
                node: NodeRef::from(node),
                depth: 0,
            });
        }
    }

    for depth in 1..=max_depth {
        let mut layer: BTreeSet<String> = BTreeSet::new();
        for id in &frontier {
            for neighbor in data_neighbors(snapshot, id, upstream) {
                if !visited.contains(&neighbor) {
                    layer.insert(neighbor);
                }
            }
        }
        if layer.is_empty() {
            break;
        }
        if visited.len() + layer.len() > cap {
            truncated = true;
        }
        frontier = Vec::new();
        // BTreeSet iteration gives the lexicographic order within a layer.
        for id in layer {
            if visited.len() >= cap {
                truncated = true;
                break;
            }
            visited.insert(id.clone());
            if let Some(node) = snapshot.node(&id) {
                hops.push(LineageHop {
                    node: NodeRef::from(node),
                    depth,
                });
            }
            frontier.push(id);
        }
        if truncated {
            break;
        }
    }
    (hops, truncated)
}

/// One producer/consumer step from a data node.
fn data_neighbors(snapshot: &GraphSnapshot, id: &str, upstream: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if upstream {
        // Who writes this node, and what do those writers read?
        for edge in snapshot.incoming(id, Some(EdgeKind::WritesTo)) {
            match snapshot.node_kind(&edge.from_id) {
                Some(NodeKind::Component) => {
                    for member in execution_group(snapshot, &edge.from_id) {
                        for read in snapshot.outgoing(&member, Some(EdgeKind::ReadsFrom)) {
                            if snapshot
                                .node_kind(&read.to_id)
                                .map(is_data_node)
                                .unwrap_or(false)
                            {
                                out.push(read.to_id.clone());
                            }
                        }
                    }
                }
                Some(kind) if is_data_node(kind) => out.push(edge.from_id.clone()),
                _ => {}
            }
        }
    } else {
        // Who reads this node, and what do those readers write?
        for edge in snapshot.incoming(id, Some(EdgeKind::ReadsFrom)) {
            if snapshot.node_kind(&edge.from_id) == Some(NodeKind::Component) {
                for member in execution_group(snapshot, &edge.from_id) {
                    for write in snapshot.outgoing(&member, Some(EdgeKind::WritesTo)) {
                        if snapshot
                            .node_kind(&write.to_id)
                            .map(is_data_node)
                            .unwrap_or(false)
                        {
                            out.push(write.to_id.clone());
                        }
                    }
                }
            }
        }
        // Direct entity-to-entity flow edges.
        for edge in snapshot.outgoing(id, Some(EdgeKind::WritesTo)) {
            if snapshot
                .node_kind(&edge.to_id)
                .map(is_data_node)
                .unwrap_or(false)
            {
                out.push(edge.to_id.clone());
            }
        }
    }
    out
}

fn owning_document(component_id: &str) -> &str {
    component_id
        .split_once('/')
        .map(|(doc, _)| doc)
        .unwrap_or(component_id)
}

/// A component plus the components it is CALLS-connected to inside the same
/// document. A COBOL program reads in one paragraph and writes in another;
/// for lineage the program acts as one unit of data flow.
fn execution_group(snapshot: &GraphSnapshot, component_id: &str) -> Vec<String> {
    let doc = owning_document(component_id).to_string();
    let mut group: BTreeSet<String> = BTreeSet::new();
    group.insert(component_id.to_string());
    let mut frontier = vec![component_id.to_string()];
    while let Some(id) = frontier.pop() {
        let mut neighbors: Vec<String> = Vec::new();
        for edge in snapshot.outgoing(&id, Some(EdgeKind::Calls)) {
            neighbors.push(edge.to_id.clone());
        }
        for edge in snapshot.incoming(&id, Some(EdgeKind::Calls)) {
            neighbors.push(edge.from_id.clone());
        }
        for neighbor in neighbors {
            if owning_document(&neighbor) != doc {
                continue;
            }
            if snapshot.node_kind(&neighbor) != Some(NodeKind::Component) {
                continue;
            }
            if group.insert(neighbor.clone()) {
                frontier.push(neighbor);
            }
        }
    }
    group.into_iter().collect()
}

/// One-hop impact: the components reading and writing an entity. O(degree)
/// via the maintained reverse index.
pub fn analyze_impact(snapshot: &GraphSnapshot, entity_name: &str) -> Result<ImpactResult> {
    let seeds = data_seeds(snapshot, entity_name)?;
    let mut readers: Vec<NodeRef> = Vec::new();
    let mut writers: Vec<NodeRef> = Vec::new();
    let mut seen: BTreeSet<(String, EdgeKind)> = BTreeSet::new();

    for seed in &seeds {
        for (kind, bucket) in [
            (EdgeKind::ReadsFrom, &mut readers),
            (EdgeKind::WritesTo, &mut writers),
        ] {
            for edge in snapshot.incoming(seed, Some(kind)) {
                if snapshot.node_kind(&edge.from_id) != Some(NodeKind::Component) {
                    continue;
                }
                if !seen.insert((edge.from_id.clone(), kind)) {
                    continue;
                }
                if let Some(node) = snapshot.node(&edge.from_id) {
                    bucket.push(NodeRef::from(node));
                }
            }
        }
    }

    readers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    writers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    let total = readers.len() + writers.len();
    Ok(ImpactResult {
        entity: entity_name.to_string(),
        readers,
        writers,
        total,
    })
}

/// PRECEDES + CALLS closure from a component, depth-bounded, each component
/// reported once at its first (shortest) depth.
pub fn component_dependencies(
    snapshot: &GraphSnapshot,
    component_id: &str,
    direction: Direction,
    max_depth: usize,
) -> Result<Vec<LineageHop>> {
    if snapshot.node(component_id).is_none() {
        return Err(Error::UnknownEntity {
            name: component_id.to_string(),
        });
    }
    let cap = Config::get().traversal_node_cap;
    let mut visited: BTreeSet<String> = BTreeSet::new();
    visited.insert(component_id.to_string());
    let mut hops: Vec<LineageHop> = Vec::new();
    let mut frontier = vec![component_id.to_string()];

    for depth in 1..=max_depth {
        let mut layer: BTreeSet<String> = BTreeSet::new();
        for id in &frontier {
            for kind in [EdgeKind::Precedes, EdgeKind::Calls] {
                let edges = match direction {
                    Direction::Downstream => snapshot.outgoing(id, Some(kind)),
                    Direction::Upstream => snapshot.incoming(id, Some(kind)),
                    Direction::Both => {
                        let mut both = snapshot.outgoing(id, Some(kind));
                        both.extend(snapshot.incoming(id, Some(kind)));
                        both
                    }
                };
                for edge in edges {
                    let neighbor = if edge.from_id == *id {
                        &edge.to_id
                    } else {
                        &edge.from_id
                    };
                    if !visited.contains(neighbor) {
                        layer.insert(neighbor.clone());
                    }
                }
            }
        }
        if layer.is_empty() {
            break;
        }
        frontier = Vec::new();
        for id in layer {
            if visited.len() >= cap {
                return Ok(hops);
            }
            visited.insert(id.clone());
            if let Some(node) = snapshot.node(&id) {
                hops.push(LineageHop {
                    node: NodeRef::from(node),
                    depth,
                });
            }
            frontier.push(id);
        }
    }
    Ok(hops)
}

/// All simple paths between two nodes up to `max_len` edges, capped at the
/// configured result count. Shorter paths first, then lexicographic.
pub fn paths_between(
    snapshot: &GraphSnapshot,
    from_id: &str,
    to_id: &str,
    max_len: usize,
) -> Result<Vec<Vec<String>>> {
    for id in [from_id, to_id] {
        if snapshot.node(id).is_none() {
            return Err(Error::UnknownEntity {
                name: id.to_string(),
            });
        }
    }
    let max_paths = Config::get().max_paths;
    let mut paths: Vec<Vec<String>> = Vec::new();
    let mut current = vec![from_id.to_string()];
    let mut on_path: BTreeSet<String> = BTreeSet::new();
    on_path.insert(from_id.to_string());
    walk_paths(
        snapshot, to_id, max_len, max_paths, &mut current, &mut on_path, &mut paths,
    );
    paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.join("\x00").cmp(&b.join("\x00"))));
    Ok(paths)
}

fn walk_paths(
    snapshot: &GraphSnapshot,
    goal: &str,
    max_len: usize,
    max_paths: usize,
    current: &mut Vec<String>,
    on_path: &mut BTreeSet<String>,
    paths: &mut Vec<Vec<String>>,
) {
    if paths.len() >= max_paths {
        return;
    }
    let last = current.last().cloned().unwrap_or_default();
    if last == goal && current.len() > 1 {
        paths.push(current.clone());
        return;
    }
    if current.len() > max_len {
        return;
    }
    let mut next_ids: Vec<String> = snapshot
        .outgoing(&last, None)
        .iter()
        .map(|edge| edge.to_id.clone())
        .collect();
    next_ids.sort();
    next_ids.dedup();
    for next in next_ids {
        if on_path.contains(&next) {
            continue;
        }
        current.push(next.clone());
        on_path.insert(next.clone());
        walk_paths(snapshot, goal, max_len, max_paths, current, on_path, paths);
        on_path.remove(&next);
        current.pop();
    }
}
