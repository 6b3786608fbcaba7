//! Typed tool surface for external planners.
//!
//! Six named operations over one graph snapshot and the vector index, all
//! pure: inputs describe what to query, outputs are structured values. Any
//! planner that can drive these six calls can sit on top.

use crate::error::{Error, Result};
use crate::graph::query::{self, Direction, ImpactResult, LineageHop, LineageResult};
use crate::graph::GraphSnapshot;
use crate::model::{GraphStats, NodeKind, NodeRef};
use crate::vector::{SearchMatch, VectorIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const TOOL_NAMES: &[&str] = &[
    "graph_query",
    "trace_lineage",
    "analyze_impact",
    "find_dependencies",
    "semantic_search",
    "graph_stats",
];

fn default_limit() -> usize {
    50
}

fn default_max_depth() -> usize {
    8
}

fn default_k() -> usize {
    10
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_downstream() -> String {
    "downstream".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphQueryParams {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name_substring: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct GraphQueryResult {
    pub nodes: Vec<NodeRef>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceLineageParams {
    pub entity_name: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeImpactParams {
    pub entity_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindDependenciesParams {
    pub component_id: String,
    #[serde(default = "default_downstream")]
    pub direction: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct FindDependenciesResult {
    pub component_id: String,
    pub direction: Direction,
    pub dependencies: Vec<LineageHop>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemanticSearchParams {
    pub text: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filter: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct SemanticSearchResult {
    pub matches: Vec<SearchMatch>,
}

pub fn graph_query(snapshot: &GraphSnapshot, params: &GraphQueryParams) -> Result<GraphQueryResult> {
    let kind = match &params.kind {
        Some(raw) => Some(NodeKind::parse(raw).ok_or_else(|| {
            Error::invalid_argument(
                "kind",
                format!("unknown node kind `{raw}`; expected document|component|data_source|data_entity|parameter"),
            )
        })?),
        None => None,
    };
    let nodes = query::find_nodes(snapshot, kind, params.name_substring.as_deref(), params.limit);
    Ok(GraphQueryResult {
        total: nodes.len(),
        nodes,
    })
}

pub fn trace_lineage(snapshot: &GraphSnapshot, params: &TraceLineageParams) -> Result<LineageResult> {
    require_non_empty("entity_name", &params.entity_name)?;
    let direction = Direction::parse(&params.direction)?;
    query::trace_lineage(snapshot, &params.entity_name, direction, params.max_depth)
}

pub fn analyze_impact(snapshot: &GraphSnapshot, params: &AnalyzeImpactParams) -> Result<ImpactResult> {
    require_non_empty("entity_name", &params.entity_name)?;
    query::analyze_impact(snapshot, &params.entity_name)
}

pub fn find_dependencies(
    snapshot: &GraphSnapshot,
    params: &FindDependenciesParams,
) -> Result<FindDependenciesResult> {
    require_non_empty("component_id", &params.component_id)?;
    let direction = Direction::parse(&params.direction)?;
    let dependencies =
        query::component_dependencies(snapshot, &params.component_id, direction, params.max_depth)?;
    Ok(FindDependenciesResult {
        component_id: params.component_id.clone(),
        direction,
        dependencies,
    })
}

/// Results are post-filtered against the snapshot, so an id returned here is
/// always resolvable through `graph_query`.
pub fn semantic_search(
    snapshot: &GraphSnapshot,
    vectors: &dyn VectorIndex,
    params: &SemanticSearchParams,
) -> Result<SemanticSearchResult> {
    require_non_empty("text", &params.text)?;
    let matches = vectors
        .similarity_search(&params.text, params.k, params.filter.as_ref())?
        .into_iter()
        .filter(|m| snapshot.contains_node(&m.id))
        .collect();
    Ok(SemanticSearchResult { matches })
}

pub fn graph_stats(snapshot: &GraphSnapshot) -> GraphStats {
    query::stats(snapshot)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(field, "must not be empty"));
    }
    Ok(())
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|err| Error::invalid_argument("params", err.to_string()))
}

/// Name-based dispatch used by the MCP server and the CLI `request` path.
pub fn dispatch(
    snapshot: &GraphSnapshot,
    vectors: &dyn VectorIndex,
    name: &str,
    params: Value,
) -> Result<Value> {
    let encode = |value: std::result::Result<Value, serde_json::Error>| {
        value.map_err(|err| Error::Internal(format!("encode tool result: {err}")))
    };
    match name {
        "graph_query" => {
            let params: GraphQueryParams = decode_params(params)?;
            encode(serde_json::to_value(graph_query(snapshot, &params)?))
        }
        "trace_lineage" => {
            let params: TraceLineageParams = decode_params(params)?;
            encode(serde_json::to_value(trace_lineage(snapshot, &params)?))
        }
        "analyze_impact" => {
            let params: AnalyzeImpactParams = decode_params(params)?;
            encode(serde_json::to_value(analyze_impact(snapshot, &params)?))
        }
        "find_dependencies" => {
            let params: FindDependenciesParams = decode_params(params)?;
            encode(serde_json::to_value(find_dependencies(snapshot, &params)?))
        }
        "semantic_search" => {
            let params: SemanticSearchParams = decode_params(params)?;
            encode(serde_json::to_value(semantic_search(snapshot, vectors, &params)?))
        }
        "graph_stats" => encode(serde_json::to_value(graph_stats(snapshot))),
        other => Err(Error::invalid_argument(
            "tool",
            format!("unknown tool `{other}`"),
        )),
    }
}

/// JSON schema fragments advertised over MCP.
pub fn tool_schema(name: &str) -> Value {
    match name {
        "graph_query" => serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {"type": "string", "enum": ["document", "component", "data_source", "data_entity", "parameter"]},
                "name_substring": {"type": "string"},
                "limit": {"type": "integer", "minimum": 0}
            }
        }),
        "trace_lineage" => serde_json::json!({
            "type": "object",
            "properties": {
                "entity_name": {"type": "string"},
                "direction": {"type": "string", "enum": ["upstream", "downstream", "both"]},
                "max_depth": {"type": "integer", "minimum": 0}
            },
            "required": ["entity_name"]
        }),
        "analyze_impact" => serde_json::json!({
            "type": "object",
            "properties": {"entity_name": {"type": "string"}},
            "required": ["entity_name"]
        }),
        "find_dependencies" => serde_json::json!({
            "type": "object",
            "properties": {
                "component_id": {"type": "string"},
                "direction": {"type": "string", "enum": ["upstream", "downstream", "both"]},
                "max_depth": {"type": "integer", "minimum": 0}
            },
            "required": ["component_id"]
        }),
        "semantic_search" => serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "k": {"type": "integer", "minimum": 0},
                "filter": {"type": "object", "additionalProperties": {"type": "string"}}
            },
            "required": ["text"]
        }),
        _ => serde_json::json!({"type": "object", "properties": {}}),
    }
}

pub fn tool_description(name: &str) -> &'static str {
    match name {
        "graph_query" => "Find graph nodes by kind and/or name substring.",
        "trace_lineage" => "Trace upstream/downstream data lineage for a named entity.",
        "analyze_impact" => "List the components reading and writing a named entity.",
        "find_dependencies" => "PRECEDES/CALLS closure from a component.",
        "semantic_search" => "Embedding similarity search over node text surfaces.",
        "graph_stats" => "Node/edge counts by kind and document type.",
        _ => "",
    }
}
