//! MCP server over stdio.
//!
//! JSON-RPC messages, one per line. Exposes the six tool operations of the
//! tool surface; the graph is loaded from the persist dir at startup and a
//! fresh snapshot is taken per call.

use crate::error::Error;
use crate::graph::GraphBuilder;
use crate::tools;
use crate::vector::VectorIndex;
use anyhow::Result;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

pub fn serve(builder: &GraphBuilder, vectors: &dyn VectorIndex) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                eprintln!("traceai: stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(message) => handle_message(message, builder, vectors),
            Err(err) => Some(jsonrpc_error(
                Value::Null,
                -32700,
                &format!("parse error: {err}"),
            )),
        };

        if let Some(payload) = response {
            writeln!(stdout, "{}", serde_json::to_string(&payload)?)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn handle_message(message: Value, builder: &GraphBuilder, vectors: &dyn VectorIndex) -> Option<Value> {
    let id = message.get("id").cloned();
    let method = message.get("method").and_then(|value| value.as_str());

    let Some(method) = method else {
        return id.map(|id| jsonrpc_error(id, -32600, "invalid request"));
    };

    match method {
        "initialize" => {
            let id = id?;
            Some(jsonrpc_result(id, initialize_result(&message)))
        }
        "notifications/initialized" => None,
        "ping" => id.map(|id| jsonrpc_result(id, json!({}))),
        "tools/list" => {
            let id = id?;
            let tools: Vec<Value> = tools::TOOL_NAMES
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "description": tools::tool_description(name),
                        "inputSchema": tools::tool_schema(name),
                    })
                })
                .collect();
            Some(jsonrpc_result(id, json!({ "tools": tools })))
        }
        "tools/call" => {
            let id = id?;
            Some(handle_tool_call(id, &message, builder, vectors))
        }
        "resources/list" => id.map(|id| jsonrpc_result(id, json!({ "resources": [] }))),
        "prompts/list" => id.map(|id| jsonrpc_result(id, json!({ "prompts": [] }))),
        _ => id.map(|id| jsonrpc_error(id, -32601, "method not found")),
    }
}

fn initialize_result(message: &Value) -> Value {
    let protocol = message
        .get("params")
        .and_then(|params| params.get("protocolVersion"))
        .cloned()
        .unwrap_or_else(|| Value::String("2024-11-05".to_string()));
    json!({
        "protocolVersion": protocol,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "traceai",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Query the ETL knowledge graph: graph_query to find nodes, \
trace_lineage for upstream/downstream data lineage, analyze_impact for readers/writers \
of an entity, find_dependencies for execution-order closure, semantic_search for \
discovery, graph_stats for totals.",
    })
}

fn handle_tool_call(
    id: Value,
    message: &Value,
    builder: &GraphBuilder,
    vectors: &dyn VectorIndex,
) -> Value {
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let name = params
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let snapshot = builder.snapshot();
    match tools::dispatch(&snapshot, vectors, &name, arguments) {
        Ok(result) => jsonrpc_result(
            id,
            json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string(&result).unwrap_or_default(),
                }],
                "structuredContent": result,
            }),
        ),
        Err(err) => tool_error(id, &err),
    }
}

/// Tool failures carry the typed error kind and the offending identifier so
/// the planner can react without parsing prose.
fn tool_error(id: Value, err: &Error) -> Value {
    let detail = match err {
        Error::UnknownEntity { name } => json!({ "kind": err.kind(), "entity": name }),
        Error::InvalidArgument { field, message } => {
            json!({ "kind": err.kind(), "field": field, "message": message })
        }
        Error::LimitExceeded { visited, cap } => {
            json!({ "kind": err.kind(), "visited": visited, "cap": cap })
        }
        other => json!({ "kind": other.kind() }),
    };
    jsonrpc_result(
        id,
        json!({
            "content": [{ "type": "text", "text": err.to_string() }],
            "isError": true,
            "structuredContent": detail,
        }),
    )
}

fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::MemoryVectorIndex;

    #[test]
    fn tools_list_advertises_six_tools() {
        let builder = GraphBuilder::new();
        let vectors = MemoryVectorIndex::with_default_embedder();
        let message = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let response = handle_message(message, &builder, &vectors).unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 6);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let builder = GraphBuilder::new();
        let vectors = MemoryVectorIndex::with_default_embedder();
        let message = json!({ "jsonrpc": "2.0", "id": 2, "method": "nope" });
        let response = handle_message(message, &builder, &vectors).unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[test]
    fn tool_call_on_empty_graph_reports_unknown_entity() {
        let builder = GraphBuilder::new();
        let vectors = MemoryVectorIndex::with_default_embedder();
        let message = json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": { "name": "analyze_impact", "arguments": { "entity_name": "Customer" } }
        });
        let response = handle_message(message, &builder, &vectors).unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["structuredContent"]["kind"],
            "unknown_entity"
        );
    }
}
