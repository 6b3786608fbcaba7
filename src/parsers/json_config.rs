//! Schema-agnostic JSON pipeline-config parser.
//!
//! There is no one schema for these files, so objects are classified by
//! shape: `pipeline`/`stages` arrays become sequenced components,
//! `jobs`/`tasks` with `depends_on` become components with PRECEDES edges,
//! `source`+`target` maps become flow components, `schema`/`tables` become
//! data entities, `connections`/`datasources` become data sources. Unknown
//! top-level scalars are retained as custom attributes on the document.

use crate::error::{Error, Result};
use crate::model::{
    Component, DataEntity, DataSource, Dependency, DocumentKind, EdgeKind, EntityKind, Parameter,
    ParsedDocument, SourceKind,
};
use crate::parsers::{document_for, read_source, FormatParser};
use crate::{ident, util};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

const RESERVED_KEYS: &[&str] = &[
    "name",
    "id",
    "description",
    "version",
    "author",
    "creator",
    "pipeline",
    "stages",
    "jobs",
    "tasks",
    "schema",
    "tables",
    "connections",
    "datasources",
    "parameters",
    "variables",
];

pub struct JsonConfigParser;

impl JsonConfigParser {
    pub fn new() -> Self {
        JsonConfigParser
    }
}

impl Default for JsonConfigParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for JsonConfigParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::JsonConfig
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<Value>(&content).is_ok(),
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let raw = read_source(path)?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            Error::malformed(util::normalize_path(path), format!("invalid JSON: {err}"))
        })?;
        let Value::Object(root) = value else {
            return Err(Error::malformed(
                util::normalize_path(path),
                "top-level JSON value is not an object",
            ));
        };

        let name = root
            .get("name")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| util::file_stem(path));
        let mut document = document_for(path, DocumentKind::JsonConfig, name, raw.as_bytes());
        for key in ["description", "version", "author", "creator"] {
            if let Some(value) = root.get(key).and_then(Value::as_str) {
                let custom_key = if key == "author" { "creator" } else { key };
                document.custom.insert(custom_key.to_string(), value.to_string());
            }
        }
        // Unknown scalar shapes ride along as custom attributes.
        for (key, value) in &root {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match value {
                Value::String(s) => {
                    document.custom.insert(key.clone(), s.clone());
                }
                Value::Bool(_) | Value::Number(_) => {
                    document.custom.insert(key.clone(), value.to_string());
                }
                _ => {
                    document
                        .custom
                        .insert(key.clone(), serde_json::to_string(value).unwrap_or_default());
                }
            }
        }

        let mut parsed = ParsedDocument::new(document);
        let doc_id = parsed.document.id.clone();

        if let Some(stages) = root
            .get("pipeline")
            .or_else(|| root.get("stages"))
            .and_then(Value::as_array)
        {
            parse_stages(&mut parsed, &doc_id, stages);
        }
        if let Some(jobs) = root
            .get("jobs")
            .or_else(|| root.get("tasks"))
            .and_then(Value::as_array)
        {
            parse_jobs(&mut parsed, &doc_id, jobs);
        }
        if let Some(tables) = tables_of(&root) {
            parse_tables(&mut parsed, tables);
        }
        if let Some(sources) = root
            .get("connections")
            .or_else(|| root.get("datasources"))
            .and_then(Value::as_array)
        {
            parse_data_sources(&mut parsed, sources);
        }
        if let Some(params) = root
            .get("parameters")
            .or_else(|| root.get("variables"))
            .and_then(Value::as_object)
        {
            parse_parameters(&mut parsed, &doc_id, params);
        }

        Ok(parsed)
    }
}

fn tables_of(root: &Map<String, Value>) -> Option<&Vec<Value>> {
    if let Some(schema) = root.get("schema").and_then(Value::as_object) {
        if let Some(tables) = schema.get("tables").and_then(Value::as_array) {
            return Some(tables);
        }
    }
    root.get("tables").and_then(Value::as_array)
}

/// `pipeline`/`stages`: ordered array, each stage PRECEDES the next.
fn parse_stages(parsed: &mut ParsedDocument, doc_id: &str, stages: &[Value]) {
    let mut previous: Option<String> = None;
    for (idx, stage) in stages.iter().enumerate() {
        let Value::Object(stage) = stage else { continue };
        let name = stage
            .get("name")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Stage{idx}"));
        let component_id = ident::component_id(doc_id, &name);
        parsed.components.push(Component {
            id: component_id.clone(),
            name,
            component_type: stage
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("stage")
                .to_string(),
            description: stage
                .get("description")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            source_excerpt: None,
            properties: scalar_properties(stage),
        });
        flow_edges(parsed, &component_id, stage);
        if let Some(previous) = previous {
            parsed
                .dependencies
                .push(Dependency::new(previous, component_id.clone(), EdgeKind::Precedes));
        }
        previous = Some(component_id);
    }
}

/// `jobs`/`tasks`: named units with `depends_on` lists.
fn parse_jobs(parsed: &mut ParsedDocument, doc_id: &str, jobs: &[Value]) {
    // First pass fixes ids so forward references resolve.
    let mut ids: BTreeMap<String, String> = BTreeMap::new();
    for (idx, job) in jobs.iter().enumerate() {
        let Value::Object(job) = job else { continue };
        let name = job_name(job, idx);
        ids.insert(name.clone(), ident::component_id(doc_id, &name));
    }

    for (idx, job) in jobs.iter().enumerate() {
        let Value::Object(job) = job else { continue };
        let name = job_name(job, idx);
        let component_id = ident::component_id(doc_id, &name);
        parsed.components.push(Component {
            id: component_id.clone(),
            name,
            component_type: job
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("job")
                .to_string(),
            description: job
                .get("description")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            source_excerpt: job
                .get("sql")
                .or_else(|| job.get("script"))
                .and_then(Value::as_str)
                .and_then(|s| util::excerpt(s, 500)),
            properties: scalar_properties(job),
        });

        if let Some(depends_on) = job
            .get("depends_on")
            .or_else(|| job.get("dependencies"))
            .and_then(Value::as_array)
        {
            for dep in depends_on {
                let Some(dep_name) = dep.as_str() else { continue };
                if let Some(dep_id) = ids.get(dep_name) {
                    // The dependency runs first.
                    parsed.dependencies.push(Dependency::new(
                        dep_id.clone(),
                        component_id.clone(),
                        EdgeKind::Precedes,
                    ));
                } else {
                    parsed
                        .warnings
                        .push(format!("depends_on references unknown job `{dep_name}`"));
                }
            }
        }
        flow_edges(parsed, &component_id, job);
    }
}

fn job_name(job: &Map<String, Value>, idx: usize) -> String {
    job.get("name")
        .or_else(|| job.get("id"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Job{idx}"))
}

/// A map carrying `source` and `target` is a data movement: the component
/// reads the source entity and writes the target entity.
fn flow_edges(parsed: &mut ParsedDocument, component_id: &str, map: &Map<String, Value>) {
    let source = map.get("source").and_then(Value::as_str);
    let target = map.get("target").and_then(Value::as_str);
    if let Some(source) = source {
        let entity_id = push_entity(parsed, source);
        parsed
            .dependencies
            .push(Dependency::new(component_id, entity_id, EdgeKind::ReadsFrom));
    }
    if let Some(target) = target {
        let entity_id = push_entity(parsed, target);
        parsed
            .dependencies
            .push(Dependency::new(component_id, entity_id, EdgeKind::WritesTo));
    }
}

fn parse_tables(parsed: &mut ParsedDocument, tables: &[Value]) {
    for table in tables {
        let Value::Object(table) = table else { continue };
        let Some(name) = table.get("name").and_then(Value::as_str) else {
            continue;
        };
        let columns = table
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(|col| match col {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(obj) => obj
                            .get("name")
                            .and_then(Value::as_str)
                            .map(|s| s.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let (split_schema, bare) = ident::split_qualified(name);
        let schema = table
            .get("schema")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .or(split_schema);
        let mut properties = scalar_properties(table);
        if let Some(schema) = &schema {
            properties.insert("schema".to_string(), schema.clone());
        }
        let id = ident::data_entity_id(schema.as_deref(), &bare);
        if parsed.data_entities.iter().any(|e| e.id == id) {
            continue;
        }
        parsed.data_entities.push(DataEntity {
            id,
            name: bare,
            qualified_name: name.to_string(),
            entity_type: EntityKind::Table,
            columns,
            properties,
        });
    }
}

fn parse_data_sources(parsed: &mut ParsedDocument, sources: &[Value]) {
    for source in sources {
        let Value::Object(source) = source else { continue };
        let Some(name) = source.get("name").and_then(Value::as_str) else {
            continue;
        };
        let kind = match source
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("database")
            .to_lowercase()
            .as_str()
        {
            "database" | "db" | "oledb" | "odbc" | "jdbc" => SourceKind::Db,
            "file" | "flatfile" | "csv" => SourceKind::File,
            "dataset" => SourceKind::Dataset,
            "ftp" | "sftp" => SourceKind::Ftp,
            "http" | "https" | "api" | "rest" => SourceKind::Http,
            _ => SourceKind::Unknown,
        };
        let locator = source
            .get("connection_string")
            .or_else(|| source.get("url"))
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let id = ident::data_source_id(kind, &locator);
        if parsed.data_sources.iter().any(|s| s.id == id) {
            continue;
        }
        parsed.data_sources.push(DataSource {
            id,
            name: name.to_string(),
            kind,
            locator,
            properties: scalar_properties(source),
        });
    }
}

fn parse_parameters(parsed: &mut ParsedDocument, doc_id: &str, params: &Map<String, Value>) {
    for (name, value) in params {
        let (data_type, value_str, description) = match value {
            Value::Object(obj) => (
                obj.get("type").and_then(Value::as_str).map(|s| s.to_string()),
                obj.get("value").map(render_scalar),
                obj.get("description")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string()),
            ),
            other => (Some(json_type_name(other).to_string()), Some(render_scalar(other)), None),
        };
        let mut properties = BTreeMap::new();
        if let Some(description) = description {
            properties.insert("description".to_string(), description);
        }
        parsed.parameters.push(Parameter {
            id: ident::parameter_id(doc_id, name),
            name: name.clone(),
            data_type,
            value: value_str,
            properties,
        });
    }
}

fn push_entity(parsed: &mut ParsedDocument, raw_name: &str) -> String {
    let (schema, bare) = ident::split_qualified(raw_name);
    let id = ident::data_entity_id(schema.as_deref(), &bare);
    if !parsed.data_entities.iter().any(|e| e.id == id) {
        let mut properties = BTreeMap::new();
        if let Some(schema) = schema {
            properties.insert("schema".to_string(), schema);
        }
        parsed.data_entities.push(DataEntity {
            id: id.clone(),
            name: bare,
            qualified_name: raw_name.to_string(),
            entity_type: EntityKind::Table,
            columns: Vec::new(),
            properties,
        });
    }
    id
}

fn scalar_properties(map: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        match value {
            Value::String(s) => {
                out.insert(key.clone(), s.clone());
            }
            Value::Bool(_) | Value::Number(_) => {
                out.insert(key.clone(), value.to_string());
            }
            _ => {}
        }
    }
    out
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
