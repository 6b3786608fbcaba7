//! SSIS `.dtsx` package parser.
//!
//! DTSX is namespaced XML (`DTS:` for the package layer, `SQLTask:` for SQL
//! task payloads). The reader matches on local attribute/element names so the
//! 2012/2016/2019 dialects all parse; unknown elements are ignored.

use crate::error::Result;
use crate::model::{
    Component, DataEntity, DataSource, Dependency, DocumentKind, EdgeKind, EntityKind, Parameter,
    ParsedDocument, SourceKind,
};
use crate::parsers::{document_for, read_source, FormatParser};
use crate::{ident, sqlscan, util};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::Path;

const DTS_NAMESPACE: &str = "www.microsoft.com/SqlServer/Dts";
const EXCERPT_MAX_BYTES: usize = 500;

pub struct SsisParser;

impl SsisParser {
    pub fn new() -> Self {
        SsisParser
    }
}

impl Default for SsisParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for SsisParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Ssis
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dtsx"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let head = &content[..content.len().min(2048)];
                head.contains(DTS_NAMESPACE)
            }
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let source = read_source(path)?;
        let mut walker = DtsxWalker::new(path, &source);
        walker.run(&source)?;
        Ok(walker.finish(&source, path))
    }
}

/// Attributes of one element, keyed by local name (prefix stripped).
fn local_attributes(start: &BytesStart<'_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let local = key.rsplit(':').next().unwrap_or(&key).to_string();
        if let Ok(value) = attr.unescape_value() {
            out.insert(local, value.to_string());
        }
    }
    out
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

#[derive(Debug)]
struct RawExecutable {
    name: String,
    dtsid: String,
    executable_type: String,
    description: Option<String>,
    sql: Option<String>,
    partial: bool,
}

#[derive(Debug)]
struct RawConnection {
    name: String,
    creation_name: String,
    description: Option<String>,
    connection_string: Option<String>,
}

#[derive(Debug)]
struct RawConstraint {
    from: String,
    to: String,
    value: Option<String>,
    expression: Option<String>,
}

struct DtsxWalker {
    doc_name: String,
    doc_attrs: BTreeMap<String, String>,
    executables: Vec<RawExecutable>,
    connections: Vec<RawConnection>,
    variables: Vec<(BTreeMap<String, String>, Option<String>)>,
    constraints: Vec<RawConstraint>,
    warnings: Vec<String>,
    // walk state
    executable_depth: usize,
    open_executables: Vec<usize>,
    connection_depth: usize,
    awaiting_variable_value: bool,
}

impl DtsxWalker {
    fn new(path: &Path, _source: &str) -> Self {
        DtsxWalker {
            doc_name: util::file_stem(path),
            doc_attrs: BTreeMap::new(),
            executables: Vec::new(),
            connections: Vec::new(),
            variables: Vec::new(),
            constraints: Vec::new(),
            warnings: Vec::new(),
            executable_depth: 0,
            open_executables: Vec::new(),
            connection_depth: 0,
            awaiting_variable_value: false,
        }
    }

    fn run(&mut self, source: &str) -> Result<()> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(true);
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => self.on_start(&start, false),
                Ok(Event::Empty(start)) => self.on_start(&start, true),
                Ok(Event::End(end)) => self.on_end(&local_name(end.name().as_ref())),
                Ok(Event::Text(text)) => {
                    if self.awaiting_variable_value {
                        if let Some((_, value)) = self.variables.last_mut() {
                            *value = text.unescape().ok().map(|v| v.to_string());
                        }
                        self.awaiting_variable_value = false;
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(crate::error::Error::malformed(
                        self.doc_name.clone(),
                        format!("invalid DTSX XML: {err}"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn on_start(&mut self, start: &BytesStart<'_>, empty: bool) {
        let name = local_name(start.name().as_ref());
        match name.as_str() {
            "Executable" => {
                let attrs = local_attributes(start);
                if self.executable_depth == 0 {
                    // The package element itself.
                    self.doc_attrs = attrs;
                    if let Some(object_name) = self.doc_attrs.get("ObjectName") {
                        self.doc_name = object_name.clone();
                    }
                } else {
                    let object_name = attrs.get("ObjectName").cloned().unwrap_or_default();
                    let partial = object_name.is_empty();
                    if partial {
                        self.warnings.push(format!(
                            "executable #{} has no ObjectName",
                            self.executables.len()
                        ));
                    }
                    self.executables.push(RawExecutable {
                        name: if object_name.is_empty() {
                            format!("Executable{}", self.executables.len())
                        } else {
                            object_name
                        },
                        dtsid: attrs.get("DTSID").cloned().unwrap_or_default(),
                        executable_type: attrs
                            .get("ExecutableType")
                            .cloned()
                            .unwrap_or_else(|| "Unknown".to_string()),
                        description: attrs.get("Description").cloned().filter(|d| !d.is_empty()),
                        sql: None,
                        partial,
                    });
                    if !empty {
                        self.open_executables.push(self.executables.len() - 1);
                    }
                }
                if !empty {
                    self.executable_depth += 1;
                }
            }
            "ConnectionManager" => {
                let attrs = local_attributes(start);
                if self.connection_depth > 0 {
                    // Inner ConnectionManager under ObjectData carries the
                    // connection string.
                    if let (Some(conn), Some(cs)) =
                        (self.connections.last_mut(), attrs.get("ConnectionString"))
                    {
                        conn.connection_string = Some(cs.clone());
                    }
                    if !empty {
                        self.connection_depth += 1;
                    }
                } else if attrs.contains_key("ObjectName") {
                    self.connections.push(RawConnection {
                        name: attrs.get("ObjectName").cloned().unwrap_or_default(),
                        creation_name: attrs.get("CreationName").cloned().unwrap_or_default(),
                        description: attrs.get("Description").cloned().filter(|d| !d.is_empty()),
                        connection_string: attrs.get("ConnectionString").cloned(),
                    });
                    if !empty {
                        self.connection_depth = 1;
                    }
                }
            }
            "Variable" => {
                self.variables.push((local_attributes(start), None));
            }
            "VariableValue" => {
                if !empty {
                    self.awaiting_variable_value = true;
                }
            }
            "PrecedenceConstraint" => {
                let attrs = local_attributes(start);
                let (from, to) = (
                    attrs.get("From").cloned().unwrap_or_default(),
                    attrs.get("To").cloned().unwrap_or_default(),
                );
                if from.is_empty() || to.is_empty() {
                    self.warnings
                        .push("precedence constraint with missing endpoint".to_string());
                } else {
                    self.constraints.push(RawConstraint {
                        from,
                        to,
                        value: attrs.get("Value").cloned(),
                        expression: attrs.get("Expression").cloned(),
                    });
                }
            }
            "SqlTaskData" => {
                let attrs = local_attributes(start);
                if let Some(sql) = attrs.get("SqlStatementSource") {
                    match self.open_executables.last() {
                        Some(&idx) => self.executables[idx].sql = Some(sql.clone()),
                        None => self
                            .warnings
                            .push("SqlTaskData outside of an executable".to_string()),
                    }
                }
            }
            _ => {}
        }
    }

    fn on_end(&mut self, name: &str) {
        match name {
            "Executable" => {
                self.executable_depth = self.executable_depth.saturating_sub(1);
                if self.executable_depth > 0 {
                    self.open_executables.pop();
                }
            }
            "ConnectionManager" => {
                self.connection_depth = self.connection_depth.saturating_sub(1);
            }
            "VariableValue" => self.awaiting_variable_value = false,
            _ => {}
        }
    }

    fn finish(self, source: &str, path: &Path) -> ParsedDocument {
        let mut document = document_for(path, DocumentKind::Ssis, self.doc_name.clone(), source.as_bytes());
        for key in ["DTSID", "Description", "CreatorName", "CreationDate"] {
            if let Some(value) = self.doc_attrs.get(key) {
                let custom_key = match key {
                    "DTSID" => "dts_id",
                    "Description" => "description",
                    "CreatorName" => "creator",
                    "CreationDate" => "created_date",
                    _ => key,
                };
                document.custom.insert(custom_key.to_string(), value.clone());
            }
        }
        if let (Some(major), Some(minor)) = (
            self.doc_attrs.get("VersionMajor"),
            self.doc_attrs.get("VersionMinor"),
        ) {
            document
                .custom
                .insert("version".to_string(), format!("{major}.{minor}"));
        }

        let mut parsed = ParsedDocument::new(document);
        parsed.warnings = self.warnings;
        let doc_id = parsed.document.id.clone();

        // Components, addressable by DTSID and by refId tail for constraints.
        let mut by_handle: BTreeMap<String, String> = BTreeMap::new();
        let mut entities: BTreeMap<String, DataEntity> = BTreeMap::new();
        for raw in &self.executables {
            let id = ident::component_id(&doc_id, &raw.name);
            if !raw.dtsid.is_empty() {
                by_handle.insert(raw.dtsid.clone(), id.clone());
            }
            by_handle.insert(raw.name.clone(), id.clone());
            let mut component = Component {
                id: id.clone(),
                name: raw.name.clone(),
                component_type: raw.executable_type.clone(),
                description: raw.description.clone(),
                source_excerpt: raw.sql.as_deref().and_then(|sql| util::excerpt(sql, EXCERPT_MAX_BYTES)),
                properties: BTreeMap::new(),
            };
            if raw.partial {
                component
                    .properties
                    .insert("parse_partial".to_string(), "true".to_string());
            }

            if let Some(sql) = &raw.sql {
                let lineage = sqlscan::scan(sql);
                for name in &lineage.reads {
                    let entity_id = intern_entity(&mut entities, name);
                    parsed.dependencies.push(
                        Dependency::new(id.clone(), entity_id, EdgeKind::ReadsFrom)
                            .with_property(sqlscan::CONFIDENCE_KEY, sqlscan::CONFIDENCE_BEST_EFFORT),
                    );
                }
                for name in &lineage.writes {
                    let entity_id = intern_entity(&mut entities, name);
                    parsed.dependencies.push(
                        Dependency::new(id.clone(), entity_id, EdgeKind::WritesTo)
                            .with_property(sqlscan::CONFIDENCE_KEY, sqlscan::CONFIDENCE_BEST_EFFORT),
                    );
                }
            }
            parsed.components.push(component);
        }

        for raw in &self.connections {
            let kind = connection_kind(&raw.creation_name);
            let locator = raw
                .connection_string
                .clone()
                .unwrap_or_else(|| raw.name.clone());
            let mut properties = BTreeMap::new();
            properties.insert("creation_name".to_string(), raw.creation_name.clone());
            if let Some(desc) = &raw.description {
                properties.insert("description".to_string(), desc.clone());
            }
            if let Some(cs) = &raw.connection_string {
                for (key, prop) in [
                    ("Data Source=", "server"),
                    ("Server=", "server"),
                    ("Initial Catalog=", "database"),
                    ("Database=", "database"),
                ] {
                    for part in cs.split(';') {
                        if let Some(value) = part.trim().strip_prefix(key) {
                            properties.insert(prop.to_string(), value.trim().to_string());
                        }
                    }
                }
            }
            parsed.data_sources.push(DataSource {
                id: ident::data_source_id(kind, &locator),
                name: raw.name.clone(),
                kind,
                locator,
                properties,
            });
        }

        for (attrs, value) in &self.variables {
            let name = match attrs.get("ObjectName") {
                Some(name) if !name.is_empty() => name.clone(),
                _ => continue,
            };
            let mut properties = BTreeMap::new();
            if let Some(namespace) = attrs.get("Namespace") {
                properties.insert("namespace".to_string(), namespace.clone());
            }
            parsed.parameters.push(Parameter {
                id: ident::parameter_id(&doc_id, &name),
                name,
                data_type: attrs.get("DataType").cloned(),
                value: value.clone(),
                properties,
            });
        }

        for constraint in &self.constraints {
            let from = resolve_handle(&by_handle, &constraint.from);
            let to = resolve_handle(&by_handle, &constraint.to);
            match (from, to) {
                (Some(from), Some(to)) => {
                    let mut dep = Dependency::new(from, to, EdgeKind::Precedes);
                    let condition = match constraint.value.as_deref() {
                        Some("2") => "failure",
                        Some("3") => "completion",
                        _ => "success",
                    };
                    dep = dep.with_property("condition", condition);
                    if let Some(expression) = &constraint.expression {
                        dep = dep.with_property("expression", expression.clone());
                    }
                    parsed.dependencies.push(dep);
                }
                _ => parsed.warnings.push(format!(
                    "unresolved precedence constraint {} -> {}",
                    constraint.from, constraint.to
                )),
            }
        }

        parsed.data_entities = entities.into_values().collect();
        parsed
    }
}

fn intern_entity(entities: &mut BTreeMap<String, DataEntity>, raw_name: &str) -> String {
    let (schema, bare) = ident::split_qualified(raw_name);
    let id = ident::data_entity_id(schema.as_deref(), &bare);
    entities.entry(id.clone()).or_insert_with(|| {
        let mut properties = BTreeMap::new();
        if let Some(schema) = schema {
            properties.insert("schema".to_string(), schema);
        }
        DataEntity {
            id: id.clone(),
            name: bare,
            qualified_name: raw_name.to_string(),
            entity_type: EntityKind::Table,
            columns: Vec::new(),
            properties,
        }
    });
    id
}

/// Constraint endpoints are DTSIDs in older dialects and `Package\Task`
/// ref-ids in newer ones; fall back to the trailing path segment.
fn resolve_handle(by_handle: &BTreeMap<String, String>, raw: &str) -> Option<String> {
    if let Some(id) = by_handle.get(raw) {
        return Some(id.clone());
    }
    let tail = raw.rsplit('\\').next().unwrap_or(raw);
    by_handle.get(tail).cloned()
}

fn connection_kind(creation_name: &str) -> SourceKind {
    let upper = creation_name.to_uppercase();
    if upper.contains("OLEDB") || upper.contains("ADO") || upper.contains("ODBC") || upper.contains("SQL")
    {
        SourceKind::Db
    } else if upper.contains("FLATFILE") || upper.contains("FILE") {
        SourceKind::File
    } else if upper.contains("FTP") {
        SourceKind::Ftp
    } else if upper.contains("HTTP") {
        SourceKind::Http
    } else {
        SourceKind::Unknown
    }
}
