use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Ssis,
    Cobol,
    Jcl,
    JsonConfig,
    Excel,
    CsvLineage,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Ssis => "ssis",
            DocumentKind::Cobol => "cobol",
            DocumentKind::Jcl => "jcl",
            DocumentKind::JsonConfig => "json_config",
            DocumentKind::Excel => "excel",
            DocumentKind::CsvLineage => "csv_lineage",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Component,
    DataSource,
    DataEntity,
    Parameter,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Component => "component",
            NodeKind::DataSource => "data_source",
            NodeKind::DataEntity => "data_entity",
            NodeKind::Parameter => "parameter",
        }
    }

    pub fn parse(raw: &str) -> Option<NodeKind> {
        match raw {
            "document" => Some(NodeKind::Document),
            "component" => Some(NodeKind::Component),
            "data_source" => Some(NodeKind::DataSource),
            "data_entity" => Some(NodeKind::DataEntity),
            "parameter" => Some(NodeKind::Parameter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Precedes,
    ReadsFrom,
    WritesTo,
    Calls,
    Uses,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Precedes => "PRECEDES",
            EdgeKind::ReadsFrom => "READS_FROM",
            EdgeKind::WritesTo => "WRITES_TO",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Uses => "USES",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Db,
    File,
    Dataset,
    Ftp,
    Http,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    Record,
    Sheet,
    Range,
    Dataset,
}

/// One source artifact after parsing. Owns its components; destroyed only by
/// an explicit unload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub kind: DocumentKind,
    pub source_path: String,
    pub content_hash: String,
    pub parsed_at: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// A unit of work inside a document: an SSIS task, a COBOL paragraph, a JCL
/// step, a JSON job, an Excel sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub component_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub locator: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEntity {
    pub id: String,
    pub name: String,
    /// Schema-qualified form when the source carried one (`dbo.Customer`).
    pub qualified_name: String,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// A by-name reference to a document that does not have to exist yet
/// (`CALL 'CUST001'`, `EXEC PGM=CUST001`). The builder resolves these on
/// commit; until then the edge is invisible to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTarget {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred: Option<DeferredTarget>,
}

impl Dependency {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: EdgeKind) -> Self {
        Dependency {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            properties: BTreeMap::new(),
            deferred: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn deferred_call(from_id: impl Into<String>, target_name: impl Into<String>) -> Self {
        Dependency {
            from_id: from_id.into(),
            to_id: String::new(),
            kind: EdgeKind::Calls,
            properties: BTreeMap::new(),
            deferred: Some(DeferredTarget {
                name: target_name.into(),
            }),
        }
    }
}

/// Universal parser output. Self-consistent: every dependency endpoint is
/// either defined in this document, carried as a shared data source/entity,
/// or a deferred reference. Parsers never assume prior graph state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub document: Document,
    pub components: Vec<Component>,
    pub data_sources: Vec<DataSource>,
    pub data_entities: Vec<DataEntity>,
    pub parameters: Vec<Parameter>,
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ParsedDocument {
    pub fn new(document: Document) -> Self {
        ParsedDocument {
            document,
            components: Vec::new(),
            data_sources: Vec::new(),
            data_entities: Vec::new(),
            parameters: Vec::new(),
            dependencies: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

// Graph-side values.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node_kind", rename_all = "snake_case")]
pub enum Node {
    Document(Document),
    Component(Component),
    DataSource(DataSource),
    DataEntity(DataEntity),
    Parameter(Parameter),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Document(n) => &n.id,
            Node::Component(n) => &n.id,
            Node::DataSource(n) => &n.id,
            Node::DataEntity(n) => &n.id,
            Node::Parameter(n) => &n.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Document(n) => &n.name,
            Node::Component(n) => &n.name,
            Node::DataSource(n) => &n.name,
            Node::DataEntity(n) => &n.name,
            Node::Parameter(n) => &n.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Document(_) => NodeKind::Document,
            Node::Component(_) => NodeKind::Component,
            Node::DataSource(_) => NodeKind::DataSource,
            Node::DataEntity(_) => NodeKind::DataEntity,
            Node::Parameter(_) => NodeKind::Parameter,
        }
    }

    /// The text surface indexed for semantic discovery.
    pub fn text_surface(&self) -> String {
        match self {
            Node::Document(n) => {
                let mut text = n.name.clone();
                if let Some(desc) = n.custom.get("description") {
                    text.push(' ');
                    text.push_str(desc);
                }
                text
            }
            Node::Component(n) => {
                let mut text = format!("{} {}", n.name, n.component_type);
                if let Some(desc) = &n.description {
                    text.push(' ');
                    text.push_str(desc);
                }
                if let Some(excerpt) = &n.source_excerpt {
                    text.push(' ');
                    text.push_str(excerpt);
                }
                text
            }
            Node::DataSource(n) => format!("{} {}", n.name, n.locator),
            Node::DataEntity(n) => n.qualified_name.clone(),
            Node::Parameter(n) => n.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Compact node view returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRef {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
}

impl From<&Node> for NodeRef {
    fn from(node: &Node) -> Self {
        NodeRef {
            id: node.id().to_string(),
            kind: node.kind(),
            name: node.name().to_string(),
        }
    }
}

// Reports.

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub document_id: String,
    pub no_op: bool,
    pub added_nodes: usize,
    pub updated_nodes: usize,
    pub removed_nodes: usize,
    pub added_edges: usize,
    pub removed_edges: usize,
    pub resolved_refs: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_node_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_node_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub document_id: String,
    pub removed_nodes: usize,
    pub removed_edges: usize,
    pub removed_node_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedRef {
    pub from_id: String,
    pub target_name: String,
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub by_node_kind: BTreeMap<String, usize>,
    pub by_edge_kind: BTreeMap<String, usize>,
    pub by_document_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub path: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub root: String,
    pub discovered: usize,
    pub admitted: usize,
    pub skipped_unsupported: usize,
    pub parsed: usize,
    pub partial: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<IngestFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved_refs: Vec<UnresolvedRef>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
