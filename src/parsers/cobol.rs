//! COBOL program parser.
//!
//! Fixed-form source: columns 7-72 are significant, column 7 carries the
//! comment indicator. Free-form source is accepted behind the
//! `TRACEAI_COBOL_FREE_FORM` flag.

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    Component, DataEntity, DataSource, Dependency, DocumentKind, EdgeKind, EntityKind,
    ParsedDocument, SourceKind,
};
use crate::parsers::{document_for, read_source, FormatParser};
use crate::{ident, sqlscan, util};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

const EXCERPT_MAX_BYTES: usize = 500;

struct Patterns {
    program_id: Regex,
    author: Regex,
    file_control: Regex,
    select: Regex,
    working_storage: Regex,
    record: Regex,
    field: Regex,
    procedure: Regex,
    paragraph: Regex,
    perform: Regex,
    call: Regex,
    read: Regex,
    write: Regex,
    rewrite_delete: Regex,
    exec_sql: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        program_id: Regex::new(r"(?i)PROGRAM-ID\.\s+([A-Z0-9-]+)").expect("program-id pattern"),
        author: Regex::new(r"(?i)AUTHOR\.\s+([^\n.]+)").expect("author pattern"),
        file_control: Regex::new(
            r"(?is)FILE-CONTROL\.(.*?)(?:DATA\s+DIVISION|WORKING-STORAGE|PROCEDURE\s+DIVISION|\z)",
        )
        .expect("file-control pattern"),
        select: Regex::new(r#"(?i)SELECT\s+([A-Z0-9-]+)\s+ASSIGN\s+TO\s+['"]?([^'"\s.]+)"#)
            .expect("select pattern"),
        working_storage: Regex::new(r"(?is)WORKING-STORAGE\s+SECTION\.(.*?)(?:PROCEDURE\s+DIVISION|\z)")
            .expect("working-storage pattern"),
        record: Regex::new(r"(?im)^\s*01\s+([A-Z0-9-]+)\s*\.?\s*$").expect("record pattern"),
        field: Regex::new(r"(?im)^\s*(\d+)\s+([A-Z0-9-]+)\s+PIC\s+([X9VSA()\d]+)")
            .expect("field pattern"),
        procedure: Regex::new(r"(?is)PROCEDURE\s+DIVISION[^.]*\.(.*)\z").expect("procedure pattern"),
        paragraph: Regex::new(r"(?im)^\s*([A-Z0-9][A-Z0-9-]*)\s*\.\s*$").expect("paragraph pattern"),
        // Statement verbs are anchored so END-READ/END-PERFORM scope
        // terminators never capture the following token.
        perform: Regex::new(r"(?im)(?:^|[ \t])PERFORM\s+([A-Z0-9-]+)").expect("perform pattern"),
        call: Regex::new(r#"(?i)CALL\s+['"]([^'"]+)['"]"#).expect("call pattern"),
        read: Regex::new(r"(?im)^\s*READ\s+([A-Z0-9-]+)").expect("read pattern"),
        write: Regex::new(r"(?im)^\s*WRITE\s+([A-Z0-9-]+)").expect("write pattern"),
        rewrite_delete: Regex::new(r"(?im)^\s*(?:REWRITE|DELETE)\s+([A-Z0-9-]+)")
            .expect("rewrite pattern"),
        exec_sql: Regex::new(r"(?is)EXEC\s+SQL\s+(.*?)\s*END-EXEC").expect("exec-sql pattern"),
    })
}

/// Verbs that follow PERFORM without naming a paragraph.
const PERFORM_KEYWORDS: &[&str] = &["VARYING", "UNTIL", "TIMES", "WITH", "TEST"];
const NON_PARAGRAPH_LABELS: &[&str] = &["STOP", "EXIT", "GOBACK"];

/// A line like `END-EXEC.` or `GOBACK.` matches the paragraph-label shape
/// but is a statement terminator, not a label.
fn is_paragraph_label(name: &str) -> bool {
    !name.starts_with("END-") && !NON_PARAGRAPH_LABELS.contains(&name)
}

pub struct CobolParser {
    free_form: bool,
}

impl CobolParser {
    pub fn new() -> Self {
        CobolParser {
            free_form: Config::get().cobol_free_form,
        }
    }

    pub fn with_free_form(free_form: bool) -> Self {
        CobolParser { free_form }
    }
}

impl Default for CobolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for CobolParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Cobol
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cbl", "cob"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let upper = content[..content.len().min(4096)].to_uppercase();
                upper.contains("IDENTIFICATION DIVISION") || upper.contains("PROGRAM-ID")
            }
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let raw = read_source(path)?;
        let content = if self.free_form {
            strip_free_form_comments(&raw)
        } else {
            normalize_fixed_form(&raw)
        };
        let p = patterns();

        let program_id = p
            .program_id
            .captures(&content)
            .map(|caps| caps[1].to_string());
        let name = program_id.unwrap_or_else(|| util::file_stem(path).to_uppercase());

        let mut document = document_for(path, DocumentKind::Cobol, name, raw.as_bytes());
        if let Some(caps) = p.author.captures(&content) {
            document
                .custom
                .insert("author".to_string(), caps[1].trim().to_string());
        }
        let mut parsed = ParsedDocument::new(document);
        let doc_id = parsed.document.id.clone();

        // FILE-CONTROL: SELECT name ASSIGN TO target.
        let mut files: BTreeMap<String, DataSource> = BTreeMap::new();
        if let Some(caps) = p.file_control.captures(&content) {
            for select in p.select.captures_iter(&caps[1]) {
                let file_name = select[1].to_uppercase();
                let assign_to = select[2].to_string();
                files.entry(file_name.clone()).or_insert_with(|| DataSource {
                    id: ident::data_source_id(SourceKind::File, &file_name),
                    name: file_name,
                    kind: SourceKind::File,
                    locator: assign_to,
                    properties: BTreeMap::new(),
                });
            }
        }

        // WORKING-STORAGE 01-level records.
        if let Some(caps) = p.working_storage.captures(&content) {
            let section = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let records: Vec<_> = p.record.captures_iter(section).collect();
            for (i, record) in records.iter().enumerate() {
                let record_name = record[1].to_uppercase();
                if NON_PARAGRAPH_LABELS.contains(&record_name.as_str()) {
                    continue;
                }
                let start = record.get(0).map(|m| m.end()).unwrap_or(0);
                let end = records
                    .get(i + 1)
                    .and_then(|next| next.get(0))
                    .map(|m| m.start())
                    .unwrap_or(section.len());
                let body = &section[start..end];
                let columns: Vec<String> = p
                    .field
                    .captures_iter(body)
                    .map(|field| field[2].to_uppercase())
                    .collect();
                parsed.data_entities.push(DataEntity {
                    id: ident::data_entity_id(None, &record_name),
                    name: record_name.clone(),
                    qualified_name: record_name,
                    entity_type: EntityKind::Record,
                    columns,
                    properties: BTreeMap::new(),
                });
            }
        }

        // PROCEDURE DIVISION paragraphs.
        let procedure = p
            .procedure
            .captures(&content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let labels: Vec<_> = p
            .paragraph
            .captures_iter(&procedure)
            .filter(|caps| is_paragraph_label(&caps[1].to_uppercase()))
            .collect();
        let mut paragraph_names: BTreeSet<String> = BTreeSet::new();
        for label in &labels {
            paragraph_names.insert(label[1].to_uppercase());
        }

        let mut sql_entities: BTreeMap<String, DataEntity> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            let para_name = label[1].to_uppercase();
            let start = label.get(0).map(|m| m.end()).unwrap_or(0);
            let end = labels
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(procedure.len());
            let body = &procedure[start..end];
            let component_id = ident::component_id(&doc_id, &para_name);

            parsed.components.push(Component {
                id: component_id.clone(),
                name: para_name.clone(),
                component_type: "paragraph".to_string(),
                description: None,
                source_excerpt: util::excerpt(body, EXCERPT_MAX_BYTES),
                properties: BTreeMap::new(),
            });

            // SQL verbs (DELETE FROM, READ of a cursor) must not look like
            // file I/O, so the verb scans run on the body minus SQL blocks.
            let body_no_sql = p.exec_sql.replace_all(body, " ");
            let body_no_sql = body_no_sql.as_ref();

            for perform in p.perform.captures_iter(body_no_sql) {
                let target = perform[1].to_uppercase();
                if PERFORM_KEYWORDS.contains(&target.as_str()) {
                    continue;
                }
                if paragraph_names.contains(&target) && target != para_name {
                    parsed.dependencies.push(Dependency::new(
                        component_id.clone(),
                        ident::component_id(&doc_id, &target),
                        EdgeKind::Calls,
                    ));
                }
            }

            for call in p.call.captures_iter(body_no_sql) {
                parsed
                    .dependencies
                    .push(Dependency::deferred_call(component_id.clone(), call[1].to_uppercase()));
            }

            for read in p.read.captures_iter(body_no_sql) {
                let target = read[1].to_uppercase();
                let source_id = file_source(&mut files, &target);
                parsed
                    .dependencies
                    .push(Dependency::new(component_id.clone(), source_id, EdgeKind::ReadsFrom));
            }
            for write in p
                .write
                .captures_iter(body_no_sql)
                .chain(p.rewrite_delete.captures_iter(body_no_sql))
            {
                let target = write[1].to_uppercase();
                let source_id = file_source(&mut files, &target);
                parsed
                    .dependencies
                    .push(Dependency::new(component_id.clone(), source_id, EdgeKind::WritesTo));
            }

            for sql in p.exec_sql.captures_iter(body) {
                let lineage = sqlscan::scan(&sql[1]);
                for name in &lineage.reads {
                    let entity_id = intern_sql_entity(&mut sql_entities, name);
                    parsed.dependencies.push(
                        Dependency::new(component_id.clone(), entity_id, EdgeKind::ReadsFrom)
                            .with_property(sqlscan::CONFIDENCE_KEY, sqlscan::CONFIDENCE_BEST_EFFORT),
                    );
                }
                for name in &lineage.writes {
                    let entity_id = intern_sql_entity(&mut sql_entities, name);
                    parsed.dependencies.push(
                        Dependency::new(component_id.clone(), entity_id, EdgeKind::WritesTo)
                            .with_property(sqlscan::CONFIDENCE_KEY, sqlscan::CONFIDENCE_BEST_EFFORT),
                    );
                }
            }
        }

        parsed.data_sources = files.into_values().collect();
        parsed
            .data_entities
            .extend(sql_entities.into_values());
        Ok(parsed)
    }
}

/// Known file (declared by SELECT) or synthesized so READ/WRITE targets keep
/// the ParsedDocument self-consistent.
fn file_source(files: &mut BTreeMap<String, DataSource>, name: &str) -> String {
    if let Some(existing) = files.get(name) {
        return existing.id.clone();
    }
    let source = DataSource {
        id: ident::data_source_id(SourceKind::File, name),
        name: name.to_string(),
        kind: SourceKind::File,
        locator: name.to_string(),
        properties: BTreeMap::new(),
    };
    let id = source.id.clone();
    files.insert(name.to_string(), source);
    id
}

fn intern_sql_entity(entities: &mut BTreeMap<String, DataEntity>, raw_name: &str) -> String {
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

/// Columns 1-6 are sequence numbers, column 7 the indicator, 73+ is the
/// identification area. Comment lines (`*` or `/` in column 7) drop out.
fn normalize_fixed_form(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.len() <= 6 {
            out.push('\n');
            continue;
        }
        if chars[6] == '*' || chars[6] == '/' {
            continue;
        }
        let end = chars.len().min(72);
        let body: String = chars[7.min(chars.len())..end].iter().collect();
        out.push_str(&body);
        out.push('\n');
    }
    out
}

fn strip_free_form_comments(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("*>"))
        .collect::<Vec<_>>()
        .join("\n")
}
