//! JCL batch job parser.
//!
//! 80-column card images: `//NAME OP OPERANDS`. Statement text past column
//! 71 is continuation/sequence area and is cut before matching. Step order
//! induces PRECEDES; `EXEC PGM=X` produces a deferred CALLS edge resolved
//! when a program document named X shows up.

use crate::error::Result;
use crate::model::{
    Component, DataSource, Dependency, DocumentKind, EdgeKind, ParsedDocument, SourceKind,
};
use crate::parsers::{document_for, read_source, FormatParser};
use crate::{ident, util};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

const EXCERPT_MAX_BYTES: usize = 500;

struct Patterns {
    job: Regex,
    exec: Regex,
    dd: Regex,
    dsn: Regex,
    disp: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        job: Regex::new(r"(?m)^//([A-Z0-9#$@]+)\s+JOB\b").expect("job pattern"),
        exec: Regex::new(r"(?m)^//([A-Z0-9#$@]+)\s+EXEC\s+(?:PGM=([A-Z0-9#$@]+)|PROC=([A-Z0-9#$@]+)|([A-Z0-9#$@]+))")
            .expect("exec pattern"),
        dd: Regex::new(r"(?m)^//([A-Z0-9#$@.]+)\s+DD\s+(.+)$").expect("dd pattern"),
        dsn: Regex::new(r"(?i)DSN=([A-Z0-9.&()#$@]+)").expect("dsn pattern"),
        disp: Regex::new(r"(?i)DISP=\(?([A-Z]+)").expect("disp pattern"),
    })
}

pub struct JclParser;

impl JclParser {
    pub fn new() -> Self {
        JclParser
    }
}

impl Default for JclParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for JclParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Jcl
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jcl"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.starts_with("//"))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let raw = read_source(path)?;
        let content = clip_to_statement_area(&raw);
        let p = patterns();

        let job_name = p.job.captures(&content).map(|caps| caps[1].to_string());
        let name = job_name.unwrap_or_else(|| util::file_stem(path).to_uppercase());
        let document = document_for(path, DocumentKind::Jcl, name, raw.as_bytes());
        let mut parsed = ParsedDocument::new(document);
        let doc_id = parsed.document.id.clone();

        let mut datasets: BTreeMap<String, DataSource> = BTreeMap::new();
        let execs: Vec<_> = p.exec.captures_iter(&content).collect();
        let mut step_ids: Vec<String> = Vec::new();

        for (i, exec) in execs.iter().enumerate() {
            let step_name = exec[1].to_string();
            let program = exec
                .get(2)
                .or_else(|| exec.get(3))
                .or_else(|| exec.get(4))
                .map(|m| m.as_str().to_string());
            let is_proc = exec.get(2).is_none();

            let start = exec.get(0).map(|m| m.end()).unwrap_or(0);
            let end = execs
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(content.len());
            let step_body = &content[exec.get(0).map(|m| m.start()).unwrap_or(start)..end];

            let component_id = ident::component_id(&doc_id, &step_name);
            let mut properties = BTreeMap::new();
            if let Some(program) = &program {
                let key = if is_proc { "proc" } else { "program" };
                properties.insert(key.to_string(), program.clone());
            }

            let mut dd_count = 0usize;
            for dd in p.dd.captures_iter(step_body) {
                dd_count += 1;
                let dd_name = dd[1].to_string();
                let params = dd[2].to_string();
                let Some(dsn) = p.dsn.captures(&params).map(|caps| caps[1].to_string()) else {
                    continue;
                };
                let source_id = dataset_source(&mut datasets, &dsn);
                let kind = dd_edge_kind(p, &params);
                parsed.dependencies.push(
                    Dependency::new(component_id.clone(), source_id, kind)
                        .with_property("dd", dd_name)
                        .with_property("parameters", params.trim().to_string()),
                );
            }
            properties.insert("dd_count".to_string(), dd_count.to_string());

            parsed.components.push(Component {
                id: component_id.clone(),
                name: step_name,
                component_type: "step".to_string(),
                description: program
                    .as_ref()
                    .map(|program| format!("executes {program}")),
                source_excerpt: util::excerpt(step_body, EXCERPT_MAX_BYTES),
                properties,
            });

            if let Some(previous) = step_ids.last() {
                parsed.dependencies.push(Dependency::new(
                    previous.clone(),
                    component_id.clone(),
                    EdgeKind::Precedes,
                ));
            }
            if let Some(program) = program {
                parsed
                    .dependencies
                    .push(Dependency::deferred_call(component_id.clone(), program));
            }
            step_ids.push(component_id);
        }

        parsed.data_sources = datasets.into_values().collect();
        Ok(parsed)
    }
}

/// JCL is fixed 80-column; columns 73-80 hold sequence numbers.
fn clip_to_statement_area(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let clipped: String = line.chars().take(71).collect();
        out.push_str(&clipped);
        out.push('\n');
    }
    out
}

fn dataset_source(datasets: &mut BTreeMap<String, DataSource>, dsn: &str) -> String {
    if let Some(existing) = datasets.get(dsn) {
        return existing.id.clone();
    }
    let kind = if dsn.to_uppercase().starts_with("DB2.") {
        SourceKind::Db
    } else {
        SourceKind::Dataset
    };
    let source = DataSource {
        id: ident::data_source_id(kind, dsn),
        name: dsn.to_string(),
        kind,
        locator: dsn.to_string(),
        properties: BTreeMap::new(),
    };
    let id = source.id.clone();
    datasets.insert(dsn.to_string(), source);
    id
}

/// DISP=SHR / DISP=OLD (and catalogued reads) are input; DISP=NEW / MOD and
/// `(,CATLG` creations are output. Missing DISP defaults to a read.
fn dd_edge_kind(p: &Patterns, params: &str) -> EdgeKind {
    let upper = params.to_uppercase();
    if upper.contains("DISP=(,CATLG") {
        return EdgeKind::WritesTo;
    }
    match p.disp.captures(&upper).map(|caps| caps[1].to_string()) {
        Some(disp) if disp == "NEW" || disp == "MOD" => EdgeKind::WritesTo,
        _ => EdgeKind::ReadsFrom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disp_classification() {
        let p = patterns();
        assert_eq!(dd_edge_kind(p, "DSN=A.B,DISP=SHR"), EdgeKind::ReadsFrom);
        assert_eq!(dd_edge_kind(p, "DSN=A.B,DISP=OLD"), EdgeKind::ReadsFrom);
        assert_eq!(
            dd_edge_kind(p, "DSN=A.B,DISP=(NEW,CATLG,DELETE)"),
            EdgeKind::WritesTo
        );
        assert_eq!(dd_edge_kind(p, "DSN=A.B,DISP=MOD"), EdgeKind::WritesTo);
        assert_eq!(dd_edge_kind(p, "DSN=A.B,DISP=(,CATLG)"), EdgeKind::WritesTo);
        assert_eq!(dd_edge_kind(p, "DSN=A.B"), EdgeKind::ReadsFrom);
    }

    #[test]
    fn statement_area_clip() {
        let mut line = String::from("//STEP01   EXEC PGM=CUST001");
        while line.chars().count() < 71 {
            line.push(' ');
        }
        line.push_str("SEQ00100");
        let clipped = clip_to_statement_area(&line);
        assert!(clipped.contains("PGM=CUST001"));
        assert!(!clipped.contains("SEQ00100"));
    }

    #[test]
    fn db2_datasets_are_database_sources() {
        let mut datasets = BTreeMap::new();
        dataset_source(&mut datasets, "DB2.SCHEMA.TABLE");
        dataset_source(&mut datasets, "SALES.INPUT.TRANS");
        assert_eq!(datasets["DB2.SCHEMA.TABLE"].kind, SourceKind::Db);
        assert_eq!(datasets["SALES.INPUT.TRANS"].kind, SourceKind::Dataset);
    }
}
