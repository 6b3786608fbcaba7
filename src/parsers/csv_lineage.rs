//! CSV lineage-map parser.
//!
//! Recognized header shapes: `(source, target)`,
//! `(source_field, target_field)` and
//! `(source_table, target_table, transformation_logic)`. The delimiter is
//! sniffed among comma, semicolon and tab. Every data row becomes a
//! `source --WRITES_TO--> target` edge between interned entity nodes.

use crate::error::{Error, Result};
use crate::model::{
    DataEntity, Dependency, DocumentKind, EdgeKind, EntityKind, ParsedDocument,
};
use crate::parsers::{document_for, read_source, FormatParser};
use crate::{ident, util};
use std::collections::BTreeMap;
use std::path::Path;

const DELIMITERS: &[char] = &[',', ';', '\t'];

pub struct CsvLineageParser;

impl CsvLineageParser {
    pub fn new() -> Self {
        CsvLineageParser
    }
}

impl Default for CsvLineageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for CsvLineageParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::CsvLineage
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let Some(header) = content.lines().next() else {
                    return false;
                };
                let delimiter = sniff_delimiter(header);
                header_columns(header, delimiter).is_some()
            }
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let display = util::normalize_path(path);
        let raw = read_source(path)?;
        let mut lines = raw.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::malformed(&display, "empty file"))?;
        let delimiter = sniff_delimiter(header);
        let columns = header_columns(header, delimiter)
            .ok_or_else(|| Error::malformed(&display, "unrecognized lineage header"))?;

        let mut document =
            document_for(path, DocumentKind::CsvLineage, util::file_stem(path), raw.as_bytes());
        document
            .custom
            .insert("columns".to_string(), columns.join(","));
        let mut parsed = ParsedDocument::new(document);

        let source_idx = find_column(&columns, &["source", "source_field", "source_table"]);
        let target_idx = find_column(&columns, &["target", "target_field", "target_table"]);
        let transform_idx = find_column(&columns, &["transformation_logic", "transformation"]);
        let (Some(source_idx), Some(target_idx)) = (source_idx, target_idx) else {
            return Err(Error::malformed(&display, "missing source/target columns"));
        };

        let mut entities: BTreeMap<String, DataEntity> = BTreeMap::new();
        for (line_no, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields = split_record(line, delimiter);
            let source = fields.get(source_idx).map(|f| f.trim()).unwrap_or("");
            let target = fields.get(target_idx).map(|f| f.trim()).unwrap_or("");
            if source.is_empty() || target.is_empty() {
                parsed
                    .warnings
                    .push(format!("row {} skipped: empty source or target", line_no + 2));
                continue;
            }

            let source_id = intern(&mut entities, source);
            let target_id = intern(&mut entities, target);
            let mut dep = Dependency::new(source_id, target_id, EdgeKind::WritesTo);
            if let Some(idx) = transform_idx {
                if let Some(logic) = fields.get(idx).map(|f| f.trim()).filter(|f| !f.is_empty()) {
                    dep = dep.with_property("transformation", logic);
                }
            }
            parsed.dependencies.push(dep);
        }

        parsed.data_entities = entities.into_values().collect();
        Ok(parsed)
    }
}

/// Highest column count on the header wins; comma on a tie.
fn sniff_delimiter(header: &str) -> char {
    let mut best = ',';
    let mut best_count = 0usize;
    for &candidate in DELIMITERS {
        let count = split_record(header, candidate).len();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn header_columns(header: &str, delimiter: char) -> Option<Vec<String>> {
    let columns: Vec<String> = split_record(header, delimiter)
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    let has = |name: &str| columns.iter().any(|c| c == name);
    let recognized = (has("source") && has("target"))
        || (has("source_field") && has("target_field"))
        || (has("source_table") && has("target_table"));
    if recognized {
        Some(columns)
    } else {
        None
    }
}

fn find_column(columns: &[String], candidates: &[&str]) -> Option<usize> {
    for candidate in candidates {
        if let Some(idx) = columns.iter().position(|c| c == candidate) {
            return Some(idx);
        }
    }
    None
}

/// RFC 4180 field split: quoted fields may contain the delimiter, doubled
/// quotes escape a literal quote.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
        } else if ch == '"' && field.is_empty() {
            in_quotes = true;
        } else if ch == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(ch);
        }
    }
    fields.push(field);
    fields
}

fn intern(entities: &mut BTreeMap<String, DataEntity>, raw_name: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_sniffing() {
        assert_eq!(sniff_delimiter("source,target"), ',');
        assert_eq!(sniff_delimiter("source;target;extra"), ';');
        assert_eq!(sniff_delimiter("source\ttarget"), '\t');
    }

    #[test]
    fn quoted_fields_keep_delimiters() {
        let fields = split_record(r#"a,"b,c",d"#, ',');
        assert_eq!(fields, vec!["a", "b,c", "d"]);
    }

    #[test]
    fn doubled_quotes_escape() {
        let fields = split_record(r#""say ""hi""",x"#, ',');
        assert_eq!(fields, vec![r#"say "hi""#, "x"]);
    }

    #[test]
    fn header_recognition() {
        assert!(header_columns("source,target", ',').is_some());
        assert!(header_columns("Source_Table,Target_Table,Transformation_Logic", ',').is_some());
        assert!(header_columns("name,age", ',').is_none());
    }
}
