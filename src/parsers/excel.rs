//! XLSX workbook parser (formulas only, no rendering).
//!
//! An xlsx file is a zip of Office Open XML parts. Only three part families
//! matter here: `xl/workbook.xml` (sheet list + defined names),
//! `xl/worksheets/sheetN.xml` (cell formulas) and `xl/tables/*.xml` (table
//! definitions).

use crate::error::{Error, Result};
use crate::model::{
    Component, DataEntity, Dependency, DocumentKind, EdgeKind, EntityKind, Parameter,
    ParsedDocument,
};
use crate::parsers::{document_for, read_source_bytes, FormatParser};
use crate::{ident, util};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;
use zip::ZipArchive;

fn sheet_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:'([^']+)'|([A-Za-z_][A-Za-z0-9_.]*))!").expect("sheet ref pattern")
    })
}

fn lookup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(?:VLOOKUP|INDEX)\s*\(").expect("lookup pattern"))
}

pub struct ExcelParser;

impl ExcelParser {
    pub fn new() -> Self {
        ExcelParser
    }
}

impl Default for ExcelParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for ExcelParser {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Excel
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx", "xlsm"]
    }

    fn validate(&self, path: &Path) -> bool {
        match std::fs::read(path) {
            Ok(bytes) => bytes.starts_with(b"PK\x03\x04"),
            Err(_) => false,
        }
    }

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let display = util::normalize_path(path);
        let bytes = read_source_bytes(path)?;
        let mut archive = ZipArchive::new(Cursor::new(&bytes))
            .map_err(|err| Error::malformed(&display, format!("not a zip archive: {err}")))?;

        let workbook_xml = read_part(&mut archive, "xl/workbook.xml")
            .ok_or_else(|| Error::malformed(&display, "missing xl/workbook.xml"))?;
        let workbook = parse_workbook(&workbook_xml);
        if workbook.sheets.is_empty() {
            return Err(Error::malformed(&display, "workbook defines no sheets"));
        }

        let document = document_for(path, DocumentKind::Excel, util::file_stem(path), &bytes);
        let mut parsed = ParsedDocument::new(document);
        let doc_id = parsed.document.id.clone();
        parsed
            .document
            .custom
            .insert("sheet_count".to_string(), workbook.sheets.len().to_string());

        // Tables first so formula scanning can resolve structured references.
        let table_parts: Vec<String> = archive
            .file_names()
            .filter(|name| name.starts_with("xl/tables/") && name.ends_with(".xml"))
            .map(|name| name.to_string())
            .collect();
        let mut tables: Vec<(String, String)> = Vec::new();
        for part in table_parts {
            if let Some(xml) = read_part(&mut archive, &part) {
                if let Some(table) = parse_table(&xml) {
                    tables.push(table);
                }
            }
        }
        for (name, range) in &tables {
            let id = ident::data_entity_id(None, name);
            if parsed.data_entities.iter().any(|e| e.id == id) {
                continue;
            }
            let mut properties = BTreeMap::new();
            properties.insert("range".to_string(), range.clone());
            parsed.data_entities.push(DataEntity {
                id,
                name: name.clone(),
                qualified_name: name.clone(),
                entity_type: EntityKind::Table,
                columns: Vec::new(),
                properties,
            });
        }

        for (name, value) in &workbook.defined_names {
            parsed.parameters.push(Parameter {
                id: ident::parameter_id(&doc_id, name),
                name: name.clone(),
                data_type: Some("range".to_string()),
                value: Some(value.clone()),
                properties: BTreeMap::new(),
            });
        }

        // Sheets are stored as xl/worksheets/sheet{N}.xml in workbook order.
        for (idx, sheet_name) in workbook.sheets.iter().enumerate() {
            let part = format!("xl/worksheets/sheet{}.xml", idx + 1);
            let formulas = match read_part(&mut archive, &part) {
                Some(xml) => parse_formulas(&xml),
                None => {
                    parsed
                        .warnings
                        .push(format!("worksheet part missing for sheet `{sheet_name}`"));
                    Vec::new()
                }
            };

            let component_id = ident::component_id(&doc_id, sheet_name);
            let mut properties = BTreeMap::new();
            properties.insert("formula_count".to_string(), formulas.len().to_string());
            parsed.components.push(Component {
                id: component_id.clone(),
                name: sheet_name.clone(),
                component_type: "sheet".to_string(),
                description: None,
                source_excerpt: None,
                properties,
            });

            let mut called: Vec<String> = Vec::new();
            let mut reads: Vec<String> = Vec::new();
            for formula in &formulas {
                for caps in sheet_ref_pattern().captures_iter(formula) {
                    let referenced = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if referenced.is_empty() || referenced == sheet_name.as_str() {
                        continue;
                    }
                    if workbook.sheets.iter().any(|s| s == referenced)
                        && !called.iter().any(|s| s == referenced)
                    {
                        called.push(referenced.to_string());
                    }
                }
                let is_lookup = lookup_pattern().is_match(formula);
                for (table_name, _) in &tables {
                    let structured = format!("{table_name}[");
                    if (is_lookup && formula.contains(table_name.as_str()))
                        || formula.contains(&structured)
                    {
                        if !reads.iter().any(|t| t == table_name) {
                            reads.push(table_name.clone());
                        }
                    }
                }
            }

            for referenced in called {
                parsed.dependencies.push(Dependency::new(
                    component_id.clone(),
                    ident::component_id(&doc_id, &referenced),
                    EdgeKind::Calls,
                ));
            }
            for table_name in reads {
                parsed.dependencies.push(Dependency::new(
                    component_id.clone(),
                    ident::data_entity_id(None, &table_name),
                    EdgeKind::ReadsFrom,
                ));
            }
        }

        Ok(parsed)
    }
}

fn read_part(archive: &mut ZipArchive<Cursor<&Vec<u8>>>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

#[derive(Debug, Default)]
struct Workbook {
    sheets: Vec<String>,
    defined_names: Vec<(String, String)>,
}

fn parse_workbook(xml: &str) -> Workbook {
    let mut workbook = Workbook::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut pending_defined_name: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                let name = local(start.name().as_ref());
                if name == "sheet" {
                    if let Some(sheet_name) = attr(&start, "name") {
                        workbook.sheets.push(sheet_name);
                    }
                } else if name == "definedName" {
                    pending_defined_name = attr(&start, "name");
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(name) = pending_defined_name.take() {
                    if let Ok(value) = text.unescape() {
                        workbook.defined_names.push((name, value.to_string()));
                    }
                }
            }
            Ok(Event::End(end)) => {
                if local(end.name().as_ref()) == "definedName" {
                    pending_defined_name = None;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    workbook
}

fn parse_table(xml: &str) -> Option<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                if local(start.name().as_ref()) == "table" {
                    let name = attr(&start, "displayName").or_else(|| attr(&start, "name"))?;
                    let range = attr(&start, "ref").unwrap_or_default();
                    return Some((name, range));
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Every `<f>` element in a worksheet is a formula body.
fn parse_formulas(xml: &str) -> Vec<String> {
    let mut formulas = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_formula = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if local(start.name().as_ref()) == "f" {
                    in_formula = true;
                }
            }
            Ok(Event::Text(text)) => {
                if in_formula {
                    if let Ok(value) = text.unescape() {
                        formulas.push(value.to_string());
                    }
                }
            }
            Ok(Event::End(end)) => {
                if local(end.name().as_ref()) == "f" {
                    in_formula = false;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    formulas
}

fn local(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn attr(start: &quick_xml::events::BytesStart<'_>, wanted: &str) -> Option<String> {
    for attribute in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attribute.key.as_ref()).to_string();
        let local_key = key.rsplit(':').next().unwrap_or(&key);
        if local_key == wanted {
            return attribute.unescape_value().ok().map(|v| v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workbook_sheets_and_defined_names() {
        let xml = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
            <sheets>
              <sheet name="RawData" sheetId="1" r:id="rId1"/>
              <sheet name="Summary" sheetId="2" r:id="rId2"/>
            </sheets>
            <definedNames>
              <definedName name="TaxRate">Summary!$B$1</definedName>
            </definedNames>
        </workbook>"#;
        let workbook = parse_workbook(xml);
        assert_eq!(workbook.sheets, vec!["RawData", "Summary"]);
        assert_eq!(
            workbook.defined_names,
            vec![("TaxRate".to_string(), "Summary!$B$1".to_string())]
        );
    }

    #[test]
    fn worksheet_formulas() {
        let xml = r#"<worksheet><sheetData>
            <row r="1"><c r="A1"><f>SUM(RawData!A1:A9)</f><v>45</v></c></row>
            <row r="2"><c r="A2"><v>plain</v></c></row>
        </sheetData></worksheet>"#;
        let formulas = parse_formulas(xml);
        assert_eq!(formulas, vec!["SUM(RawData!A1:A9)"]);
    }

    #[test]
    fn sheet_reference_pattern_handles_quotes() {
        let caps: Vec<String> = sheet_ref_pattern()
            .captures_iter("='Raw Data'!A1+Summary!B2")
            .map(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(caps, vec!["Raw Data", "Summary"]);
    }

    #[test]
    fn table_definition() {
        let xml = r#"<table name="Table1" displayName="CustomerRates" ref="A1:C12"/>"#;
        assert_eq!(
            parse_table(xml),
            Some(("CustomerRates".to_string(), "A1:C12".to_string()))
        );
    }
}
