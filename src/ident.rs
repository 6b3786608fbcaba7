//! Deterministic node identity.
//!
//! Ids are derived from content only, so re-parsing the same file yields
//! identical ids and re-ingest is idempotent. Shared nodes (data sources,
//! data entities) hash a normalized form so that equal locators produced by
//! different parsers intern to one graph node.

use crate::model::SourceKind;
use blake3::Hasher;

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x00");
    }
    let hash = hasher.finalize();
    hash.to_hex()[..16].to_string()
}

/// Hash of raw file bytes, used as the document content hash.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// `doc_{16hex}` over (source path, content hash).
pub fn document_id(source_path: &str, content_hash: &str) -> String {
    format!("doc_{}", short_hash(&[source_path, content_hash]))
}

/// Component ids are scoped under their owning document.
pub fn component_id(document_id: &str, local_name: &str) -> String {
    format!("{document_id}/{local_name}")
}

pub fn parameter_id(document_id: &str, name: &str) -> String {
    format!("{document_id}/param/{name}")
}

/// `src_{16hex}` over (kind, normalized locator); interned across documents.
pub fn data_source_id(kind: SourceKind, locator: &str) -> String {
    let kind_tag = match kind {
        SourceKind::Db => "db",
        SourceKind::File => "file",
        SourceKind::Dataset => "dataset",
        SourceKind::Ftp => "ftp",
        SourceKind::Http => "http",
        SourceKind::Unknown => "unknown",
    };
    format!("src_{}", short_hash(&[kind_tag, &normalize_locator(locator)]))
}

/// `ent_{16hex}` over (normalized schema, normalized bare name); interned
/// across documents. Unqualified references to the same name meet at one
/// node; schema-qualified tables stay distinct per schema.
pub fn data_entity_id(schema: Option<&str>, name: &str) -> String {
    let schema = schema.map(normalize_name).unwrap_or_default();
    format!("ent_{}", short_hash(&[&schema, &normalize_name(name)]))
}

/// Lowercase, trim, collapse internal whitespace.
pub fn normalize_locator(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            last_space = false;
        }
    }
    out
}

/// Normalized entity name used for interning and name lookup: the bare name
/// with any schema/database prefix stripped, lowercased.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']' || c == '"');
    trimmed.to_lowercase()
}

/// Split `database.schema.entity` / `schema.entity` into (schema, bare name).
/// Mainframe dataset names (three or more dotted segments of which none look
/// like a schema) are left whole by callers that know better.
pub fn split_qualified(raw: &str) -> (Option<String>, String) {
    let parts: Vec<&str> = raw.split('.').collect();
    match parts.len() {
        2 => (Some(parts[0].to_string()), parts[1].to_string()),
        3 => (Some(parts[1].to_string()), parts[2].to_string()),
        _ => (None, raw.to_string()),
    }
}
