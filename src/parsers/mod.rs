use crate::error::{Error, Result};
use crate::model::{Document, DocumentKind, ParsedDocument};
use crate::{ident, util};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub mod cobol;
pub mod csv_lineage;
pub mod excel;
pub mod jcl;
pub mod json_config;
pub mod ssis;

/// One source format. Parsers share no mutable state and are safe to invoke
/// concurrently on distinct paths.
pub trait FormatParser: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Supported file extensions, lowercase, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Cheap header sniff so the coordinator can skip files without paying
    /// full parse cost. Extension dispatch has already happened.
    fn validate(&self, path: &Path) -> bool;

    fn parse(&self, path: &Path) -> Result<ParsedDocument>;
}

/// Extension-to-parser dispatch. Assembled once at startup, read-only after.
#[derive(Default)]
pub struct ParserRegistry {
    by_extension: BTreeMap<String, Arc<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All six format parsers.
    pub fn with_default_parsers() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(ssis::SsisParser::new()))?;
        registry.register(Arc::new(cobol::CobolParser::new()))?;
        registry.register(Arc::new(jcl::JclParser::new()))?;
        registry.register(Arc::new(json_config::JsonConfigParser::new()))?;
        registry.register(Arc::new(excel::ExcelParser::new()))?;
        registry.register(Arc::new(csv_lineage::CsvLineageParser::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, parser: Arc<dyn FormatParser>) -> Result<()> {
        for ext in parser.extensions() {
            let key = ext.to_lowercase();
            if self.by_extension.contains_key(&key) {
                return Err(Error::Internal(format!(
                    "duplicate parser registration for extension .{key}"
                )));
            }
            self.by_extension.insert(key, parser.clone());
        }
        Ok(())
    }

    /// Dispatch by extension, case-insensitive.
    pub fn parser_for(&self, path: &Path) -> Option<&dyn FormatParser> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&ext).map(|p| p.as_ref())
    }

    /// True when a registered parser recognizes the file contents.
    pub fn validate(&self, path: &Path) -> bool {
        match self.parser_for(path) {
            Some(parser) => parser.validate(path),
            None => false,
        }
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        self.by_extension.keys().map(|k| k.as_str()).collect()
    }
}

/// Shared document-metadata construction: deterministic id from path and
/// content hash, so re-parsing an unchanged file is a graph no-op.
pub(crate) fn document_for(
    path: &Path,
    kind: DocumentKind,
    name: String,
    bytes: &[u8],
) -> Document {
    let source_path = util::normalize_path(path);
    let content_hash = ident::content_hash(bytes);
    let id = ident::document_id(&source_path, &content_hash);
    Document {
        id,
        name,
        kind,
        source_path,
        content_hash,
        parsed_at: util::unix_now(),
        custom: BTreeMap::new(),
    }
}

pub(crate) fn read_source(path: &Path) -> Result<String> {
    util::read_to_string(path).map_err(|err| Error::malformed(util::normalize_path(path), err.to_string()))
}

pub(crate) fn read_source_bytes(path: &Path) -> Result<Vec<u8>> {
    util::read_bytes(path).map_err(|err| Error::malformed(util::normalize_path(path), err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatch_is_case_insensitive() {
        let registry = ParserRegistry::with_default_parsers().unwrap();
        for name in ["A.CBL", "a.cbl", "job.JCL", "pkg.dtsx", "wb.xlsx", "m.csv", "c.json"] {
            assert!(
                registry.parser_for(Path::new(name)).is_some(),
                "no parser for {name}"
            );
        }
        assert!(registry.parser_for(Path::new("readme.md")).is_none());
        assert!(registry.parser_for(Path::new("noext")).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ParserRegistry::with_default_parsers().unwrap();
        let err = registry
            .register(Arc::new(cobol::CobolParser::new()))
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn validate_rejects_unknown_extension() {
        let registry = ParserRegistry::with_default_parsers().unwrap();
        assert!(!registry.validate(Path::new("whatever.bin")));
    }
}
