//! Best-effort SQL lineage scanner.
//!
//! Extracts table references from embedded SQL (SSIS task statements, COBOL
//! `EXEC SQL` blocks) with regexes. CTEs, dynamic SQL and vendor oddities are
//! deliberately out of reach, so every edge derived from this scanner is
//! tagged `confidence = best_effort`.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Property value carried on every SQL-derived lineage edge.
pub const CONFIDENCE_BEST_EFFORT: &str = "best_effort";
pub const CONFIDENCE_KEY: &str = "confidence";

const NAME: &str = r"[A-Za-z_\[][\w.\[\]#$]*";

/// Words the capture group may pick up that are never table names.
const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "join", "where", "inner", "outer", "left", "right", "full", "cross", "on",
    "into", "update", "delete", "merge", "using", "values", "set", "as", "with", "union", "all",
    "group", "order", "by", "having", "distinct", "dual",
];

struct Patterns {
    from: Regex,
    join: Regex,
    into: Regex,
    update: Regex,
    delete_from: Regex,
    merge: Regex,
    merge_using: Regex,
    truncate: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        from: Regex::new(&format!(r"(?i)\bFROM\s+({NAME})")).expect("from pattern"),
        join: Regex::new(&format!(r"(?i)\bJOIN\s+({NAME})")).expect("join pattern"),
        into: Regex::new(&format!(r"(?i)\bINTO\s+({NAME})")).expect("into pattern"),
        update: Regex::new(&format!(r"(?i)\bUPDATE\s+({NAME})")).expect("update pattern"),
        delete_from: Regex::new(&format!(r"(?i)\bDELETE\s+FROM\s+({NAME})"))
            .expect("delete pattern"),
        merge: Regex::new(&format!(r"(?i)\bMERGE\s+(?:INTO\s+)?({NAME})")).expect("merge pattern"),
        merge_using: Regex::new(&format!(
            r"(?i)\bMERGE\s+(?:INTO\s+)?{NAME}\s+(?:AS\s+\w+\s+)?USING\s+({NAME})"
        ))
        .expect("merge using pattern"),
        truncate: Regex::new(&format!(r"(?i)\bTRUNCATE\s+TABLE\s+({NAME})"))
            .expect("truncate pattern"),
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SqlLineage {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

impl SqlLineage {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

pub fn looks_like_sql(source: &str) -> bool {
    let upper = source.to_uppercase();
    ["SELECT", "INSERT", "UPDATE", "MERGE", "DELETE", "TRUNCATE"]
        .iter()
        .any(|kw| upper.contains(kw))
}

/// Scan one SQL statement (or a blob containing several) for table names.
pub fn scan(source: &str) -> SqlLineage {
    let p = patterns();
    let mut lineage = SqlLineage::default();

    // Writes first: DELETE FROM spans must not re-surface as reads below.
    let mut delete_spans = Vec::new();
    for caps in p.delete_from.captures_iter(source) {
        if let Some(m) = caps.get(1) {
            delete_spans.push(m.start());
            push_name(&mut lineage.writes, m.as_str());
        }
    }
    for re in [&p.into, &p.update, &p.merge, &p.truncate] {
        for caps in re.captures_iter(source) {
            if let Some(m) = caps.get(1) {
                push_name(&mut lineage.writes, m.as_str());
            }
        }
    }

    for re in [&p.from, &p.join] {
        for caps in re.captures_iter(source) {
            if let Some(m) = caps.get(1) {
                if delete_spans.contains(&m.start()) {
                    continue;
                }
                push_name(&mut lineage.reads, m.as_str());
            }
        }
    }

    // MERGE target USING source: the USING side is a read.
    for caps in p.merge_using.captures_iter(source) {
        if let Some(m) = caps.get(1) {
            push_name(&mut lineage.reads, m.as_str());
        }
    }

    lineage
}

fn push_name(set: &mut BTreeSet<String>, raw: &str) {
    let name = raw.trim_matches(|c| c == '[' || c == ']').trim();
    if name.is_empty() {
        return;
    }
    let lowered = name.to_lowercase();
    if SQL_KEYWORDS.contains(&lowered.as_str()) {
        return;
    }
    set.insert(name.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn select_reads() {
        let lineage = scan("SELECT c.Id FROM dbo.Customer c JOIN Orders o ON o.Cid = c.Id");
        assert_eq!(names(&lineage.reads), vec!["Orders", "dbo.Customer"]);
        assert!(lineage.writes.is_empty());
    }

    #[test]
    fn insert_select_mixes_read_and_write() {
        let lineage = scan("INSERT INTO Warehouse.Sales SELECT * FROM Staging.Sales");
        assert_eq!(names(&lineage.writes), vec!["Warehouse.Sales"]);
        assert_eq!(names(&lineage.reads), vec!["Staging.Sales"]);
    }

    #[test]
    fn delete_from_is_write_only() {
        let lineage = scan("DELETE FROM AuditLog WHERE Age > 90");
        assert_eq!(names(&lineage.writes), vec!["AuditLog"]);
        assert!(lineage.reads.is_empty());
    }

    #[test]
    fn merge_reads_using_side() {
        let lineage = scan("MERGE Customer AS t USING Staging_Customer AS s ON t.Id = s.Id");
        assert_eq!(names(&lineage.writes), vec!["Customer"]);
        assert_eq!(names(&lineage.reads), vec!["Staging_Customer"]);
    }

    #[test]
    fn update_and_truncate() {
        let lineage = scan("UPDATE dbo.Flags SET x = 1; TRUNCATE TABLE Scratch");
        assert_eq!(names(&lineage.writes), vec!["Scratch", "dbo.Flags"]);
    }

    #[test]
    fn subquery_parenthesis_is_not_a_table() {
        let lineage = scan("SELECT * FROM (SELECT 1) x");
        // The inner SELECT keyword is filtered, the paren never matches.
        assert!(!lineage.reads.contains("("));
        assert!(!lineage.reads.contains("SELECT"));
    }

    #[test]
    fn non_sql_is_empty() {
        assert!(!looks_like_sql("PERFORM 100-INIT"));
        assert!(scan("PERFORM 100-INIT").is_empty());
    }

    #[test]
    fn bracketed_names_are_unwrapped() {
        let lineage = scan("SELECT * FROM [Customer]");
        assert_eq!(names(&lineage.reads), vec!["Customer"]);
    }
}
