//! Ingestion coordinator.
//!
//! Discovery walks the tree and feeds admitted paths through a bounded job
//! queue (depth `2 x workers`, which backpressures the walk) into a pool of
//! parser workers. Parse results stream through a second bounded queue into
//! the single committer -- the only place graph and vector state mutate.
//! Commits happen in result-arrival order; a query started after a commit
//! returns sees every earlier commit of the run.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::GraphBuilder;
use crate::model::{IngestFailure, IngestReport, ParsedDocument};
use crate::parsers::ParserRegistry;
use crate::util;
use crate::vector::VectorIndex;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Glob patterns matched against paths relative to the root; empty
    /// means every supported file.
    pub patterns: Vec<String>,
    pub max_concurrent_parsers: usize,
    /// Optional wall-clock budget; when it runs out the token is cancelled
    /// and already-committed documents remain durable.
    pub deadline: Option<Instant>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            patterns: Vec::new(),
            max_concurrent_parsers: Config::get().max_concurrent_parsers,
            deadline: None,
        }
    }
}

/// Cooperative cancellation shared between caller, discovery, workers and
/// the committer.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct DiscoveryStats {
    discovered: usize,
    admitted: usize,
    skipped_unsupported: usize,
}

struct ParseOutcome {
    path: String,
    result: std::result::Result<ParsedDocument, Error>,
}

pub struct IngestCoordinator<'a> {
    registry: &'a ParserRegistry,
    builder: &'a GraphBuilder,
    vectors: &'a dyn VectorIndex,
}

impl<'a> IngestCoordinator<'a> {
    pub fn new(
        registry: &'a ParserRegistry,
        builder: &'a GraphBuilder,
        vectors: &'a dyn VectorIndex,
    ) -> Self {
        IngestCoordinator {
            registry,
            builder,
            vectors,
        }
    }

    pub fn run(
        &self,
        root: &Path,
        options: &IngestOptions,
        token: &CancellationToken,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let globs = build_globset(&options.patterns)?;
        let workers = options.max_concurrent_parsers.max(1);
        let queue_depth = workers * 2;

        let mut report = IngestReport {
            root: util::normalize_path(root),
            ..Default::default()
        };

        let (job_tx, job_rx) = mpsc::sync_channel::<PathBuf>(queue_depth);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::sync_channel::<ParseOutcome>(queue_depth);

        std::thread::scope(|scope| {
            let discovery = scope.spawn(|| self.discover(root, &globs, job_tx, token));

            for _ in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                let token = token.clone();
                scope.spawn(move || {
                    loop {
                        let job = {
                            let guard = job_rx.lock().unwrap_or_else(|p| p.into_inner());
                            guard.recv()
                        };
                        let Ok(path) = job else { break };
                        if token.is_cancelled() {
                            continue;
                        }
                        let outcome = ParseOutcome {
                            path: util::normalize_path(&path),
                            result: self.parse_one(&path),
                        };
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Serial committer: the only writer of graph and vector state.
            for outcome in result_rx {
                if let Some(deadline) = options.deadline {
                    if Instant::now() >= deadline {
                        token.cancel();
                    }
                }
                self.commit(outcome, &mut report);
            }

            match discovery.join() {
                Ok(stats) => {
                    report.discovered = stats.discovered;
                    report.admitted = stats.admitted;
                    report.skipped_unsupported = stats.skipped_unsupported;
                }
                Err(_) => {
                    report
                        .failures
                        .push(IngestFailure {
                            path: report.root.clone(),
                            kind: "internal".to_string(),
                            message: "discovery thread panicked".to_string(),
                        });
                }
            }
        });

        report.unresolved_refs = self.builder.resolve_deferred_references();
        report.cancelled = token.is_cancelled();
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn discover(
        &self,
        root: &Path,
        globs: &Option<GlobSet>,
        job_tx: mpsc::SyncSender<PathBuf>,
        token: &CancellationToken,
    ) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            discovered: 0,
            admitted: 0,
            skipped_unsupported: 0,
        };
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .filter_entry(|entry| entry.file_name() != ".traceai")
            .build();
        for entry in walker {
            if token.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(value) => value,
                Err(err) => {
                    eprintln!("traceai: walk error: {err}");
                    continue;
                }
            };
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !seen.insert(abs) {
                continue;
            }
            if let Some(globs) = globs {
                let rel = path.strip_prefix(root).unwrap_or(path);
                if !globs.is_match(rel) {
                    continue;
                }
            }
            stats.discovered += 1;

            let Some(parser) = self.registry.parser_for(path) else {
                stats.skipped_unsupported += 1;
                continue;
            };
            if !parser.validate(path) {
                stats.skipped_unsupported += 1;
                continue;
            }
            stats.admitted += 1;
            // Bounded queue: this send is the backpressure point.
            if job_tx.send(path.to_path_buf()).is_err() {
                break;
            }
        }
        stats
    }

    fn parse_one(&self, path: &Path) -> std::result::Result<ParsedDocument, Error> {
        let parser = self
            .registry
            .parser_for(path)
            .ok_or_else(|| Error::UnsupportedFormat {
                path: util::normalize_path(path),
            })?;
        parser.parse(path)
    }

    fn commit(&self, outcome: ParseOutcome, report: &mut IngestReport) {
        match outcome.result {
            Ok(parsed) => {
                report.parsed += 1;
                if !parsed.warnings.is_empty() {
                    report.partial += 1;
                }
                match self.builder.add_document(parsed) {
                    Ok(commit) => {
                        if commit.no_op {
                            report.unchanged += 1;
                            return;
                        }
                        if commit.removed_nodes > 0 {
                            report.updated += 1;
                        } else {
                            report.added += 1;
                        }
                        self.sync_vectors(&commit.added_node_ids, &commit.removed_node_ids);
                    }
                    Err(err) => report.failures.push(IngestFailure {
                        path: outcome.path,
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    }),
                }
            }
            Err(err) => report.failures.push(IngestFailure {
                path: outcome.path,
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Vector writes are ordered after the graph commit so a search can
    /// never return an id the graph does not have.
    fn sync_vectors(&self, added: &[String], removed: &[String]) {
        for id in removed {
            if let Err(err) = self.vectors.delete(id) {
                eprintln!("traceai: vector delete {id}: {err}");
            }
        }
        let snapshot = self.builder.snapshot();
        for id in added {
            let Some(node) = snapshot.node(id) else { continue };
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("node_kind".to_string(), node.kind().as_str().to_string());
            metadata.insert("name".to_string(), node.name().to_string());
            if let Err(err) = self.vectors.upsert(id, &node.text_surface(), metadata) {
                eprintln!("traceai: vector upsert {id}: {err}");
            }
        }
    }

    /// Unload one document from graph and vector state.
    pub fn remove_document(&self, document_id: &str) -> bool {
        match self.builder.remove_document(document_id) {
            Some(removal) => {
                for id in &removal.removed_node_ids {
                    if let Err(err) = self.vectors.delete(id) {
                        eprintln!("traceai: vector delete {id}: {err}");
                    }
                }
                true
            }
            None => false,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|err| Error::invalid_argument("pattern", format!("{pattern}: {err}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|err| Error::invalid_argument("pattern", err.to_string()))?;
    Ok(Some(set))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_glob_is_invalid_argument() {
        let err = build_globset(&["[".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn empty_patterns_mean_no_filter() {
        assert!(build_globset(&[]).unwrap().is_none());
    }

    #[test]
    fn cancellation_token_flips_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }
}
