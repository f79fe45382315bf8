use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::classifier::classify;
use super::matchers::ReferenceMatcher;
use super::paths::find_paths;
use super::report::{HeapReport, RunningInfo};
use crate::config::AnalysisConfig;
use crate::heap::{HeapError, HeapGraph, HeapIndexer};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to index heap dump")]
    Index(#[source] HeapError),
    #[error("heap dump {} is empty", .0.display())]
    EmptyDump(PathBuf),
    #[error("leak classification failed")]
    Classify(#[source] HeapError),
    #[error("gc path search failed")]
    FindPaths(#[source] HeapError),
    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report")]
    Serialize(#[from] serde_json::Error),
    #[error("heap dump failed: {0}")]
    Dump(String),
    #[error("analysis panicked: {0}")]
    Panicked(String),
}

/// Index, classify, find paths, assemble. Any stage failure aborts the run.
pub struct AnalysisService {
    indexer: Arc<dyn HeapIndexer>,
    config: AnalysisConfig,
    matchers: Vec<ReferenceMatcher>,
}

impl AnalysisService {
    pub fn new(indexer: Arc<dyn HeapIndexer>, config: AnalysisConfig) -> Self {
        Self {
            indexer,
            config,
            matchers: ReferenceMatcher::app_defaults(),
        }
    }

    pub fn with_matchers(mut self, matchers: Vec<ReferenceMatcher>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn run(&self, hprof: &Path, running_info: RunningInfo) -> Result<HeapReport, AnalysisError> {
        let len = std::fs::metadata(hprof)
            .map_err(|source| AnalysisError::Io {
                path: hprof.to_path_buf(),
                source,
            })?
            .len();
        if len == 0 {
            return Err(AnalysisError::EmptyDump(hprof.to_path_buf()));
        }

        let started = Instant::now();
        let graph = self.indexer.index(hprof).map_err(AnalysisError::Index)?;
        tracing::info!(
            path = %hprof.display(),
            bytes = len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "heap indexed"
        );
        self.analyze_graph(graph.as_ref(), running_info)
    }

    pub fn analyze_graph<G: HeapGraph + ?Sized>(
        &self,
        graph: &G,
        mut running_info: RunningInfo,
    ) -> Result<HeapReport, AnalysisError> {
        let started = Instant::now();
        let classification = classify(graph, &self.config).map_err(AnalysisError::Classify)?;
        running_info.filter_instance_time = Some(started.elapsed().as_secs_f64());

        let started = Instant::now();
        let findings = find_paths(graph, &classification.candidates, &self.matchers)
            .map_err(AnalysisError::FindPaths)?;
        running_info.find_gc_path_time = Some(started.elapsed().as_secs_f64());

        Ok(HeapReport::assemble(running_info, &classification, &findings))
    }
}

pub fn write_report(report: &HeapReport, path: &Path) -> Result<(), AnalysisError> {
    let json = report.to_json()?;
    std::fs::write(path, json).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })
}
