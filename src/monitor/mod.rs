//! Watching a process and deciding when to dump and analyze its heap.

pub mod driver;
pub mod files;
pub mod ledger;
pub mod tracker;
pub mod trigger;
pub mod upload;

use std::path::PathBuf;

use thiserror::Error;

use crate::analysis::{AnalysisError, HeapReport};
use crate::system::ProbeError;

pub use driver::{AnalysisOutcome, Collaborators, OomMonitor};
pub use files::{DumpFiles, DumpPair, StaleScan};
pub use ledger::{AnalysisLedger, FileLedger, MemoryLedger};
pub use tracker::{Tracker, TrackerState, Verdict, default_trackers};
pub use trigger::{LoopState, Phase, PollOutcome, TriggerDecision, TriggerLoop};
pub use upload::{DirectoryUploader, HprofKind, HprofUploader, ReportUploader};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger {}", .path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("monitor must be started from inside a tokio runtime")]
    NoRuntime,
}

impl MonitorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MonitorError::Io {
            path: path.into(),
            source,
        }
    }
}

/// What the embedding application knows about itself.
pub trait Host: Send + Sync {
    /// Only the primary process runs the monitor.
    fn is_primary_process(&self) -> bool {
        true
    }

    fn is_foreground(&self) -> bool {
        true
    }

    fn current_page(&self) -> String {
        String::new()
    }
}

/// A host for a standalone watcher: always primary, always foreground.
#[derive(Debug, Default)]
pub struct StandaloneHost;

impl Host for StandaloneHost {}

pub trait AnalysisListener: Send + Sync {
    fn on_success(&self, report_path: &std::path::Path, report: &HeapReport);

    fn on_failure(&self, error: &AnalysisError);
}

#[derive(Debug, Default)]
pub struct LoggingListener;

impl AnalysisListener for LoggingListener {
    fn on_success(&self, report_path: &std::path::Path, report: &HeapReport) {
        tracing::info!(
            path = %report_path.display(),
            gc_paths = report.gc_paths.len(),
            leak_objects = report.leak_objects.len(),
            "heap analysis finished"
        );
    }

    fn on_failure(&self, error: &AnalysisError) {
        tracing::error!(error = %error, "heap analysis failed");
    }
}
