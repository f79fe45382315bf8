//! Process and device probes: everything that reads the live system.

pub mod collector;
pub mod platform;
pub mod snapshot;
pub mod storage;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use collector::{Collector, HeapGauge, RssHeapGauge};
pub use snapshot::{HeapUsage, MemInfo, ProcStatus, SystemSnapshot};
pub use storage::{DiskSpaceProbe, StorageProbe};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("process {0} is no longer running")]
    ProcessGone(u32),
    #[error("no heap dump command configured")]
    DumpUnsupported,
    #[error("heap dump command exited with {status}")]
    DumpFailed { status: String },
    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the watched process and captures its heap.
pub trait Snapshotter: Send {
    fn snapshot(&mut self) -> Result<SystemSnapshot, ProbeError>;

    /// Writes a heap dump to `path`.
    fn dump_heap(&mut self, path: &Path) -> Result<(), ProbeError>;

    fn thread_names(&mut self) -> Vec<String>;

    fn fd_targets(&mut self) -> Vec<String>;
}
