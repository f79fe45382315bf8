//! Per-version bookkeeping behind the analysis rate limits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::MonitorError;

pub trait AnalysisLedger: Send + Sync {
    fn analysis_count(&self, version: &str) -> u32;

    /// Returns the new count.
    fn increment_analysis_count(&self, version: &str) -> Result<u32, MonitorError>;

    fn first_launch(&self, version: &str) -> Option<SystemTime>;

    /// Records the first launch of `version`; later calls keep the earliest time.
    fn record_launch(&self, version: &str, now: SystemTime) -> Result<(), MonitorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    analysis_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_launch_unix_ms: Option<u64>,
}

impl LedgerEntry {
    fn first_launch(&self) -> Option<SystemTime> {
        self.first_launch_unix_ms
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// JSON file keyed by version, rewritten on every change.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl FileLedger {
    /// Opens the ledger; a missing file starts empty, a corrupt one is logged and replaced.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable ledger, starting fresh");
                BTreeMap::new()
            }
        };
        FileLedger {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, LedgerEntry>, MonitorError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(MonitorError::io(path, err)),
        };
        serde_json::from_str(&contents).map_err(|source| MonitorError::Ledger {
            path: path.to_path_buf(),
            source,
        })
    }

    fn save(&self, entries: &BTreeMap<String, LedgerEntry>) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| MonitorError::io(parent, err))?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|source| MonitorError::Ledger {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(|err| MonitorError::io(&self.path, err))
    }
}

impl AnalysisLedger for FileLedger {
    fn analysis_count(&self, version: &str) -> u32 {
        self.entries
            .lock()
            .get(version)
            .map_or(0, |entry| entry.analysis_count)
    }

    fn increment_analysis_count(&self, version: &str) -> Result<u32, MonitorError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(version.to_string()).or_default();
        entry.analysis_count += 1;
        let count = entry.analysis_count;
        self.save(&entries)?;
        Ok(count)
    }

    fn first_launch(&self, version: &str) -> Option<SystemTime> {
        self.entries.lock().get(version).and_then(LedgerEntry::first_launch)
    }

    fn record_launch(&self, version: &str, now: SystemTime) -> Result<(), MonitorError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(version.to_string()).or_default();
        if entry.first_launch_unix_ms.is_some() {
            return Ok(());
        }
        entry.first_launch_unix_ms = Some(unix_millis(now));
        self.save(&entries)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(self, version: &str, count: u32) -> Self {
        self.entries
            .lock()
            .entry(version.to_string())
            .or_default()
            .analysis_count = count;
        self
    }

    pub fn with_first_launch(self, version: &str, at: SystemTime) -> Self {
        self.entries
            .lock()
            .entry(version.to_string())
            .or_default()
            .first_launch_unix_ms = Some(unix_millis(at));
        self
    }
}

impl AnalysisLedger for MemoryLedger {
    fn analysis_count(&self, version: &str) -> u32 {
        self.entries
            .lock()
            .get(version)
            .map_or(0, |entry| entry.analysis_count)
    }

    fn increment_analysis_count(&self, version: &str) -> Result<u32, MonitorError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(version.to_string()).or_default();
        entry.analysis_count += 1;
        Ok(entry.analysis_count)
    }

    fn first_launch(&self, version: &str) -> Option<SystemTime> {
        self.entries.lock().get(version).and_then(LedgerEntry::first_launch)
    }

    fn record_launch(&self, version: &str, now: SystemTime) -> Result<(), MonitorError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(version.to_string()).or_default();
        entry.first_launch_unix_ms.get_or_insert(unix_millis(now));
        Ok(())
    }
}
