//! On-disk layout for dumps and reports.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::MonitorError;

pub const HPROF_EXTENSION: &str = "hprof";
pub const JSON_EXTENSION: &str = "json";

/// Root layout: `analysis/` holds `{version}_{unix_millis}.hprof/.json` pairs,
/// `manual/` holds dumps taken outside the monitor.
#[derive(Debug, Clone)]
pub struct DumpFiles {
    root: PathBuf,
}

/// A heap dump and the report written next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPair {
    pub hprof: PathBuf,
    pub json: PathBuf,
}

impl DumpPair {
    pub fn for_hprof(hprof: PathBuf) -> Self {
        let json = hprof.with_extension(JSON_EXTENSION);
        DumpPair { hprof, json }
    }

    /// Leaves an empty report behind so a run that dies mid-analysis is recognized
    /// on the next start instead of being analyzed again.
    pub fn mark_in_progress(&self) -> std::io::Result<()> {
        std::fs::File::create(&self.json).map(drop)
    }

    /// Removes both files; missing files are not an error.
    pub fn delete(&self) {
        for path in [&self.hprof, &self.json] {
            remove_quietly(path);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaleScan {
    /// Dumps of this version whose analysis never finished.
    pub reanalyze: Vec<DumpPair>,
    pub deleted: Vec<PathBuf>,
    /// Manually taken dumps, for upload.
    pub manual: Vec<PathBuf>,
}

impl DumpFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DumpFiles { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join("analysis")
    }

    pub fn manual_dir(&self) -> PathBuf {
        self.root.join("manual")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("ledger.json")
    }

    pub fn new_pair(&self, version: &str, now: SystemTime) -> Result<DumpPair, MonitorError> {
        let dir = self.analysis_dir();
        std::fs::create_dir_all(&dir).map_err(|err| MonitorError::io(&dir, err))?;
        let millis = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let hprof = dir.join(format!("{version}_{millis}.{HPROF_EXTENSION}"));
        Ok(DumpPair::for_hprof(hprof))
    }

    /// Sorts out files left by earlier runs. Files of other versions are deleted on the spot,
    /// as are pairs of this version that have a report, empty or not.
    pub fn scan_stale(&self, version: &str) -> Result<StaleScan, MonitorError> {
        let mut scan = StaleScan::default();
        let prefix = format!("{version}_");

        for path in list_files(&self.analysis_dir())? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            let name = name.as_str();
            if !name.starts_with(&prefix) {
                tracing::info!(file = name, "deleting dump file from another version");
                remove_quietly(&path);
                scan.deleted.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(HPROF_EXTENSION) {
                continue;
            }
            let pair = DumpPair::for_hprof(path);
            if let Ok(meta) = std::fs::metadata(&pair.json) {
                if meta.len() == 0 {
                    tracing::warn!(file = name, "previous analysis never finished, deleting dump");
                } else {
                    tracing::info!(file = name, "deleting analyzed dump");
                }
                pair.delete();
                scan.deleted.push(pair.hprof);
                scan.deleted.push(pair.json);
            } else {
                scan.reanalyze.push(pair);
            }
        }

        scan.manual = list_files(&self.manual_dir())?;
        Ok(scan)
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, MonitorError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(MonitorError::io(dir, err)),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %err, "failed to delete file");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn touch(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn pair_names_carry_version_and_millis() {
        let dir = tempfile::tempdir().unwrap();
        let files = DumpFiles::new(dir.path());
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        let pair = files.new_pair("1.2.0", now).unwrap();
        assert_eq!(
            pair.hprof,
            files.analysis_dir().join("1.2.0_1700000000123.hprof")
        );
        assert_eq!(pair.json, files.analysis_dir().join("1.2.0_1700000000123.json"));
        assert!(files.analysis_dir().is_dir());
    }

    #[test]
    fn stale_scan_sorts_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let files = DumpFiles::new(dir.path());
        let analysis = files.analysis_dir();

        touch(&analysis.join("0.9_1.hprof"), "old");
        touch(&analysis.join("0.9_1.json"), "{}");
        touch(&analysis.join("1.0_2.hprof"), "unfinished");
        touch(&analysis.join("1.0_3.hprof"), "finished");
        touch(&analysis.join("1.0_3.json"), "{}");
        touch(&files.manual_dir().join("1.0_4.hprof"), "manual");

        let scan = files.scan_stale("1.0").unwrap();

        assert_eq!(
            scan.reanalyze,
            vec![DumpPair::for_hprof(analysis.join("1.0_2.hprof"))]
        );
        assert_eq!(scan.deleted.len(), 4);
        assert!(!analysis.join("0.9_1.hprof").exists());
        assert!(!analysis.join("1.0_3.json").exists());
        assert!(analysis.join("1.0_2.hprof").exists());
        assert_eq!(scan.manual, vec![files.manual_dir().join("1.0_4.hprof")]);
    }

    #[test]
    fn interrupted_analysis_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let files = DumpFiles::new(dir.path());
        let pair = DumpPair::for_hprof(files.analysis_dir().join("1.0_7.hprof"));
        touch(&pair.hprof, "dump");
        pair.mark_in_progress().unwrap();
        assert_eq!(std::fs::metadata(&pair.json).unwrap().len(), 0);

        let scan = files.scan_stale("1.0").unwrap();

        assert!(scan.reanalyze.is_empty());
        assert_eq!(scan.deleted, vec![pair.hprof.clone(), pair.json.clone()]);
        assert!(!pair.hprof.exists());
        assert!(!pair.json.exists());
    }

    #[test]
    fn missing_directories_scan_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scan = DumpFiles::new(dir.path().join("nope")).scan_stale("1.0").unwrap();
        assert_eq!(scan, StaleScan::default());
    }
}
