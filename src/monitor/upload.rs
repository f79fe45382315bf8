use std::path::{Path, PathBuf};

use crate::analysis::HeapReport;

/// Whether an uploaded dump is the raw capture or a reduced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HprofKind {
    Stripped,
    Origin,
}

impl HprofKind {
    fn dir_name(self) -> &'static str {
        match self {
            HprofKind::Stripped => "stripped",
            HprofKind::Origin => "origin",
        }
    }
}

pub trait ReportUploader: Send + Sync {
    fn upload(&self, path: &Path, report: &HeapReport);
}

pub trait HprofUploader: Send + Sync {
    fn upload(&self, path: &Path, kind: HprofKind);
}

/// Copies reports to `{dir}/reports` and dumps to `{dir}/hprof/{kind}`.
/// Failures are logged, never propagated.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryUploader { dir: dir.into() }
    }

    pub fn report_dir(&self) -> PathBuf {
        self.dir.join("reports")
    }

    pub fn hprof_dir(&self, kind: HprofKind) -> PathBuf {
        self.dir.join("hprof").join(kind.dir_name())
    }

    fn copy_into(&self, path: &Path, target_dir: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let target = target_dir.join(name);
        let result = std::fs::create_dir_all(target_dir).and_then(|()| std::fs::copy(path, &target));
        match result {
            Ok(bytes) => tracing::info!(from = %path.display(), to = %target.display(), bytes, "uploaded"),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "upload failed"),
        }
    }
}

impl ReportUploader for DirectoryUploader {
    fn upload(&self, path: &Path, _report: &HeapReport) {
        self.copy_into(path, &self.report_dir());
    }
}

impl HprofUploader for DirectoryUploader {
    fn upload(&self, path: &Path, kind: HprofKind) {
        self.copy_into(path, &self.hprof_dir(kind));
    }
}
