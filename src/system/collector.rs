use std::path::Path;
use std::process::Command;
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::platform;
use super::snapshot::{HeapUsage, MemInfo, ProcStatus, SystemSnapshot};
use super::{ProbeError, Snapshotter};
use crate::config::DumpConfig;

/// Source of the managed heap figures for a process.
pub trait HeapGauge: Send {
    fn heap_usage(&self, rss_bytes: u64, device_total_bytes: u64) -> HeapUsage;
}

/// Treats the resident set as the heap, capped by a configured limit or device memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct RssHeapGauge {
    pub limit_bytes: Option<u64>,
}

impl HeapGauge for RssHeapGauge {
    fn heap_usage(&self, rss_bytes: u64, device_total_bytes: u64) -> HeapUsage {
        let max = self.limit_bytes.unwrap_or(device_total_bytes);
        HeapUsage::new(max, rss_bytes, 0)
    }
}

pub struct Collector {
    sys: System,
    pid: Pid,
    gauge: Box<dyn HeapGauge>,
    dump_command: Vec<String>,
}

impl Collector {
    pub fn new(pid: u32, dump: &DumpConfig) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Collector {
            sys,
            pid: Pid::from_u32(pid),
            gauge: Box::new(RssHeapGauge {
                limit_bytes: dump.heap_limit_bytes,
            }),
            dump_command: dump.command.clone(),
        }
    }

    pub fn for_current_process(dump: &DumpConfig) -> Self {
        Self::new(std::process::id(), dump)
    }

    pub fn with_gauge(mut self, gauge: Box<dyn HeapGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    fn dump_args(&self, path: &Path) -> Vec<String> {
        let pid = self.pid().to_string();
        let path = path.display().to_string();
        self.dump_command
            .iter()
            .map(|arg| arg.replace("{pid}", &pid).replace("{path}", &path))
            .collect()
    }
}

impl Snapshotter for Collector {
    fn snapshot(&mut self) -> Result<SystemSnapshot, ProbeError> {
        self.sys.refresh_memory();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let process = self
            .sys
            .process(self.pid)
            .ok_or(ProbeError::ProcessGone(self.pid.as_u32()))?;

        let pid = self.pid.as_u32();
        let rss = process.memory();
        let snapshot = SystemSnapshot {
            taken_at: Instant::now(),
            java_heap: self.gauge.heap_usage(rss, self.sys.total_memory()),
            proc_status: ProcStatus {
                thread_count: platform::thread_count(pid).unwrap_or(0),
                vss_kb: process.virtual_memory() / 1024,
                rss_kb: rss / 1024,
            },
            mem_info: MemInfo::new(
                self.sys.total_memory() / 1024,
                self.sys.free_memory() / 1024,
                self.sys.available_memory() / 1024,
            ),
            fd_count: platform::fd_count(pid).unwrap_or(0),
        };
        tracing::trace!(
            pid,
            heap_rate = snapshot.java_heap.rate,
            threads = snapshot.proc_status.thread_count,
            fds = snapshot.fd_count,
            "snapshot"
        );
        Ok(snapshot)
    }

    fn dump_heap(&mut self, path: &Path) -> Result<(), ProbeError> {
        let args = self.dump_args(path);
        let Some((program, rest)) = args.split_first() else {
            return Err(ProbeError::DumpUnsupported);
        };
        tracing::info!(program = %program, path = %path.display(), "dumping heap");
        let status = Command::new(program)
            .args(rest)
            .status()
            .map_err(|source| ProbeError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProbeError::DumpFailed {
                status: status.to_string(),
            })
        }
    }

    fn thread_names(&mut self) -> Vec<String> {
        platform::thread_names(self.pid.as_u32())
    }

    fn fd_targets(&mut self) -> Vec<String> {
        platform::fd_targets(self.pid.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_gauge_prefers_configured_limit() {
        let gauge = RssHeapGauge {
            limit_bytes: Some(1000),
        };
        let heap = gauge.heap_usage(250, 8000);
        assert_eq!(heap.max, 1000);
        assert_eq!(heap.used, 250);

        let heap = RssHeapGauge::default().heap_usage(250, 1000);
        assert!((heap.rate - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn snapshot_of_current_process() {
        let mut collector = Collector::for_current_process(&DumpConfig::default());
        let snap = collector.snapshot().unwrap();
        assert!(snap.proc_status.rss_kb > 0);
        assert!(snap.mem_info.total_kb > 0);
    }

    #[test]
    fn dump_command_substitutes_pid_and_path() {
        let dump = DumpConfig {
            command: vec!["dumper".into(), "-p".into(), "{pid}".into(), "{path}".into()],
            heap_limit_bytes: None,
        };
        let collector = Collector::new(42, &dump);
        assert_eq!(
            collector.dump_args(Path::new("/tmp/a.hprof")),
            vec!["dumper", "-p", "42", "/tmp/a.hprof"]
        );
    }

    #[test]
    fn dump_without_command_is_unsupported() {
        let mut collector = Collector::for_current_process(&DumpConfig::default());
        let err = collector.dump_heap(Path::new("/tmp/never.hprof")).unwrap_err();
        assert!(matches!(err, ProbeError::DumpUnsupported));
    }
}
