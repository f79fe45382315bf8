use std::time::Instant;

/// Managed heap reading, in bytes. `rate` is `used / max`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeapUsage {
    pub max: u64,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub rate: f32,
}

impl HeapUsage {
    pub fn new(max: u64, total: u64, free: u64) -> Self {
        let used = total.saturating_sub(free);
        let rate = if max == 0 {
            0.0
        } else {
            used as f32 / max as f32
        };
        HeapUsage {
            max,
            total,
            free,
            used,
            rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcStatus {
    pub thread_count: u32,
    pub vss_kb: u64,
    pub rss_kb: u64,
}

/// Device memory, in KiB. `rate` is `available / total`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub rate: f32,
}

impl MemInfo {
    pub fn new(total_kb: u64, free_kb: u64, available_kb: u64) -> Self {
        let rate = if total_kb == 0 {
            1.0
        } else {
            available_kb as f32 / total_kb as f32
        };
        MemInfo {
            total_kb,
            free_kb,
            available_kb,
            rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSnapshot {
    pub taken_at: Instant,
    pub java_heap: HeapUsage,
    pub proc_status: ProcStatus,
    pub mem_info: MemInfo,
    pub fd_count: u32,
}

impl SystemSnapshot {
    /// An idle reading: empty heap, no threads, plenty of device memory.
    pub fn at(taken_at: Instant) -> Self {
        SystemSnapshot {
            taken_at,
            java_heap: HeapUsage::default(),
            proc_status: ProcStatus::default(),
            mem_info: MemInfo::new(1, 1, 1),
            fd_count: 0,
        }
    }

    pub fn with_heap(mut self, max: u64, used: u64) -> Self {
        self.java_heap = HeapUsage::new(max, used, 0);
        self
    }

    pub fn with_threads(mut self, thread_count: u32) -> Self {
        self.proc_status.thread_count = thread_count;
        self
    }

    pub fn with_fds(mut self, fd_count: u32) -> Self {
        self.fd_count = fd_count;
        self
    }

    pub fn with_device_memory(mut self, total_kb: u64, available_kb: u64) -> Self {
        self.mem_info = MemInfo::new(total_kb, available_kb, available_kb);
        self
    }
}
