//! Per-indicator trackers. Each one owns its debounce state.

mod fd;
mod heap;
mod physical;
mod thread;
mod velocity;

pub use fd::FdTracker;
pub use heap::HeapTracker;
pub use physical::PhysicalMemoryTracker;
pub use thread::ThreadTracker;
pub use velocity::HeapVelocityTracker;

use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

pub const REASON_HEAP_OOM: &str = "reason_heap_oom";
pub const REASON_HIGH_WATERMARK: &str = "reason_fast_huge_high_watermark";
pub const REASON_HUGE_DELTA: &str = "reason_fast_huge_delta";
pub const REASON_THREAD_OOM: &str = "reason_thread_oom";
pub const REASON_FD_OOM: &str = "reason_fd_oom";
pub const REASON_LMK_OOM: &str = "reason_lmk_oom";
pub const REASON_HEAP_VELOCITY: &str = "reason_heap_velocity";

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackerState {
    pub over_threshold_count: u32,
    pub last_value: f64,
}

/// Outcome of one `track` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub triggered: bool,
    /// The condition held on this poll, whether or not it triggered.
    pub over: bool,
    pub reason: &'static str,
}

impl Verdict {
    pub fn quiet() -> Self {
        Verdict::default()
    }

    pub fn counting() -> Self {
        Verdict {
            over: true,
            ..Verdict::default()
        }
    }

    pub fn trigger(reason: &'static str) -> Self {
        Verdict {
            triggered: true,
            over: true,
            reason,
        }
    }
}

/// Extra detail the trigger loop collects while a tracker is over its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Nothing,
    ThreadNames,
    FdTargets,
}

pub trait Tracker: Send {
    fn name(&self) -> &'static str;

    /// Not idempotent: every call advances the debounce counter or resets it.
    fn track(
        &mut self,
        current: &SystemSnapshot,
        previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict;

    fn reset(&mut self);

    fn state(&self) -> TrackerState;

    fn capture(&self) -> Capture {
        Capture::Nothing
    }
}

/// Consecutive-poll counter shared by the debounced trackers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Debounce {
    state: TrackerState,
}

impl Debounce {
    /// Counts an over-threshold poll; reports whether the count reached `max`.
    pub(crate) fn over(&mut self, value: f64, max: u32) -> bool {
        self.state.over_threshold_count += 1;
        self.state.last_value = value;
        self.state.over_threshold_count >= max
    }

    pub(crate) fn reset(&mut self) {
        self.state = TrackerState::default();
    }

    /// Clears the count but keeps `value` as the baseline for the next gap check.
    pub(crate) fn settle(&mut self, value: f64) {
        self.reset();
        self.state.last_value = value;
    }

    pub(crate) fn last_value(&self) -> f64 {
        self.state.last_value
    }

    pub(crate) fn state(&self) -> TrackerState {
        self.state
    }
}

/// All five trackers in reporting order.
pub fn default_trackers() -> Vec<Box<dyn Tracker>> {
    vec![
        Box::new(HeapTracker::default()),
        Box::new(ThreadTracker::default()),
        Box::new(FdTracker::default()),
        Box::new(PhysicalMemoryTracker::default()),
        Box::new(HeapVelocityTracker::default()),
    ]
}
