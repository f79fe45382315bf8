//! The synchronous poll state machine: trackers, rate limits, storage gate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::files::DumpFiles;
use super::ledger::AnalysisLedger;
use super::tracker::{Capture, Tracker, TrackerState, default_trackers};
use crate::config::{Config, LimitsConfig, MonitorConfig};
use crate::system::{Snapshotter, StorageProbe, SystemSnapshot};

pub type SharedSnapshotter = Arc<Mutex<Box<dyn Snapshotter>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Running,
    /// A dump was decided; the loop never runs again in this process.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Continue,
    Terminate,
}

/// Reasons collected from one poll, in tracker order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerDecision {
    pub reasons: Vec<&'static str>,
}

impl TriggerDecision {
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn joined(&self) -> String {
        self.reasons.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Disabled(TriggerDecision),
    RateLimited(TriggerDecision),
    InsufficientSpace(TriggerDecision),
    Triggered(TriggerDecision),
    ProbeFailed,
    Stopped,
    Terminated,
}

impl PollOutcome {
    pub fn loop_state(&self) -> LoopState {
        match self {
            PollOutcome::Triggered(_) | PollOutcome::Stopped | PollOutcome::Terminated => {
                LoopState::Terminate
            }
            _ => LoopState::Continue,
        }
    }
}

pub struct TriggerLoop {
    monitor: MonitorConfig,
    limits: LimitsConfig,
    version: String,
    debug: bool,
    storage_dir: PathBuf,
    min_free_bytes: u64,
    snapshotter: SharedSnapshotter,
    ledger: Arc<dyn AnalysisLedger>,
    storage: Arc<dyn StorageProbe>,
    phase: Phase,
    trackers: Vec<Box<dyn Tracker>>,
    last_snapshot: Option<SystemSnapshot>,
    has_dumped: bool,
    resume_on_foreground: bool,
    thread_list: Vec<String>,
    fd_list: Vec<String>,
}

impl TriggerLoop {
    pub fn new(
        config: &Config,
        files: &DumpFiles,
        snapshotter: SharedSnapshotter,
        ledger: Arc<dyn AnalysisLedger>,
        storage: Arc<dyn StorageProbe>,
    ) -> Self {
        TriggerLoop {
            monitor: config.monitor.clone(),
            limits: config.limits.clone(),
            version: config.general.app_version.clone(),
            debug: config.general.debug,
            storage_dir: files.analysis_dir(),
            min_free_bytes: config.storage.min_free_bytes,
            snapshotter,
            ledger,
            storage,
            phase: Phase::Stopped,
            trackers: default_trackers(),
            last_snapshot: None,
            has_dumped: false,
            resume_on_foreground: false,
            thread_list: Vec::new(),
            fd_list: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_dumped(&self) -> bool {
        self.has_dumped
    }

    pub fn last_snapshot(&self) -> Option<&SystemSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn thread_list(&self) -> &[String] {
        &self.thread_list
    }

    pub fn fd_list(&self) -> &[String] {
        &self.fd_list
    }

    pub fn tracker_states(&self) -> Vec<(&'static str, TrackerState)> {
        self.trackers.iter().map(|t| (t.name(), t.state())).collect()
    }

    /// Returns whether the loop moved to `Running`.
    pub fn request_start(&mut self, is_primary: bool, now: SystemTime) -> bool {
        if !is_primary {
            tracing::debug!("not the primary process, monitor stays off");
            return false;
        }
        if self.phase != Phase::Stopped {
            return false;
        }
        if let Err(err) = self.ledger.record_launch(&self.version, now) {
            tracing::warn!(error = %err, "failed to record launch time");
        }
        self.phase = Phase::Running;
        tracing::info!(version = %self.version, "monitor started");
        true
    }

    pub fn request_stop(&mut self) -> bool {
        if self.phase != Phase::Running {
            return false;
        }
        self.phase = Phase::Stopped;
        tracing::info!("monitor stopped");
        true
    }

    /// Stops the loop, remembering whether it should come back on the next foreground.
    pub fn on_background(&mut self) -> bool {
        self.resume_on_foreground = self.phase == Phase::Running;
        self.request_stop()
    }

    pub fn on_foreground(&mut self, is_primary: bool, now: SystemTime) -> bool {
        if !self.resume_on_foreground || self.has_dumped {
            return false;
        }
        self.resume_on_foreground = false;
        self.request_start(is_primary, now)
    }

    pub fn poll(&mut self, now: SystemTime) -> PollOutcome {
        match self.phase {
            Phase::Stopped => return PollOutcome::Stopped,
            Phase::Terminated => return PollOutcome::Terminated,
            Phase::Running => {}
        }

        let snapshot = match self.snapshotter.lock().snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "snapshot failed, skipping poll");
                return PollOutcome::ProbeFailed;
            }
        };

        let mut decision = TriggerDecision::default();
        let mut captures = Vec::new();
        for tracker in &mut self.trackers {
            let verdict = tracker.track(&snapshot, self.last_snapshot.as_ref(), &self.monitor);
            if verdict.triggered {
                decision.reasons.push(verdict.reason);
            } else if verdict.over {
                captures.push(tracker.capture());
            }
        }
        self.last_snapshot = Some(snapshot);
        self.capture(&captures);

        if decision.is_empty() {
            return PollOutcome::Idle;
        }
        let reason = decision.joined();

        if !self.monitor.enable_hprof_dump_analysis {
            tracing::info!(reason = %reason, "dump analysis disabled, not dumping");
            return PollOutcome::Disabled(decision);
        }
        if let Some(limit) = self.rate_limited(now) {
            tracing::warn!(reason = %reason, limit, "analysis rate limited");
            return PollOutcome::RateLimited(decision);
        }
        if !self.storage.has_space(&self.storage_dir, self.min_free_bytes) {
            tracing::warn!(
                reason = %reason,
                dir = %self.storage_dir.display(),
                "not enough free space for a heap dump"
            );
            return PollOutcome::InsufficientSpace(decision);
        }

        tracing::info!(reason = %reason, "oom risk detected, dumping heap");
        self.phase = Phase::Terminated;
        self.has_dumped = true;
        PollOutcome::Triggered(decision)
    }

    fn capture(&mut self, captures: &[Capture]) {
        for capture in captures {
            match capture {
                Capture::ThreadNames => self.thread_list = self.snapshotter.lock().thread_names(),
                Capture::FdTargets => self.fd_list = self.snapshotter.lock().fd_targets(),
                Capture::Nothing => {}
            }
        }
    }

    fn rate_limited(&self, now: SystemTime) -> Option<&'static str> {
        if self.debug {
            return None;
        }
        if self.ledger.analysis_count(&self.version) >= self.limits.analysis_max_times_per_version {
            return Some("max analysis times per version");
        }
        let first_launch = self.ledger.first_launch(&self.version)?;
        let elapsed = now.duration_since(first_launch).unwrap_or_default();
        (elapsed > self.limits.analysis_period()).then_some("analysis period per version")
    }
}
