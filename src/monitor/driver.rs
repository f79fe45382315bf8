//! The async supervisor around [`TriggerLoop`]: scheduling, dump hand-off, analysis.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::files::{DumpFiles, DumpPair};
use super::ledger::{AnalysisLedger, FileLedger};
use super::trigger::{LoopState, Phase, PollOutcome, SharedSnapshotter, TriggerLoop};
use super::upload::{HprofKind, HprofUploader, ReportUploader};
use super::{AnalysisListener, Host, LoggingListener, MonitorError, StandaloneHost};
use crate::analysis::{AnalysisError, AnalysisService, HeapReport, RunningInfo, write_report};
use crate::config::Config;
use crate::format::bytes_to_mb;
use crate::heap::{HeapIndexer, JsonHeapIndexer};
use crate::system::{Collector, DiskSpaceProbe, Snapshotter, StorageProbe};

pub const REANALYSIS_REASON: &str = "reanalysis";

/// Everything the monitor talks to outside itself.
pub struct Collaborators {
    pub snapshotter: Box<dyn Snapshotter>,
    pub indexer: Arc<dyn HeapIndexer>,
    pub ledger: Arc<dyn AnalysisLedger>,
    pub storage: Arc<dyn StorageProbe>,
    pub host: Arc<dyn Host>,
    pub report_uploader: Option<Arc<dyn ReportUploader>>,
    pub hprof_uploader: Option<Arc<dyn HprofUploader>>,
    pub listener: Arc<dyn AnalysisListener>,
}

impl Collaborators {
    /// sysinfo collector for `pid`, JSON heap documents, a ledger under the storage root.
    pub fn for_process(config: &Config, pid: u32) -> Self {
        let files = DumpFiles::new(config.storage.root());
        Collaborators {
            snapshotter: Box::new(Collector::new(pid, &config.dump)),
            indexer: Arc::new(JsonHeapIndexer),
            ledger: Arc::new(FileLedger::open(files.ledger_path())),
            storage: Arc::new(DiskSpaceProbe),
            host: Arc::new(StandaloneHost),
            report_uploader: None,
            hprof_uploader: None,
            listener: Arc::new(LoggingListener),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Finished { report_path: PathBuf },
    Failed(String),
    /// The dump came back empty and was discarded.
    EmptyDump,
}

struct PendingAnalysis {
    pair: DumpPair,
    running_info: RunningInfo,
    re_analysis_times: u32,
}

struct Shared {
    config: Config,
    files: DumpFiles,
    trigger: Mutex<TriggerLoop>,
    snapshotter: SharedSnapshotter,
    service: AnalysisService,
    ledger: Arc<dyn AnalysisLedger>,
    host: Arc<dyn Host>,
    report_uploader: Option<Arc<dyn ReportUploader>>,
    hprof_uploader: Option<Arc<dyn HprofUploader>>,
    listener: Arc<dyn AnalysisListener>,
    /// Held for a whole analysis run; only one heap graph is loaded at a time.
    analysis_guard: Mutex<()>,
    launched: AtomicBool,
    recovered: AtomicBool,
    pending: Mutex<VecDeque<PendingAnalysis>>,
    generation: watch::Sender<u64>,
    outcome: watch::Sender<Option<AnalysisOutcome>>,
    started_at: Instant,
}

#[derive(Clone)]
pub struct OomMonitor {
    shared: Arc<Shared>,
}

impl OomMonitor {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let files = DumpFiles::new(config.storage.root());
        let snapshotter: SharedSnapshotter = Arc::new(Mutex::new(collaborators.snapshotter));
        let trigger = TriggerLoop::new(
            &config,
            &files,
            Arc::clone(&snapshotter),
            Arc::clone(&collaborators.ledger),
            collaborators.storage,
        );
        let service = AnalysisService::new(collaborators.indexer, config.analysis.clone());
        let (generation, _) = watch::channel(0);
        let (outcome, _) = watch::channel(None);

        OomMonitor {
            shared: Arc::new(Shared {
                config,
                files,
                trigger: Mutex::new(trigger),
                snapshotter,
                service,
                ledger: collaborators.ledger,
                host: collaborators.host,
                report_uploader: collaborators.report_uploader,
                hprof_uploader: collaborators.hprof_uploader,
                listener: collaborators.listener,
                analysis_guard: Mutex::new(()),
                launched: AtomicBool::new(false),
                recovered: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
                generation,
                outcome,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn files(&self) -> &DumpFiles {
        &self.shared.files
    }

    pub fn phase(&self) -> Phase {
        self.shared.trigger.lock().phase()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Starts polling on the current tokio runtime. Returns `Ok(false)` when the loop
    /// was already running, has terminated, or this is not the primary process.
    pub fn start(&self) -> Result<bool, MonitorError> {
        let handle = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let started = self
            .shared
            .trigger
            .lock()
            .request_start(self.shared.host.is_primary_process(), SystemTime::now());
        if !started {
            return Ok(false);
        }
        if !self.shared.recovered.swap(true, Ordering::SeqCst) {
            self.shared.recover_stale(&handle);
        }
        self.spawn_poll_task(&handle);
        Ok(true)
    }

    /// Cancels the pending sleep; a poll already running completes.
    pub fn stop(&self) {
        self.shared.trigger.lock().request_stop();
        self.shared.bump_generation();
    }

    pub fn on_background(&self) {
        if self.shared.trigger.lock().on_background() {
            self.shared.bump_generation();
        }
    }

    /// Restarts a loop paused by [`on_background`](Self::on_background) and flushes
    /// analyses that were waiting for the foreground.
    pub fn on_foreground(&self) -> Result<(), MonitorError> {
        let handle = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let restarted = self
            .shared
            .trigger
            .lock()
            .on_foreground(self.shared.host.is_primary_process(), SystemTime::now());
        if restarted {
            self.spawn_poll_task(&handle);
        }

        let jobs: Vec<PendingAnalysis> = self.shared.pending.lock().drain(..).collect();
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "flushing deferred analyses");
            let shared = Arc::clone(&self.shared);
            handle.spawn_blocking(move || {
                for job in jobs {
                    let outcome = shared.analyze(job);
                    shared.outcome.send_replace(Some(outcome));
                }
            });
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AnalysisOutcome>> {
        self.shared.outcome.subscribe()
    }

    /// Resolves once a triggered analysis has finished, failed, or been discarded.
    pub async fn finished(&self) -> Option<AnalysisOutcome> {
        let mut rx = self.subscribe();
        let outcome = rx.wait_for(Option::is_some).await.ok()?;
        outcome.clone()
    }

    fn spawn_poll_task(&self, handle: &Handle) {
        let shared = Arc::clone(&self.shared);
        let mut generation = shared.generation.subscribe();
        handle.spawn(async move {
            let mut delay = Duration::from_millis(shared.config.monitor.initial_delay_ms);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = generation.changed() => break,
                }

                let poller = Arc::clone(&shared);
                let outcome = match tokio::task::spawn_blocking(move || poller.poll_once()).await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!(error = %err, "poll task failed");
                        break;
                    }
                };
                if let PollOutcome::Triggered(decision) = &outcome {
                    Arc::clone(&shared).launch(decision.joined());
                }
                if outcome.loop_state() == LoopState::Terminate {
                    break;
                }
                delay = Duration::from_millis(shared.config.monitor.loop_interval_ms);
            }
            tracing::debug!("poll task exited");
        });
    }
}

impl Shared {
    fn version(&self) -> &str {
        &self.config.general.app_version
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    fn poll_once(&self) -> PollOutcome {
        self.trigger.lock().poll(SystemTime::now())
    }

    fn launch(self: Arc<Self>, reason: String) {
        if self.launched.swap(true, Ordering::SeqCst) {
            tracing::warn!("dump already launched in this process");
            return;
        }
        tokio::task::spawn_blocking(move || {
            if let Some(outcome) = self.hand_off(&reason) {
                self.outcome.send_replace(Some(outcome));
            }
        });
    }

    /// Dumps and analyzes. `None` when the analysis was queued for the foreground.
    fn hand_off(&self, reason: &str) -> Option<AnalysisOutcome> {
        let running_info = self.running_info(reason);
        let pair = match self.files.new_pair(self.version(), SystemTime::now()) {
            Ok(pair) => pair,
            Err(err) => return Some(self.fail(None, AnalysisError::Dump(err.to_string()))),
        };

        let started = Instant::now();
        if let Err(err) = self.snapshotter.lock().dump_heap(&pair.hprof) {
            return Some(self.fail(Some(&pair), AnalysisError::Dump(err.to_string())));
        }
        let size = std::fs::metadata(&pair.hprof).map_or(0, |m| m.len());
        tracing::info!(
            path = %pair.hprof.display(),
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "heap dumped"
        );
        if size == 0 {
            tracing::warn!(path = %pair.hprof.display(), "heap dump is empty, discarding");
            pair.delete();
            return Some(AnalysisOutcome::EmptyDump);
        }

        let job = PendingAnalysis {
            pair,
            running_info,
            re_analysis_times: 0,
        };
        if !self.host.is_foreground() {
            tracing::info!("host in background, deferring analysis");
            self.pending.lock().push_back(job);
            return None;
        }
        Some(self.analyze(job))
    }

    fn analyze(&self, job: PendingAnalysis) -> AnalysisOutcome {
        let _running = self.analysis_guard.lock();
        let PendingAnalysis {
            pair,
            running_info,
            re_analysis_times,
        } = job;

        if let Err(source) = pair.mark_in_progress() {
            let err = AnalysisError::Io {
                path: pair.json.clone(),
                source,
            };
            return self.fail(Some(&pair), err);
        }
        if let Err(err) = self.ledger.increment_analysis_count(self.version()) {
            tracing::warn!(error = %err, "failed to record analysis count");
        }

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut report = self.service.run(&pair.hprof, running_info)?;
            report.re_analysis_times = re_analysis_times;
            write_report(&report, &pair.json)?;
            Ok::<HeapReport, AnalysisError>(report)
        }))
        .unwrap_or_else(|panic| Err(AnalysisError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(report) => {
                if let Some(uploader) = &self.report_uploader {
                    uploader.upload(&pair.json, &report);
                }
                if let Some(uploader) = &self.hprof_uploader {
                    uploader.upload(&pair.hprof, HprofKind::Origin);
                }
                self.listener.on_success(&pair.json, &report);
                AnalysisOutcome::Finished {
                    report_path: pair.json,
                }
            }
            Err(err) => self.fail(Some(&pair), err),
        }
    }

    fn fail(&self, pair: Option<&DumpPair>, err: AnalysisError) -> AnalysisOutcome {
        if let Some(pair) = pair {
            pair.delete();
        }
        self.listener.on_failure(&err);
        AnalysisOutcome::Failed(err.to_string())
    }

    fn recover_stale(self: &Arc<Self>, handle: &Handle) {
        let scan = match self.files.scan_stale(self.version()) {
            Ok(scan) => scan,
            Err(err) => {
                tracing::warn!(error = %err, "failed to scan old dump files");
                return;
            }
        };

        if let Some(uploader) = &self.hprof_uploader {
            for path in &scan.manual {
                uploader.upload(path, HprofKind::Stripped);
            }
        }
        if scan.reanalyze.is_empty() {
            return;
        }

        tracing::info!(count = scan.reanalyze.len(), "re-analyzing unfinished dumps");
        let shared = Arc::clone(self);
        handle.spawn_blocking(move || {
            for pair in scan.reanalyze {
                let running_info = shared.running_info(REANALYSIS_REASON);
                shared.analyze(PendingAnalysis {
                    pair,
                    running_info,
                    re_analysis_times: 1,
                });
            }
        });
    }

    fn running_info(&self, reason: &str) -> RunningInfo {
        let trigger = self.trigger.lock();
        let snapshot = trigger.last_snapshot().copied();
        let mut info = RunningInfo {
            thread_list: trigger.thread_list().to_vec(),
            fd_list: trigger.fd_list().to_vec(),
            os: std::env::consts::OS.to_string(),
            os_version: sysinfo::System::os_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            app_version: self.config.general.app_version.clone(),
            current_page: self.host.current_page(),
            usage_seconds: self.started_at.elapsed().as_secs(),
            now_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            dump_reason: reason.to_string(),
            monitor_version: env!("CARGO_PKG_VERSION").to_string(),
            ..RunningInfo::default()
        };
        drop(trigger);

        if let Some(snapshot) = snapshot {
            info.jvm_max_mb = bytes_to_mb(snapshot.java_heap.max);
            info.jvm_used_mb = bytes_to_mb(snapshot.java_heap.used);
            info.vss_mb = snapshot.proc_status.vss_kb / 1024;
            info.rss_mb = snapshot.proc_status.rss_kb / 1024;
            info.thread_count = snapshot.proc_status.thread_count;
            info.fd_count = snapshot.fd_count;
            info.device_mem_total_mb = snapshot.mem_info.total_kb / 1024;
            info.device_mem_available_mb = snapshot.mem_info.available_kb / 1024;
        }
        info
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode(n: u8) {
        if n == 0 {
            std::panic::panic_any(n);
        }
        panic!("boom {n}");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = std::panic::catch_unwind(|| explode(7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");
        let caught = std::panic::catch_unwind(|| explode(0)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "unknown panic");
    }

    #[test]
    fn start_outside_runtime_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root_dir = Some(dir.path().to_path_buf());
        let monitor = OomMonitor::new(config.clone(), Collaborators::for_process(&config, std::process::id()));
        assert!(matches!(monitor.start(), Err(MonitorError::NoRuntime)));
        assert_eq!(monitor.phase(), Phase::Stopped);
    }
}
