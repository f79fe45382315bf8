use super::{Capture, Debounce, REASON_FD_OOM, Tracker, TrackerState, Verdict};
use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

pub const FD_COUNT_GAP: f64 = 50.0;

#[derive(Debug, Default)]
pub struct FdTracker {
    debounce: Debounce,
}

impl Tracker for FdTracker {
    fn name(&self) -> &'static str {
        "fd"
    }

    fn track(
        &mut self,
        current: &SystemSnapshot,
        _previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict {
        let fds = current.fd_count;
        let value = f64::from(fds);
        if fds > config.fd_threshold && value >= self.debounce.last_value() - FD_COUNT_GAP {
            if self.debounce.over(value, config.max_over_threshold_count) {
                tracing::info!(fds, "fd count over threshold");
                return Verdict::trigger(REASON_FD_OOM);
            }
            Verdict::counting()
        } else {
            self.debounce.settle(value);
            Verdict::quiet()
        }
    }

    fn reset(&mut self) {
        self.debounce.reset();
    }

    fn state(&self) -> TrackerState {
        self.debounce.state()
    }

    fn capture(&self) -> Capture {
        Capture::FdTargets
    }
}
