use super::{Capture, Debounce, REASON_THREAD_OOM, Tracker, TrackerState, Verdict};
use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

/// Tolerated drop in thread count between two over-threshold polls.
pub const THREAD_COUNT_GAP: f64 = 50.0;

#[derive(Debug, Default)]
pub struct ThreadTracker {
    debounce: Debounce,
}

impl Tracker for ThreadTracker {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn track(
        &mut self,
        current: &SystemSnapshot,
        _previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict {
        let threads = current.proc_status.thread_count;
        let value = f64::from(threads);
        if threads > config.thread_threshold && value >= self.debounce.last_value() - THREAD_COUNT_GAP
        {
            if self.debounce.over(value, config.max_over_threshold_count) {
                tracing::info!(threads, "thread count over threshold");
                return Verdict::trigger(REASON_THREAD_OOM);
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
        Capture::ThreadNames
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn run(samples: &[u32]) -> (Vec<bool>, TrackerState) {
        let config = MonitorConfig::default();
        let mut tracker = ThreadTracker::default();
        let now = Instant::now();
        let verdicts = samples
            .iter()
            .map(|&n| {
                let snap = SystemSnapshot::at(now).with_threads(n);
                tracker.track(&snap, None, &config).triggered
            })
            .collect();
        (verdicts, tracker.state())
    }

    #[test]
    fn steady_climb_triggers_on_third_sample() {
        let (verdicts, state) = run(&[800, 820, 780]);
        assert_eq!(verdicts, vec![false, false, true]);
        assert_eq!(state.over_threshold_count, 3);
    }

    #[test]
    fn drop_larger_than_gap_resets() {
        // 760 is 60 below 820, more than the 50 gap.
        let (verdicts, state) = run(&[800, 820, 760]);
        assert_eq!(verdicts, vec![false, false, false]);
        assert_eq!(state.over_threshold_count, 0);
    }

    #[test]
    fn falling_under_threshold_resets() {
        let (verdicts, state) = run(&[800, 810, 700]);
        assert!(verdicts.iter().all(|t| !t));
        assert_eq!(state.over_threshold_count, 0);
        assert_eq!(state.last_value, 700.0);
    }

    #[test]
    fn gap_is_measured_from_the_previous_poll_after_a_reset() {
        // 900 and 840 each fall more than the gap below the poll before them.
        let (verdicts, state) = run(&[1000, 900, 840, 830, 820]);
        assert!(verdicts.iter().all(|t| !t));
        assert_eq!(state.over_threshold_count, 2);
        assert_eq!(state.last_value, 820.0);
    }
}
