use super::{Debounce, REASON_HEAP_OOM, REASON_HIGH_WATERMARK, REASON_HUGE_DELTA, Tracker, TrackerState, Verdict};
use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

/// Tolerated drop in heap ratio between two over-threshold polls.
pub const HEAP_RATIO_GAP: f64 = 0.05;

#[derive(Debug, Default)]
pub struct HeapTracker {
    debounce: Debounce,
}

impl Tracker for HeapTracker {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn track(
        &mut self,
        current: &SystemSnapshot,
        previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict {
        let heap = current.java_heap;
        let rate = f64::from(heap.rate);

        if rate > f64::from(config.force_dump_java_heap_max_threshold) {
            tracing::info!(rate, "heap above high watermark");
            self.debounce.over(rate, 0);
            return Verdict::trigger(REASON_HIGH_WATERMARK);
        }
        if let Some(previous) = previous {
            let delta = heap.used.saturating_sub(previous.java_heap.used);
            if delta > config.force_dump_java_heap_delta_threshold_kb * 1024 {
                tracing::info!(delta_bytes = delta, "heap grew past delta threshold");
                self.debounce.over(rate, 0);
                return Verdict::trigger(REASON_HUGE_DELTA);
            }
        }

        let threshold = f64::from(config.heap_threshold_for(heap.max));
        if rate > threshold && rate >= self.debounce.last_value() - HEAP_RATIO_GAP {
            if self.debounce.over(rate, config.max_over_threshold_count) {
                return Verdict::trigger(REASON_HEAP_OOM);
            }
            Verdict::counting()
        } else {
            self.debounce.settle(rate);
            Verdict::quiet()
        }
    }

    fn reset(&mut self) {
        self.debounce.reset();
    }

    fn state(&self) -> TrackerState {
        self.debounce.state()
    }
}
