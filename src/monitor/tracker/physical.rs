use super::{Debounce, REASON_LMK_OOM, Tracker, TrackerState, Verdict};
use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

/// Device running out of physical memory, the low-memory-killer's trigger.
#[derive(Debug, Default)]
pub struct PhysicalMemoryTracker {
    debounce: Debounce,
}

impl Tracker for PhysicalMemoryTracker {
    fn name(&self) -> &'static str {
        "physical_memory"
    }

    fn track(
        &mut self,
        current: &SystemSnapshot,
        _previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict {
        let rate = current.mem_info.rate;
        if rate < config.device_memory_threshold {
            if self
                .debounce
                .over(f64::from(rate), config.max_over_threshold_count)
            {
                tracing::info!(
                    available_kb = current.mem_info.available_kb,
                    total_kb = current.mem_info.total_kb,
                    "device memory low"
                );
                return Verdict::trigger(REASON_LMK_OOM);
            }
            Verdict::counting()
        } else {
            self.debounce.settle(f64::from(rate));
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
