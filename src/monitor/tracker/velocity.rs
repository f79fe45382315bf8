use super::{REASON_HEAP_VELOCITY, Tracker, TrackerState, Verdict};
use crate::config::MonitorConfig;
use crate::system::SystemSnapshot;

/// Heap growth rate between two snapshots, in KiB per second. No debounce.
#[derive(Debug, Default)]
pub struct HeapVelocityTracker {
    last_rate: f64,
}

impl HeapVelocityTracker {
    fn growth_rate(current: &SystemSnapshot, previous: &SystemSnapshot) -> Option<f64> {
        let elapsed = current
            .taken_at
            .checked_duration_since(previous.taken_at)?
            .as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let grown = current.java_heap.used.saturating_sub(previous.java_heap.used);
        Some(grown as f64 / 1024.0 / elapsed)
    }
}

impl Tracker for HeapVelocityTracker {
    fn name(&self) -> &'static str {
        "heap_velocity"
    }

    fn track(
        &mut self,
        current: &SystemSnapshot,
        previous: Option<&SystemSnapshot>,
        config: &MonitorConfig,
    ) -> Verdict {
        let Some(rate) = previous.and_then(|previous| Self::growth_rate(current, previous)) else {
            self.last_rate = 0.0;
            return Verdict::quiet();
        };
        self.last_rate = rate;
        if rate > config.heap_growth_rate_threshold_kb_per_sec as f64 {
            tracing::info!(kb_per_sec = rate, "heap growing fast");
            Verdict::trigger(REASON_HEAP_VELOCITY)
        } else {
            Verdict::quiet()
        }
    }

    fn reset(&mut self) {
        self.last_rate = 0.0;
    }

    fn state(&self) -> TrackerState {
        TrackerState {
            over_threshold_count: 0,
            last_value: self.last_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn fast_growth_triggers_regardless_of_level() {
        let config = MonitorConfig {
            heap_growth_rate_threshold_kb_per_sec: 1024,
            ..MonitorConfig::default()
        };
        let start = Instant::now();
        let a = SystemSnapshot::at(start).with_heap(4096 * MIB, 10 * MIB);
        let b = SystemSnapshot::at(start + Duration::from_secs(2)).with_heap(4096 * MIB, 14 * MIB);
        let mut tracker = HeapVelocityTracker::default();

        assert!(!tracker.track(&a, None, &config).triggered);
        let verdict = tracker.track(&b, Some(&a), &config);
        assert!(verdict.triggered);
        assert_eq!(verdict.reason, REASON_HEAP_VELOCITY);
        assert!((tracker.state().last_value - 2048.0).abs() < 1e-6);
    }

    #[test]
    fn same_instant_or_shrinking_heap_is_quiet() {
        let config = MonitorConfig::default();
        let start = Instant::now();
        let a = SystemSnapshot::at(start).with_heap(4096 * MIB, 100 * MIB);
        let b = SystemSnapshot::at(start).with_heap(4096 * MIB, 4000 * MIB);
        let c = SystemSnapshot::at(start + Duration::from_secs(1)).with_heap(4096 * MIB, 50 * MIB);
        let mut tracker = HeapVelocityTracker::default();

        assert!(!tracker.track(&b, Some(&a), &config).triggered);
        assert!(!tracker.track(&c, Some(&a), &config).triggered);
    }
}
