//! Queue-depth-driven backpressure: adaptive polling and load shedding.

use crate::registry::JobPriority;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Adaptive interval for the claim loop.
///
/// - Full batch: halve the interval, floored at `base / 2` (keep up with a
///   burst).
/// - Empty read: multiply by 1.5, capped at `max` (back off when idle).
/// - Error: double, capped at `max` (stop hammering a sick store).
#[derive(Debug)]
pub struct AdaptivePollInterval {
    base_ms: u64,
    max_ms: u64,
    current_ms: AtomicU64,
}

impl AdaptivePollInterval {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            current_ms: AtomicU64::new(base_ms),
        }
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Relaxed)
    }

    /// The last claim returned a full batch.
    pub fn on_full_batch(&self) {
        let floor = self.base_ms / 2;
        let current = self.current_ms.load(Ordering::Relaxed);
        self.current_ms
            .store((current / 2).max(floor.max(1)), Ordering::Relaxed);
    }

    /// The last claim returned nothing.
    pub fn on_empty(&self) {
        let current = self.current_ms.load(Ordering::Relaxed);
        self.current_ms
            .store(((current * 3) / 2).min(self.max_ms), Ordering::Relaxed);
    }

    /// The last claim failed.
    pub fn on_error(&self) {
        let current = self.current_ms.load(Ordering::Relaxed);
        self.current_ms
            .store((current * 2).min(self.max_ms), Ordering::Relaxed);
    }

    /// A partial (non-empty, non-full) batch resets toward the base rate.
    pub fn on_partial_batch(&self) {
        self.current_ms.store(self.base_ms, Ordering::Relaxed);
    }
}

/// Sheds incoming submissions by priority when the queue grows too deep.
///
/// The shed set expands one priority at a time: at `threshold` entries low
/// priority is rejected, at `2 * threshold` normal joins it, at
/// `3 * threshold` everything is rejected. Acceptance resumes only once the
/// depth falls to the recovery watermark, giving the worker pool room to
/// drain without flapping.
#[derive(Debug)]
pub struct LoadShedder {
    threshold: u64,
    recovery: u64,
    // 0 = accept all, 1 = shed low, 2 = shed low+normal, 3 = shed all
    shed_level: AtomicU8,
}

impl LoadShedder {
    pub fn new(threshold: u64, recovery: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            recovery: recovery.min(threshold),
            shed_level: AtomicU8::new(0),
        }
    }

    /// Feed the latest observed queue depth.
    pub fn observe_depth(&self, depth: u64) {
        let current = self.shed_level.load(Ordering::Relaxed);

        let target = if depth >= self.threshold * 3 {
            3
        } else if depth >= self.threshold * 2 {
            2
        } else if depth >= self.threshold {
            1
        } else {
            0
        };

        let next = if target > current {
            target
        } else if depth <= self.recovery {
            0
        } else {
            // Between recovery and threshold: hold the current level
            current
        };

        if next != current {
            self.shed_level.store(next, Ordering::Relaxed);
            if next > current {
                tracing::warn!(depth, shed_level = next, "Load shedder expanding shed set");
            } else {
                tracing::info!(depth, "Load shedder resuming acceptance");
            }
        }
    }

    /// Whether a submission of the given priority should be rejected.
    pub fn should_shed(&self, priority: JobPriority) -> bool {
        let level = self.shed_level.load(Ordering::Relaxed);
        level > priority.rank()
    }

    pub fn shed_level(&self) -> u8 {
        self.shed_level.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_interval_halves_on_full_batch() {
        let interval = AdaptivePollInterval::new(1000, 10_000);
        interval.on_full_batch();
        assert_eq!(interval.current_ms(), 500);
        // Floored at base / 2
        interval.on_full_batch();
        assert_eq!(interval.current_ms(), 500);
    }

    #[test]
    fn test_adaptive_interval_grows_when_idle() {
        let interval = AdaptivePollInterval::new(1000, 10_000);
        interval.on_empty();
        assert_eq!(interval.current_ms(), 1500);
        interval.on_empty();
        assert_eq!(interval.current_ms(), 2250);
    }

    #[test]
    fn test_adaptive_interval_caps_at_max() {
        let interval = AdaptivePollInterval::new(1000, 3000);
        for _ in 0..10 {
            interval.on_empty();
        }
        assert_eq!(interval.current_ms(), 3000);
    }

    #[test]
    fn test_adaptive_interval_error_backoff() {
        let interval = AdaptivePollInterval::new(1000, 10_000);
        interval.on_error();
        assert_eq!(interval.current_ms(), 2000);
        interval.on_error();
        assert_eq!(interval.current_ms(), 4000);
        interval.on_partial_batch();
        assert_eq!(interval.current_ms(), 1000);
    }

    #[test]
    fn test_shedder_accepts_below_threshold() {
        let shedder = LoadShedder::new(100, 50);
        shedder.observe_depth(10);
        assert!(!shedder.should_shed(JobPriority::Low));
        assert!(!shedder.should_shed(JobPriority::High));
    }

    #[test]
    fn test_shedder_sheds_low_first() {
        let shedder = LoadShedder::new(100, 50);
        shedder.observe_depth(120);
        assert!(shedder.should_shed(JobPriority::Low));
        assert!(!shedder.should_shed(JobPriority::Normal));
        assert!(!shedder.should_shed(JobPriority::High));
    }

    #[test]
    fn test_shedder_expands_one_priority_at_a_time() {
        let shedder = LoadShedder::new(100, 50);

        shedder.observe_depth(250);
        assert!(shedder.should_shed(JobPriority::Normal));
        assert!(!shedder.should_shed(JobPriority::High));

        shedder.observe_depth(350);
        assert!(shedder.should_shed(JobPriority::High));
    }

    #[test]
    fn test_shedder_holds_until_recovery_watermark() {
        let shedder = LoadShedder::new(100, 50);

        shedder.observe_depth(120);
        assert_eq!(shedder.shed_level(), 1);

        // Depth dropped below threshold but not to recovery: keep shedding
        shedder.observe_depth(80);
        assert_eq!(shedder.shed_level(), 1);

        // At the recovery watermark acceptance resumes
        shedder.observe_depth(50);
        assert_eq!(shedder.shed_level(), 0);
        assert!(!shedder.should_shed(JobPriority::Low));
    }
}
