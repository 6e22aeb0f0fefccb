use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::timer::{CalibrationStats, Timer};

#[derive(Debug, Default)]
struct ManualClock {
    now_ns: u64,
    sleeps: Vec<Duration>,
    frame_times: Vec<Duration>,
}

/// Simulated clock: `sleep` advances time instantly and is recorded.
///
/// Clones share one clock, so a timer handed to a component can be inspected
/// from the outside. Used for dry runs and tests of settle delays and frame pacing.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualClock> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, d: Duration) {
        self.lock().now_ns += d.as_nanos() as u64;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }
}

impl Timer for ManualTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.lock().now_ns
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn sleep(&self, d: Duration) {
        let mut clock = self.lock();
        clock.now_ns += d.as_nanos() as u64;
        clock.sleeps.push(d);
    }

    fn record_frame(&mut self, d: Duration) {
        self.lock().frame_times.push(d);
    }

    fn frame_count(&self) -> usize {
        self.lock().frame_times.len()
    }

    fn calibration_stats(&self) -> CalibrationStats {
        CalibrationStats::from_frame_times(&self.lock().frame_times)
    }
}
