use std::sync::atomic::{AtomicI64, Ordering};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Engine-assigned execution identifier (ComfyUI calls it a prompt id).
pub type PromptId = String;

/// Workflow node identifier. Numeric-valued, but always carried as a string.
pub type NodeId = String;

/// Source of wall-clock time for execution timing.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The real UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

/// Seconds elapsed from `start` to `end`, never negative.
pub fn elapsed_secs(start: Timestamp, end: Timestamp) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn manual_clock_advances() {
        let start = chrono::Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_millis(2500));
        assert!((elapsed_secs(start, clock.now()) - 2.5).abs() < 0.01);
    }

    #[test]
    fn elapsed_is_clamped_at_zero() {
        let now = chrono::Utc::now();
        let earlier = now - chrono::Duration::seconds(3);
        assert_eq!(elapsed_secs(now, earlier), 0.0);
    }
}
