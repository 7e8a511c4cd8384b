//! Elapsed-time clock of a streaming session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Wall-clock source in milliseconds
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// System time since the Unix epoch
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests and replays
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Session timeline that excludes suspended intervals.
///
/// `elapsed = now - start - halted` while running,
/// `elapsed = pause - start - halted` while suspended and `0` before the
/// first start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedClock {
    start_time: Option<u64>,
    pause_time: Option<u64>,
    halted: u64,
}

impl ElapsedClock {
    /// Start a fresh timeline at `now`
    pub fn start(&mut self, now: u64) {
        self.start_time = Some(now);
        self.pause_time = None;
        self.halted = 0;
    }

    /// Freeze the timeline at `now`
    pub fn pause(&mut self, now: u64) {
        if self.start_time.is_some() && self.pause_time.is_none() {
            self.pause_time = Some(now);
        }
    }

    /// Continue after a pause; the paused interval is added to `halted`
    pub fn resume(&mut self, now: u64) {
        if let Some(pause) = self.pause_time.take() {
            self.halted += now.saturating_sub(pause);
        }
    }

    /// Unset the clock entirely
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some() && self.pause_time.is_none()
    }

    pub fn halted(&self) -> u64 {
        self.halted
    }

    pub fn elapsed(&self, now: u64) -> u64 {
        let Some(start) = self.start_time else {
            return 0;
        };
        let end = self.pause_time.unwrap_or(now);

        end.saturating_sub(start).saturating_sub(self.halted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_clock_is_zero() {
        let clock = ElapsedClock::default();
        assert_eq!(clock.elapsed(123_456), 0);
    }

    #[test]
    fn test_suspend_resume_excludes_pause() {
        let mut clock = ElapsedClock::default();
        clock.start(1_000);
        clock.pause(4_000);
        assert_eq!(clock.elapsed(9_000), 3_000);

        clock.resume(10_000);
        assert_eq!(clock.elapsed(12_500), 3_000 + 2_500);
        assert_eq!(clock.halted(), 6_000);
    }

    #[test]
    fn test_reset_discards_halted() {
        let mut clock = ElapsedClock::default();
        clock.start(0);
        clock.pause(10);
        clock.resume(20);
        clock.reset();
        assert_eq!(clock.halted(), 0);
        assert_eq!(clock.elapsed(500), 0);

        clock.start(500);
        assert_eq!(clock.elapsed(700), 200);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_millis(), 15);
        clock.set(100);
        assert_eq!(clock.now_millis(), 100);
    }
}
