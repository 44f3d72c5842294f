//! Transmit deadlock detection, sampled from the periodic timer.

use crate::config::{TX_CHECK_THRESHOLD, TX_DEADLOCK_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// No progress for a while; try one reclaim pass outside the interrupt.
    ForceReclaim,
    /// No progress for too long; the controller must be reset.
    Deadlocked,
}

pub struct DeadlockMonitor {
    last_done: u64,
    warnings: u32,
    check_threshold: u32,
    deadlock_threshold: u32,
}

impl DeadlockMonitor {
    pub fn new() -> Self {
        Self::with_thresholds(TX_CHECK_THRESHOLD, TX_DEADLOCK_THRESHOLD)
    }

    pub fn with_thresholds(check_threshold: u32, deadlock_threshold: u32) -> Self {
        debug_assert!(check_threshold < deadlock_threshold);
        Self {
            last_done: 0,
            warnings: 0,
            check_threshold,
            deadlock_threshold,
        }
    }

    #[inline]
    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// One timer period. `done` is the transmit engine's completion count.
    pub fn check(&mut self, done: u64, free: usize, capacity: usize) -> WatchdogVerdict {
        if done != self.last_done || free >= capacity {
            self.last_done = done;
            self.warnings = 0;
            return WatchdogVerdict::Healthy;
        }

        self.warnings += 1;
        if self.warnings >= self.deadlock_threshold {
            self.warnings = 0;
            WatchdogVerdict::Deadlocked
        } else if self.warnings == self.check_threshold {
            WatchdogVerdict::ForceReclaim
        } else {
            WatchdogVerdict::Healthy
        }
    }

    /// Restart sampling from `done`, after a ring reset.
    pub fn reset(&mut self, done: u64) {
        self.last_done = done;
        self.warnings = 0;
    }
}

impl Default for DeadlockMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_then_deadlock() {
        let mut monitor = DeadlockMonitor::new();
        assert_eq!(monitor.check(0, 5, 8), WatchdogVerdict::Healthy);
        assert_eq!(monitor.warnings(), 1);
        assert_eq!(monitor.check(0, 5, 8), WatchdogVerdict::ForceReclaim);
        assert_eq!(monitor.check(0, 5, 8), WatchdogVerdict::Healthy);
        assert_eq!(monitor.check(0, 5, 8), WatchdogVerdict::Deadlocked);
        assert_eq!(monitor.warnings(), 0);
    }

    #[test]
    fn test_progress_clears_warnings() {
        let mut monitor = DeadlockMonitor::new();
        // The first sample only records the new count.
        monitor.check(10, 5, 8);
        monitor.check(10, 5, 8);
        monitor.check(10, 5, 8);
        assert_eq!(monitor.warnings(), 2);
        assert_eq!(monitor.check(11, 5, 8), WatchdogVerdict::Healthy);
        assert_eq!(monitor.warnings(), 0);
    }

    #[test]
    fn test_idle_ring_is_never_suspect() {
        let mut monitor = DeadlockMonitor::new();
        for _ in 0..10 {
            assert_eq!(monitor.check(0, 8, 8), WatchdogVerdict::Healthy);
        }
        assert_eq!(monitor.warnings(), 0);
    }
}
