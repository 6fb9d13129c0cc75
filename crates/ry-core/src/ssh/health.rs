//! Latency-based session health classification.
//!
//! Thresholds:
//!
//! | status | condition |
//! |---|---|
//! | unhealthy | missed probe, avg > 500 ms, or current > 1000 ms |
//! | degraded | avg 200-500 ms, or current 500-1000 ms |
//! | healthy | everything else |
//!
//! The average is a moving window over the last three samples, so one good
//! probe after a bad stretch does not instantly flip the session healthy,
//! and recovery still happens within seconds.

use super::types::SessionHealth;
use std::collections::VecDeque;

/// Moving-average window.
const WINDOW: usize = 3;

/// Degraded band for the moving average (ms).
const AVG_DEGRADED: f64 = 200.0;
/// Above this average the session is unhealthy (ms).
const AVG_UNHEALTHY: f64 = 500.0;
/// Degraded band for the latest sample (ms).
const CURRENT_DEGRADED: f64 = 500.0;
/// Above this latest sample the session is unhealthy (ms).
const CURRENT_UNHEALTHY: f64 = 1000.0;

/// Classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthClass {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Classify a health summary against the thresholds.
pub fn classify(health: &SessionHealth) -> HealthClass {
    if health.missed > 0
        || health.avg_ms > AVG_UNHEALTHY
        || health.current_ms > CURRENT_UNHEALTHY
    {
        return HealthClass::Unhealthy;
    }
    if health.avg_ms >= AVG_DEGRADED || health.current_ms >= CURRENT_DEGRADED {
        return HealthClass::Degraded;
    }
    HealthClass::Healthy
}

/// Accumulates probe round-trips into a windowed summary.
#[derive(Debug, Default)]
pub struct HealthTracker {
    window: VecDeque<f64>,
    current_ms: f64,
    samples: u64,
    missed: u32,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful probe round-trip.
    pub fn record_sample(&mut self, rtt_ms: f64) {
        if self.window.len() >= WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(rtt_ms);
        self.current_ms = rtt_ms;
        self.samples += 1;
        self.missed = 0;
    }

    /// Record a probe that timed out.
    pub fn record_miss(&mut self) {
        self.missed += 1;
    }

    pub fn summary(&self) -> SessionHealth {
        let avg_ms = if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<f64>() / self.window.len() as f64
        };
        SessionHealth {
            avg_ms,
            current_ms: self.current_ms,
            samples: self.samples,
            missed: self.missed,
        }
    }

    pub fn classify(&self) -> HealthClass {
        classify(&self.summary())
    }

    /// Reset for a fresh connection.
    pub fn reset(&mut self) {
        self.window.clear();
        self.current_ms = 0.0;
        self.samples = 0;
        self.missed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_pings_stay_healthy() {
        let mut tracker = HealthTracker::new();
        for rtt in [20.0, 35.0, 28.0, 40.0] {
            tracker.record_sample(rtt);
        }
        assert_eq!(tracker.classify(), HealthClass::Healthy);
    }

    #[test]
    fn test_degradation_scenario() {
        // Sample sequence from a link going bad: the moving average crosses
        // 200ms once the 200+ samples dominate the window.
        let mut tracker = HealthTracker::new();
        let mut classes = Vec::new();
        for rtt in [120.0, 150.0, 210.0, 260.0, 260.0] {
            tracker.record_sample(rtt);
            classes.push(tracker.classify());
        }
        // Healthy through the early samples.
        assert_eq!(classes[0], HealthClass::Healthy);
        assert_eq!(classes[1], HealthClass::Healthy);
        // Degraded as the average crosses the 200ms line, and stays there.
        assert_eq!(*classes.last().unwrap(), HealthClass::Degraded);
        assert!(classes.contains(&HealthClass::Degraded));
        let summary = tracker.summary();
        assert!(summary.avg_ms > 200.0 && summary.avg_ms < 500.0);
    }

    #[test]
    fn test_single_current_spike_degrades() {
        let mut tracker = HealthTracker::new();
        tracker.record_sample(50.0);
        tracker.record_sample(600.0);
        // avg (325) and current (600) both in the degraded band
        assert_eq!(tracker.classify(), HealthClass::Degraded);
    }

    #[test]
    fn test_current_over_a_second_is_unhealthy() {
        let mut tracker = HealthTracker::new();
        tracker.record_sample(10.0);
        tracker.record_sample(1200.0);
        assert_eq!(tracker.classify(), HealthClass::Unhealthy);
    }

    #[test]
    fn test_missed_probe_is_unhealthy_until_recovery() {
        let mut tracker = HealthTracker::new();
        tracker.record_sample(30.0);
        tracker.record_miss();
        assert_eq!(tracker.classify(), HealthClass::Unhealthy);
        // A successful probe recovers.
        tracker.record_sample(30.0);
        assert_eq!(tracker.classify(), HealthClass::Healthy);
    }

    #[test]
    fn test_high_average_is_unhealthy() {
        let mut tracker = HealthTracker::new();
        for rtt in [550.0, 620.0, 580.0] {
            tracker.record_sample(rtt);
        }
        assert_eq!(tracker.classify(), HealthClass::Unhealthy);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut tracker = HealthTracker::new();
        tracker.record_sample(700.0);
        tracker.reset();
        assert_eq!(tracker.classify(), HealthClass::Healthy);
        assert_eq!(tracker.summary().samples, 0);
    }
}
