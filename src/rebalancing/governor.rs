use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Minimum-interval throttle between executed rebalances.
///
/// Uses a monotonic clock. Only the engine marks it, and only after an
/// execution attempt; planning never does.
#[derive(Debug, Default)]
pub struct Governor {
    last_rebalance: Option<Instant>,
    stats: GovernorStats,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorStats {
    pub passes_allowed: u64,
    pub passes_throttled: u64,
    pub rebalances_marked: u64,
}

/// Governor status report for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorStatus {
    /// A pass is running right now
    pub in_progress: bool,
    pub seconds_since_last_rebalance: Option<u64>,
    pub min_rebalance_interval_secs: u64,
    pub can_rebalance: bool,
    pub reason: String,
    pub stats: GovernorStats,
}

impl Governor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a rebalance may run now, with a human-readable reason.
    pub fn can_rebalance(&self, min_interval: Duration) -> (bool, String) {
        self.check_at(Instant::now(), min_interval)
    }

    /// Like [`can_rebalance`](Self::can_rebalance), but counts the outcome.
    pub fn admit(&mut self, min_interval: Duration) -> (bool, String) {
        let (allowed, reason) = self.can_rebalance(min_interval);
        if allowed {
            self.stats.passes_allowed += 1;
        } else {
            self.stats.passes_throttled += 1;
        }
        (allowed, reason)
    }

    pub fn mark_rebalance(&mut self) {
        self.mark_at(Instant::now());
    }

    pub fn last_rebalance(&self) -> Option<Instant> {
        self.last_rebalance
    }

    pub fn stats(&self) -> &GovernorStats {
        &self.stats
    }

    pub fn status(&self, min_interval: Duration, in_progress: bool) -> GovernorStatus {
        let (can_rebalance, reason) = self.can_rebalance(min_interval);
        GovernorStatus {
            in_progress,
            seconds_since_last_rebalance: self.last_rebalance.map(|t| t.elapsed().as_secs()),
            min_rebalance_interval_secs: min_interval.as_secs(),
            can_rebalance,
            reason,
            stats: self.stats.clone(),
        }
    }

    fn check_at(&self, now: Instant, min_interval: Duration) -> (bool, String) {
        if let Some(last) = self.last_rebalance {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < min_interval {
                let wait = (min_interval - elapsed).as_secs_f64().ceil() as u64;
                return (false, format!("Must wait {} more seconds", wait));
            }
        }
        (true, "Rebalancing allowed".to_string())
    }

    fn mark_at(&mut self, now: Instant) {
        self.last_rebalance = Some(now);
        self.stats.rebalances_marked += 1;
    }
}
