//! Upstream health tracking: consecutive-failure threshold with hysteresis.
//!
//! Grounded on the original's `LastOkFailCounter` -- a single success
//! restores `online` immediately, while going offline requires
//! `fail_threshold` consecutive failures in a row. Calls are guarded against
//! reordering: a refresh loop's result can only move the state forward in
//! time, never backward (spec §4.7).

use std::time::Instant;

use tracing::{info, warn};

/// Tracks consecutive failures across a proxy's refresh loops and flips
/// `online` when `fail_threshold` is reached. One instance is shared by all
/// three loops for a given proxy (spec §5).
pub struct HealthState {
    name: String,
    fail_threshold: u32,
    consecutive_fails: u32,
    online: bool,
    last_update: Option<Instant>,
}

impl HealthState {
    /// Starts in the "threshold reached" state -- not yet known good -- so
    /// the first successful refresh always emits an explicit online
    /// transition (spec §4.7).
    pub fn new(name: impl Into<String>, fail_threshold: u32) -> Self {
        HealthState {
            name: name.into(),
            fail_threshold: fail_threshold.max(1),
            consecutive_fails: 0,
            online: false,
            last_update: None,
        }
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn consecutive_fails(&self) -> u32 {
        self.consecutive_fails
    }

    /// Record a successful refresh observed at `now`. Stale results (older
    /// than the last one applied) are dropped.
    pub fn ok(&mut self, now: Instant) {
        if !self.accept(now) {
            return;
        }
        self.consecutive_fails = 0;
        if !self.online {
            info!(upstream = %self.name, "upstream back online");
        }
        self.online = true;
    }

    /// Record a failed refresh observed at `now`.
    pub fn fail(&mut self, now: Instant) {
        if !self.accept(now) {
            return;
        }
        self.consecutive_fails = self.consecutive_fails.saturating_add(1);
        if self.online && self.consecutive_fails >= self.fail_threshold {
            warn!(
                upstream = %self.name,
                consecutive_fails = self.consecutive_fails,
                "upstream marked offline"
            );
            self.online = false;
        }
    }

    /// Reject a result that arrived out of order relative to one already
    /// applied -- refresh loops run on their own thread and a slow call can
    /// complete after a faster, later one.
    fn accept(&mut self, now: Instant) -> bool {
        match self.last_update {
            Some(last) if now < last => false,
            _ => {
                self.last_update = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_offline_until_first_success() {
        let health = HealthState::new("info", 3);
        assert!(!health.online());
    }

    #[test]
    fn first_success_flips_online() {
        let mut health = HealthState::new("info", 3);
        health.ok(Instant::now());
        assert!(health.online());
    }

    #[test]
    fn stays_online_below_threshold_after_first_success() {
        let mut health = HealthState::new("info", 3);
        let t0 = Instant::now();
        health.ok(t0);
        health.fail(t0 + Duration::from_millis(1));
        health.fail(t0 + Duration::from_millis(2));
        assert!(health.online());
    }

    #[test]
    fn goes_offline_at_threshold() {
        let mut health = HealthState::new("info", 3);
        let t0 = Instant::now();
        health.ok(t0);
        for i in 1..=3 {
            health.fail(t0 + Duration::from_millis(i));
        }
        assert!(!health.online());
        assert_eq!(health.consecutive_fails(), 3);
    }

    #[test]
    fn single_success_restores_online() {
        let mut health = HealthState::new("info", 2);
        let t0 = Instant::now();
        health.ok(t0);
        health.fail(t0 + Duration::from_millis(1));
        health.fail(t0 + Duration::from_millis(2));
        assert!(!health.online());
        health.ok(t0 + Duration::from_millis(3));
        assert!(health.online());
        assert_eq!(health.consecutive_fails(), 0);
    }

    #[test]
    fn out_of_order_result_is_dropped() {
        let mut health = HealthState::new("info", 2);
        let t0 = Instant::now();
        health.ok(t0 + Duration::from_millis(10));
        health.fail(t0 + Duration::from_millis(11));
        health.fail(t0 + Duration::from_millis(12));
        assert!(!health.online());

        // A stale success arriving "from the past" must not resurrect it.
        health.ok(t0);
        assert!(!health.online());
    }
}
