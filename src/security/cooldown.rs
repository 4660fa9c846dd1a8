use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// `uses` invocations per `window`, counted per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub uses: usize,
    pub window: Duration,
}

impl CooldownPolicy {
    pub const fn per_actor(uses: usize, window_secs: u64) -> Self {
        Self {
            uses,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug)]
struct Hits {
    window: Duration,
    at: Vec<Instant>,
}

/// Sliding-window tracker keyed by (actor, command). Keys whose window has
/// passed are dropped on the next acquire.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    hits: Mutex<HashMap<(u64, &'static str), Hits>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use if the policy allows it; otherwise return how long until
    /// the oldest use leaves the window.
    pub fn try_acquire(
        &self,
        actor_id: u64,
        command: &'static str,
        policy: CooldownPolicy,
    ) -> Result<(), Duration> {
        self.try_acquire_at(actor_id, command, policy, Instant::now())
    }

    pub fn try_acquire_at(
        &self,
        actor_id: u64,
        command: &'static str,
        policy: CooldownPolicy,
        now: Instant,
    ) -> Result<(), Duration> {
        let mut hits = self.hits.lock();
        hits.retain(|_, h| {
            h.at.retain(|t| now.saturating_duration_since(*t) < h.window);
            !h.at.is_empty()
        });

        let entry = hits.entry((actor_id, command)).or_insert_with(|| Hits {
            window: policy.window,
            at: Vec::new(),
        });
        entry.window = policy.window;

        if entry.at.len() >= policy.uses.max(1) {
            let oldest = entry.at.iter().min().copied().unwrap_or(now);
            let elapsed = now.saturating_duration_since(oldest);
            return Err(policy.window.saturating_sub(elapsed));
        }

        entry.at.push(now);
        Ok(())
    }

    /// Number of (actor, command) pairs still inside their window.
    pub fn tracked(&self) -> usize {
        self.hits.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESTART: CooldownPolicy = CooldownPolicy::per_actor(1, 30);

    #[test]
    fn second_use_within_window_is_rejected() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.try_acquire_at(7, "restart", RESTART, t0).is_ok());

        let retry = tracker
            .try_acquire_at(7, "restart", RESTART, t0 + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(retry, Duration::from_secs(20));
    }

    #[test]
    fn window_expiry_allows_again() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.try_acquire_at(7, "restart", RESTART, t0).is_ok());
        assert!(tracker
            .try_acquire_at(7, "restart", RESTART, t0 + Duration::from_secs(30))
            .is_ok());
    }

    #[test]
    fn cooldowns_are_per_actor_and_per_command() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.try_acquire_at(7, "restart", RESTART, t0).is_ok());
        assert!(tracker.try_acquire_at(8, "restart", RESTART, t0).is_ok());
        assert!(tracker.try_acquire_at(7, "lastrestart", RESTART, t0).is_ok());
    }

    #[test]
    fn expired_keys_are_dropped() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.try_acquire_at(7, "restart", RESTART, t0).is_ok());
        assert!(tracker.try_acquire_at(8, "restart", RESTART, t0).is_ok());
        assert_eq!(tracker.tracked(), 2);

        let later = t0 + Duration::from_secs(31);
        assert!(tracker.try_acquire_at(9, "lastrestart", RESTART, later).is_ok());
        assert_eq!(tracker.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_clock_drives_expiry() {
        let tracker = CooldownTracker::new();
        assert!(tracker.try_acquire(7, "restart", RESTART).is_ok());
        assert!(tracker.try_acquire(7, "restart", RESTART).is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.try_acquire(7, "restart", RESTART).is_ok());
    }

    #[test]
    fn multi_use_policy_counts_uses() {
        let tracker = CooldownTracker::new();
        let policy = CooldownPolicy::per_actor(2, 60);
        let t0 = Instant::now();
        assert!(tracker.try_acquire_at(1, "x", policy, t0).is_ok());
        assert!(tracker.try_acquire_at(1, "x", policy, t0).is_ok());
        assert!(tracker.try_acquire_at(1, "x", policy, t0).is_err());
    }
}
