//! Recently seen pull-transport identities.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Tracks pull clients by the last time they polled or published.
pub struct PresenceTracker {
    last_seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl PresenceTracker {
    /// Create a tracker that forgets identities after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mark an identity as seen now. Expired entries are pruned.
    pub fn touch(&self, identity: &str) {
        if identity.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        last_seen.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        last_seen.insert(identity.to_owned(), now);
    }

    /// Identities seen within the ttl. Expired entries are pruned.
    #[must_use]
    pub fn recent(&self) -> HashSet<String> {
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        last_seen.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        last_seen.keys().cloned().collect()
    }

    /// Number of entries held, expired or not.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_and_expire() {
        let tracker = PresenceTracker::new(Duration::from_secs(60));
        tracker.touch("user_a");
        tracker.touch("user_a");
        tracker.touch("");
        assert_eq!(tracker.recent().len(), 1);

        let expired = PresenceTracker::new(Duration::ZERO);
        expired.touch("user_b");
        assert!(expired.recent().is_empty());
    }

    #[test]
    fn test_touch_prunes_expired_identities() {
        let tracker = PresenceTracker::new(Duration::from_millis(50));
        for i in 0..100 {
            tracker.touch(&format!("user_{i}"));
        }
        assert_eq!(tracker.tracked(), 100);

        std::thread::sleep(Duration::from_millis(80));
        tracker.touch("user_new");
        assert_eq!(tracker.tracked(), 1);
    }
}
