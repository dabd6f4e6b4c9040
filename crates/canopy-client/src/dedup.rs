//! Suppresses repeated logout notifications for the same user.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Proceed,
    Duplicate { since: Duration, completed: bool },
}

#[derive(Debug)]
struct Entry {
    started_at: Instant,
    completed: bool,
}

/// Check-and-set map keyed by `(client_id, user_id)`.
///
/// An entry suppresses repeats for `window` after the run it belongs to
/// started, whether or not that run has finished. Expired entries are
/// dropped lazily.
#[derive(Debug)]
pub struct LogoutDedup {
    window: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl LogoutDedup {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, String), Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim the key for a new run, or report that one happened recently.
    pub fn try_begin(&self, client_id: &str, user_id: &str) -> DedupDecision {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, e| now.duration_since(e.started_at) < self.window);

        let key = (client_id.to_string(), user_id.to_string());
        if let Some(entry) = entries.get(&key) {
            return DedupDecision::Duplicate {
                since: now.duration_since(entry.started_at),
                completed: entry.completed,
            };
        }
        entries.insert(
            key,
            Entry {
                started_at: now,
                completed: false,
            },
        );
        DedupDecision::Proceed
    }

    /// Mark the run finished. The entry stays until its window lapses.
    pub fn complete(&self, client_id: &str, user_id: &str) {
        let now = Instant::now();
        let mut entries = self.entries();
        let key = (client_id.to_string(), user_id.to_string());
        let expired = match entries.get_mut(&key) {
            Some(entry) => {
                entry.completed = true;
                now.duration_since(entry.started_at) >= self.window
            }
            None => false,
        };
        if expired {
            entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_repeat_within_window_is_duplicate() {
        let dedup = LogoutDedup::new(Duration::from_secs(10));
        assert_eq!(dedup.try_begin("c1", "u1"), DedupDecision::Proceed);
        dedup.complete("c1", "u1");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            dedup.try_begin("c1", "u1"),
            DedupDecision::Duplicate { completed: true, .. }
        ));
        assert_eq!(dedup.try_begin("c2", "u1"), DedupDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_rearms_after_window() {
        let dedup = LogoutDedup::new(Duration::from_secs(10));
        assert_eq!(dedup.try_begin("c1", "u1"), DedupDecision::Proceed);

        tokio::time::advance(Duration::from_secs(11)).await;
        dedup.complete("c1", "u1");
        assert!(dedup.is_empty());
        assert_eq!(dedup.try_begin("c1", "u1"), DedupDecision::Proceed);
        assert_eq!(dedup.len(), 1);
    }
}
