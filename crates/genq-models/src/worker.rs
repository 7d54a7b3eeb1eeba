//! Worker liveness.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A worker counts as active while its last heartbeat is younger than this.
pub const ACTIVE_WORKER_WINDOW_SECS: i64 = 60;

/// Last heartbeat recorded for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub last_seen: DateTime<Utc>,
}

impl WorkerHeartbeat {
    pub fn new(worker_id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            last_seen,
        }
    }

    /// Age of the heartbeat relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_seen
    }

    /// Check whether the heartbeat is strictly younger than `window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) < window
    }

    /// Check whether the worker counts as active.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_fresh(now, Duration::seconds(ACTIVE_WORKER_WINDOW_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_window() {
        let now = Utc::now();

        let stale = WorkerHeartbeat::new("w1", now - Duration::seconds(61));
        let fresh = WorkerHeartbeat::new("w2", now - Duration::seconds(10));

        assert!(!stale.is_active(now));
        assert!(fresh.is_active(now));
    }
}
