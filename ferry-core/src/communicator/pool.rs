//! Connection freshness bookkeeping
//!
//! Backends record when a host last accepted a command. While that is recent
//! enough, `connect` skips its liveness probe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a successful use keeps a host fresh
pub const DEFAULT_KEEP_TIME: Duration = Duration::from_secs(15 * 60);

/// Last-used timestamps per host
#[derive(Debug)]
pub struct ConnectionPool {
    keep_time: Duration,
    last_used: Mutex<HashMap<String, Instant>>,
}

impl ConnectionPool {
    /// Create a pool keeping hosts fresh for `keep_time`
    pub fn new(keep_time: Duration) -> Self {
        Self {
            keep_time,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `host` was just used
    pub fn touch(&self, host: &str) {
        let mut map = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(host.to_string(), Instant::now());
    }

    /// When `host` was last used, if ever
    pub fn last_used(&self, host: &str) -> Option<Instant> {
        let map = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        map.get(host).copied()
    }

    /// Whether `host` was used within the keep time
    pub fn is_fresh(&self, host: &str) -> bool {
        self.last_used(host)
            .is_some_and(|at| at.elapsed() < self.keep_time)
    }

    /// Forget `host`
    pub fn forget(&self, host: &str) {
        let mut map = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(host);
    }

    /// Configured keep time
    pub fn keep_time(&self) -> Duration {
        self.keep_time
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_after_touch() {
        let pool = ConnectionPool::default();
        assert!(!pool.is_fresh("minion-1"));
        pool.touch("minion-1");
        assert!(pool.is_fresh("minion-1"));
        assert!(!pool.is_fresh("minion-2"));

        pool.forget("minion-1");
        assert!(pool.last_used("minion-1").is_none());
    }

    #[test]
    fn test_zero_keep_time_never_fresh() {
        let pool = ConnectionPool::new(Duration::ZERO);
        pool.touch("minion-1");
        assert!(pool.last_used("minion-1").is_some());
        assert!(!pool.is_fresh("minion-1"));
    }
}
