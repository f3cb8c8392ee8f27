//! Fixed-window per-principal rate limiting (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

struct Bucket {
    count: u32,
    window_start: DateTime<Utc>,
}

/// A fixed-window token bucket per principal.
///
/// `allow` atomically checks and increments a per-principal counter that
/// resets every `window`. A background sweeper, started by
/// [`RateLimiter::spawn_sweeper`], evicts buckets idle for more than twice
/// the window so memory does not grow with the set of principals ever
/// seen.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    window: Duration,
    limit: u32,
}

impl RateLimiter {
    /// Creates a rate limiter with window length `window` and per-window
    /// budget `limit`.
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
        }
    }

    /// Only `user_message` envelopes consume tokens; callers must not call
    /// this for any other envelope type (spec §4.4).
    ///
    /// Returns `true` iff the request is within budget for the current
    /// window.
    pub fn allow(&self, principal_id: &str) -> bool {
        let now = Utc::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(principal_id.to_owned()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });
        if now.signed_duration_since(bucket.window_start).num_milliseconds()
            >= self.window.as_millis() as i64
        {
            bucket.count = 0;
            bucket.window_start = now;
        }
        if bucket.count < self.limit {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    /// Milliseconds until `principal_id`'s current window resets. Zero if
    /// the principal has no bucket yet.
    pub fn retry_after_ms(&self, principal_id: &str) -> u64 {
        let now = Utc::now();
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(principal_id) else {
            return 0;
        };
        let elapsed_ms = now.signed_duration_since(bucket.window_start).num_milliseconds();
        let window_ms = self.window.as_millis() as i64;
        (window_ms - elapsed_ms).max(0) as u64
    }

    /// Evicts buckets idle for more than two windows. Exposed for direct
    /// testing; [`RateLimiter::spawn_sweeper`] calls this periodically.
    pub fn sweep(&self) {
        let now = Utc::now();
        let idle_after = self.window * 2;
        self.buckets.lock().retain(|_, bucket| {
            now.signed_duration_since(bucket.window_start).num_milliseconds()
                < idle_after.as_millis() as i64
        });
    }

    /// Spawns a periodic sweeper task parented to `cancellation_token`.
    /// Stopping is idempotent and safe under concurrent cancellation: the
    /// loop simply observes the token and returns.
    pub fn spawn_sweeper(
        &self,
        cancellation_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        let interval = self.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => limiter.sweep(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.allow("u1"));
        assert!(limiter.allow("u1"));
        assert!(!limiter.allow("u1"));
    }

    #[test]
    fn separate_principals_have_separate_buckets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.allow("u1"));
        assert!(limiter.allow("u2"));
    }

    #[test]
    fn retry_after_ms_is_positive_once_limited() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.allow("u1"));
        assert!(!limiter.allow("u1"));
        let retry = limiter.retry_after_ms("u1");
        assert!(retry > 0 && retry <= 60_000);
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        limiter.allow("u1");
        std::thread::sleep(Duration::from_millis(30));
        limiter.sweep();
        assert!(limiter.buckets.lock().is_empty());
    }
}
