//! Rate limiting on top of the TTL cache.
//!
//! A limit is a cache entry in the `rate-limit` partition whose value is the
//! expiry instant. Durable limits (sync cooldowns) are recomputed from the
//! store; this only short-circuits repeated requests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::TtlCache;
use crate::utils::clock::Clock;

/// Partition holding limiter entries; keys read `rate-limit:<operation>`.
pub const RATE_LIMIT_PARTITION: &str = "rate-limit";

/// Per-operation rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<TtlCache>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(cache: Arc<TtlCache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.cache.get(key, Some(RATE_LIMIT_PARTITION))
    }

    /// True while `now < expiry`.
    pub fn is_rate_limited(&self, key: &str) -> bool {
        self.expiry(key)
            .map(|expiry| self.clock.now() < expiry)
            .unwrap_or(false)
    }

    /// Limit `key` for `duration_secs` from now.
    pub fn set_rate_limit(&self, key: &str, duration_secs: u64) {
        let ttl = Duration::seconds(duration_secs as i64);
        let expiry = self.clock.now() + ttl;
        self.cache.set_for(key, &expiry, ttl, Some(RATE_LIMIT_PARTITION));
        log::debug!("Rate limit set: {} for {}s", key, duration_secs);
    }

    /// Whole seconds until the limit lifts, rounded up; 0 when not limited.
    pub fn time_remaining(&self, key: &str) -> u64 {
        let Some(expiry) = self.expiry(key) else {
            return 0;
        };
        let remaining_ms = (expiry - self.clock.now()).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            ((remaining_ms + 999) / 1000) as u64
        }
    }

    /// Adopt a server-reported retry-after, replacing any local limit.
    pub fn sync_server_rate_limit(&self, key: &str, retry_after_secs: u64) {
        self.set_rate_limit(key, retry_after_secs);
    }

    pub fn clear(&self, key: &str) {
        self.cache.remove(key, Some(RATE_LIMIT_PARTITION));
    }
}
