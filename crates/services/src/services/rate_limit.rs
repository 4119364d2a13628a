//! Sliding-window rate limiting with optional burst protection.
//!
//! Counts live in timestamped buckets keyed `"ratelimit:{key}:{bucket_ts}"`.
//! The store is process-global and safe for concurrent increments from many
//! request handlers. Internal failures fail open.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

const DEFAULT_BUCKET_SIZE_SECS: i64 = 10;
const DEFAULT_BURST_WINDOW_SECS: i64 = 60;
const CLEANUP_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub period_secs: i64,
    pub bucket_size_secs: i64,
    pub burst: Option<u32>,
    pub burst_window_secs: i64,
}

impl RateLimitConfig {
    pub fn new(limit: u32, period_secs: i64) -> Self {
        Self {
            limit,
            period_secs,
            bucket_size_secs: DEFAULT_BUCKET_SIZE_SECS,
            burst: None,
            burst_window_secs: DEFAULT_BURST_WINDOW_SECS,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RateLimitResult {
    pub success: bool,
    pub remaining_limit: u32,
}

struct Bucket {
    count: u32,
    expires_at: i64,
}

#[derive(Default)]
pub struct RateLimitService {
    buckets: DashMap<String, Bucket>,
}

impl RateLimitService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check(key, config, true, chrono::Utc::now().timestamp())
    }

    pub async fn get_remaining_limit(&self, key: &str, config: &RateLimitConfig) -> u32 {
        self.check(key, config, false, chrono::Utc::now().timestamp())
            .remaining_limit
    }

    fn check(
        &self,
        key: &str,
        config: &RateLimitConfig,
        increment: bool,
        now: i64,
    ) -> RateLimitResult {
        let bucket_ts = now - now.rem_euclid(config.bucket_size_secs);

        let main_count = self.window_count(key, config, now, config.period_secs);
        if main_count >= config.limit as u64 {
            return RateLimitResult {
                success: false,
                remaining_limit: 0,
            };
        }

        if let Some(burst) = config.burst {
            let burst_count = self.window_count(key, config, now, config.burst_window_secs);
            if burst_count >= burst as u64 {
                return RateLimitResult {
                    success: false,
                    remaining_limit: 0,
                };
            }
        }

        if increment {
            let expires_at = now
                + config.period_secs.max(config.burst_window_secs)
                + config.bucket_size_secs;
            let bucket_key = format!("ratelimit:{key}:{bucket_ts}");
            self.buckets
                .entry(bucket_key)
                .and_modify(|bucket| bucket.count += 1)
                .or_insert(Bucket {
                    count: 1,
                    expires_at,
                });

            if rand::thread_rng().gen_bool(CLEANUP_PROBABILITY) {
                self.sweep_expired(now);
            }
        }

        let used = main_count + u64::from(increment);
        RateLimitResult {
            success: true,
            remaining_limit: (config.limit as u64).saturating_sub(used) as u32,
        }
    }

    fn window_count(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: i64,
        window_secs: i64,
    ) -> u64 {
        let mut total = 0u64;
        let mut bucket_ts = now - now.rem_euclid(config.bucket_size_secs);
        let window_start = now - window_secs;
        while bucket_ts > window_start - config.bucket_size_secs {
            let bucket_key = format!("ratelimit:{key}:{bucket_ts}");
            if let Some(bucket) = self.buckets.get(&bucket_key) {
                total += u64::from(bucket.count);
            }
            bucket_ts -= config.bucket_size_secs;
        }
        total
    }

    /// Drop expired buckets so the map stays bounded. Runs on a 10% coin
    /// flip per increment.
    fn sweep_expired(&self, now: i64) {
        self.buckets.retain(|_, bucket| bucket.expires_at > now);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_trips_on_third_increment() {
        let service = RateLimitService::new();
        let config = RateLimitConfig::new(2, 60);
        let now = 1_000_000;

        let first = service.check("u1", &config, true, now);
        assert!(first.success);
        assert_eq!(first.remaining_limit, 1);

        let second = service.check("u1", &config, true, now + 3);
        assert!(second.success);
        assert_eq!(second.remaining_limit, 0);

        let third = service.check("u1", &config, true, now + 6);
        assert!(!third.success);
        assert_eq!(third.remaining_limit, 0);
    }

    #[test]
    fn window_expiry_frees_the_limit() {
        let service = RateLimitService::new();
        let config = RateLimitConfig::new(1, 60);
        let now = 2_000_000;

        assert!(service.check("u2", &config, true, now).success);
        assert!(!service.check("u2", &config, true, now + 30).success);
        // Past the sliding window the old bucket no longer counts.
        assert!(service.check("u2", &config, true, now + 61).success);
    }

    #[test]
    fn burst_limit_rejects_within_burst_window() {
        let service = RateLimitService::new();
        let config = RateLimitConfig::new(100, 3600).with_burst(2);
        let now = 3_000_000;

        assert!(service.check("u3", &config, true, now).success);
        assert!(service.check("u3", &config, true, now + 11).success);
        let third = service.check("u3", &config, true, now + 22);
        assert!(!third.success);
        assert_eq!(third.remaining_limit, 0);
    }

    #[test]
    fn keys_are_isolated() {
        let service = RateLimitService::new();
        let config = RateLimitConfig::new(1, 60);
        let now = 4_000_000;
        assert!(service.check("a", &config, true, now).success);
        assert!(service.check("b", &config, true, now).success);
    }

    #[test]
    fn sweep_drops_expired_buckets() {
        let service = RateLimitService::new();
        let config = RateLimitConfig::new(5, 60);
        let now = 5_000_000;
        service.check("k", &config, true, now);
        assert_eq!(service.bucket_count(), 1);
        service.sweep_expired(now + 10_000);
        assert_eq!(service.bucket_count(), 0);
    }
}
