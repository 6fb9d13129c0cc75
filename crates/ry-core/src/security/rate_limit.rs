//! Token-bucket rate limiting per operation category.

use ry_common::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

/// Operation categories with independent buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    /// Process lifecycle operations (start/stop/restart).
    Process,
    /// Database query execution.
    Query,
    /// PTY writes and resizes.
    Pty,
}

impl fmt::Display for RateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateCategory::Process => "process",
            RateCategory::Query => "query",
            RateCategory::Pty => "pty",
        };
        write!(f, "{}", s)
    }
}

/// Refill rate and burst size for one bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: f64,
}

impl RateLimiterConfig {
    fn default_for(category: RateCategory) -> Self {
        match category {
            RateCategory::Process => Self { rate: 5.0, burst: 10.0 },
            RateCategory::Query => Self { rate: 20.0, burst: 40.0 },
            RateCategory::Pty => Self { rate: 100.0, burst: 200.0 },
        }
    }
}

struct Bucket {
    config: RateLimiterConfig,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            tokens: config.burst,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.rate).min(self.config.burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket limiter shared by the supervisor and database gateway.
pub struct RateLimiter {
    buckets: Mutex<HashMap<RateCategory, Bucket>>,
}

impl RateLimiter {
    /// Limiter with per-category defaults.
    pub fn new() -> Self {
        Self::with_configs([
            (RateCategory::Process, RateLimiterConfig::default_for(RateCategory::Process)),
            (RateCategory::Query, RateLimiterConfig::default_for(RateCategory::Query)),
            (RateCategory::Pty, RateLimiterConfig::default_for(RateCategory::Pty)),
        ])
    }

    pub fn with_configs<I>(configs: I) -> Self
    where
        I: IntoIterator<Item = (RateCategory, RateLimiterConfig)>,
    {
        let buckets = configs
            .into_iter()
            .map(|(cat, cfg)| (cat, Bucket::new(cfg)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Take one token from the category's bucket.
    pub fn allow(&self, category: RateCategory) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        match buckets.get_mut(&category) {
            Some(bucket) => bucket.try_take(Instant::now()),
            // Unconfigured categories are unlimited.
            None => true,
        }
    }

    /// `allow` that surfaces the standard error for denials.
    pub fn check(&self, category: RateCategory) -> Result<()> {
        if self.allow(category) {
            Ok(())
        } else {
            Err(Error::RateLimited {
                category: category.to_string(),
            })
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_denial() {
        let limiter = RateLimiter::with_configs([(
            RateCategory::Process,
            RateLimiterConfig { rate: 0.001, burst: 3.0 },
        )]);
        assert!(limiter.allow(RateCategory::Process));
        assert!(limiter.allow(RateCategory::Process));
        assert!(limiter.allow(RateCategory::Process));
        assert!(!limiter.allow(RateCategory::Process));
    }

    #[test]
    fn test_denial_surfaces_rate_limited() {
        let limiter = RateLimiter::with_configs([(
            RateCategory::Query,
            RateLimiterConfig { rate: 0.001, burst: 1.0 },
        )]);
        assert!(limiter.check(RateCategory::Query).is_ok());
        assert!(matches!(
            limiter.check(RateCategory::Query),
            Err(Error::RateLimited { .. })
        ));
    }

    #[test]
    fn test_unconfigured_category_unlimited() {
        let limiter = RateLimiter::with_configs([(
            RateCategory::Query,
            RateLimiterConfig { rate: 1.0, burst: 1.0 },
        )]);
        for _ in 0..100 {
            assert!(limiter.allow(RateCategory::Pty));
        }
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = RateLimiter::with_configs([(
            RateCategory::Pty,
            RateLimiterConfig { rate: 1000.0, burst: 1.0 },
        )]);
        assert!(limiter.allow(RateCategory::Pty));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.allow(RateCategory::Pty));
    }
}
