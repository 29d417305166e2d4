//! Per-client-IP rate limiting built atop `governor`.
//!
//! This is an in-process guard applied ahead of authentication, distinct
//! from the distributed quota: it protects the gateway itself from a noisy
//! client, while the quota enforces the per-subject contract across the
//! fleet.
use std::{net::IpAddr, num::NonZeroU32};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
};

use crate::config::models::RateLimitConfig;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Keyed limiter tracking one token bucket per client IP.
pub struct VisitorRateLimiter {
    limiter: KeyedLimiter,
}

impl VisitorRateLimiter {
    /// Build a limiter from the global rate-limiting configuration.
    pub fn new(config: &RateLimitConfig) -> Result<Self, String> {
        let rate = NonZeroU32::new(config.rate_per_second)
            .ok_or_else(|| "rate limit 'ratePerSecond' must be greater than 0".to_string())?;
        let burst = NonZeroU32::new(config.burst)
            .ok_or_else(|| "rate limit 'burst' must be greater than 0".to_string())?;

        let quota = Quota::per_second(rate).allow_burst(burst);
        Ok(Self {
            limiter: RateLimiter::keyed(quota),
        })
    }

    /// Whether a request from `ip` is allowed right now.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Evict idle per-IP state. Called periodically by the janitor task so
    /// one-off visitors do not accumulate forever.
    pub fn shrink(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}
