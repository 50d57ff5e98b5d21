// src/utils/rate_limiter.rs
// Rate limiting utilities

use anyhow::Result;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovRateLimiter};

/// Per-client rate limiter keyed by IP address.
///
/// Guards the LLM-invoking endpoints so a single client can't burn the
/// provider budget. All request handlers share one limiter instance.
pub struct KeyedRateLimiter {
    limiter: Arc<GovRateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>>,
}

impl KeyedRateLimiter {
    /// Create a new rate limiter with requests per minute per client
    pub fn new(requests_per_minute: u32) -> Result<Self> {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute)
                .ok_or_else(|| anyhow::anyhow!("Invalid rate limit"))?,
        );

        Ok(Self {
            limiter: Arc::new(GovRateLimiter::keyed(quota)),
        })
    }

    /// Check whether the given client may make a request right now
    pub fn check(&self, client: IpAddr) -> bool {
        self.limiter.check_key(&client).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_per_client() {
        let limiter = KeyedRateLimiter::new(2).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a));
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        // Different client has its own bucket
        assert!(limiter.check(b));
    }
}
