use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

use super::error::ApiError;
use crate::config::RateLimitConfig;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct RouteRateLimiter {
    limiter: KeyedLimiter,
    clock: DefaultClock,
    requests_per_minute: u32,
}

impl RouteRateLimiter {
    pub fn per_minute(requests_per_minute: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(requests_per_minute)),
            clock: DefaultClock::default(),
            requests_per_minute: requests_per_minute.get(),
        }
    }

    /// Returns `ApiError::RateLimited` once the caller has used up this minute's quota.
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            ApiError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

pub struct RateLimits {
    pub ingest: RouteRateLimiter,
    pub chat: RouteRateLimiter,
    pub stream: RouteRateLimiter,
    pub session: RouteRateLimiter,
}

impl RateLimits {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            ingest: RouteRateLimiter::per_minute(config.ingest),
            chat: RouteRateLimiter::per_minute(config.chat),
            stream: RouteRateLimiter::per_minute(config.stream),
            session: RouteRateLimiter::per_minute(config.session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).expect("non-zero")
    }

    #[test]
    fn quota_is_enforced_per_key() {
        let limiter = RouteRateLimiter::per_minute(limit(2));

        assert!(limiter.check("alpha").is_ok());
        assert!(limiter.check("alpha").is_ok());
        assert!(matches!(
            limiter.check("alpha"),
            Err(ApiError::RateLimited { retry_after_secs }) if retry_after_secs >= 1
        ));
        assert!(limiter.check("beta").is_ok());
    }

    #[test]
    fn routes_have_independent_quotas() {
        let limits = RateLimits::new(RateLimitConfig {
            ingest: limit(1),
            ..RateLimitConfig::default()
        });

        assert!(limits.ingest.check("key").is_ok());
        assert!(limits.ingest.check("key").is_err());
        assert!(limits.chat.check("key").is_ok());
        assert_eq!(limits.chat.requests_per_minute(), 30);
    }
}
