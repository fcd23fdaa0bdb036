use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Gcra};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{BucketConfig, ConfigError, LimitsConfig};
use crate::model::Network;

/// Builds the GCRA quota equivalent to a token bucket holding `capacity`
/// tokens refilled at `refill_per_second`.
pub fn quota(capacity: u32, refill_per_second: f64) -> Option<Quota> {
    let burst = NonZeroU32::new(capacity)?;
    let period = refill_period(refill_per_second)?;
    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}

/// Time to refill one token, when it is representable and non-zero.
pub fn refill_period(refill_per_second: f64) -> Option<Duration> {
    if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / refill_per_second)
        .ok()
        .filter(|period| !period.is_zero())
}

/// Token bucket for one destination network.
///
/// `admit` suspends the caller until a token is available and never refuses:
/// backpressure instead of loss. Token consumption is atomic, so concurrent
/// callers are never admitted on the same token.
pub struct RateLimiter {
    network: Network,
    bucket: DefaultDirectRateLimiter,
    max_wait: Duration,
    overflows: AtomicU64,
}

impl RateLimiter {
    pub fn new(network: Network, bucket: &BucketConfig, max_wait: Duration) -> Result<Self, ConfigError> {
        let quota = quota(bucket.capacity, bucket.refill_per_second).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "limits.{network}: capacity must be positive and refill_per_second a usable rate"
            ))
        })?;

        Ok(Self {
            network,
            bucket: Gcra::direct(quota),
            max_wait,
            overflows: AtomicU64::new(0),
        })
    }

    pub async fn admit(&self) {
        if self.bucket.check().is_ok() {
            return;
        }

        let started = Instant::now();
        if tokio::time::timeout(self.max_wait, self.bucket.until_ready())
            .await
            .is_err()
        {
            let overflows = self.overflows.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                network = %self.network,
                max_wait_ms = self.max_wait.as_millis() as u64,
                overflows,
                "rate limit overflow, send still pending"
            );
            self.bucket.until_ready().await;
        }

        debug!(
            network = %self.network,
            waited_ms = started.elapsed().as_millis() as u64,
            "rate limiter admitted send"
        );
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct RateLimits {
    irc: Arc<RateLimiter>,
    discord: Arc<RateLimiter>,
}

impl RateLimits {
    pub fn from_config(limits: &LimitsConfig) -> Result<Self, ConfigError> {
        let max_wait = Duration::from_millis(limits.max_admission_wait_ms);
        Ok(Self {
            irc: Arc::new(RateLimiter::new(Network::Irc, &limits.irc, max_wait)?),
            discord: Arc::new(RateLimiter::new(
                Network::Discord,
                &limits.discord,
                max_wait,
            )?),
        })
    }

    pub fn for_network(&self, destination: Network) -> Arc<RateLimiter> {
        match destination {
            Network::Irc => self.irc.clone(),
            Network::Discord => self.discord.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{Gcra, RateLimiter, quota};
    use crate::config::{BucketConfig, ConfigError};
    use crate::model::Network;

    fn bucket(capacity: u32, refill_per_second: f64) -> BucketConfig {
        BucketConfig {
            capacity,
            refill_per_second,
        }
    }

    #[test]
    fn quota_rejects_degenerate_buckets() {
        assert!(quota(0, 1.0).is_none());
        assert!(quota(3, 0.0).is_none());
        assert!(quota(3, f64::NAN).is_none());
        assert!(quota(3, 1e-20).is_none());
        assert!(quota(3, 1e20).is_none());
        assert!(quota(3, 1.0).is_some());
    }

    #[test]
    fn no_more_than_capacity_within_window() {
        // Capacity 3 at 1 token/s: the window C/R is 3s, far longer than this test.
        let limiter = Gcra::direct(quota(3, 1.0).unwrap());

        let admitted = (0..10).filter(|_| limiter.check().is_ok()).count();

        assert_eq!(admitted, 3);
    }

    #[test]
    fn unrepresentable_refill_rate_is_a_config_error() {
        let result = RateLimiter::new(Network::Irc, &bucket(3, 1e-20), Duration::from_secs(1));

        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn admit_waits_for_refill_instead_of_dropping() {
        let limiter = RateLimiter::new(Network::Irc, &bucket(2, 20.0), Duration::from_secs(5))
            .expect("valid bucket");
        let started = Instant::now();

        for _ in 0..4 {
            limiter.admit().await;
        }

        // Two sends beyond the burst need two refills of 50ms each.
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(limiter.overflows(), 0);
    }

    #[tokio::test]
    async fn long_wait_is_counted_as_overflow_and_still_admitted() {
        let limiter = RateLimiter::new(Network::Discord, &bucket(1, 10.0), Duration::from_millis(5))
            .expect("valid bucket");

        limiter.admit().await;
        limiter.admit().await;

        assert_eq!(limiter.overflows(), 1);
    }

    #[tokio::test]
    async fn concurrent_admissions_are_spaced_by_refill() {
        let limiter = Arc::new(
            RateLimiter::new(Network::Irc, &bucket(1, 20.0), Duration::from_secs(5))
                .expect("valid bucket"),
        );
        let started = Instant::now();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit().await })
            })
            .collect();
        for task in tasks {
            task.await.expect("admit task");
        }

        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
