//! Request throttling for DNS, WHOIS and HTTP services
//!
//! Token bucket limiters shared across concurrent candidate evaluations, plus a
//! retry helper with exponential backoff for the HTTP clients.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{AnalysisConfig, HttpConfig};

/// A token bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    /// Bucket capacity, one second worth of requests
    max_tokens: f64,
    refill_rate: f64,
    last_update: Instant,
    /// False when the configured rate is 0
    enabled: bool,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let enabled = requests_per_second > 0;
        let max_tokens = if enabled {
            requests_per_second as f64
        } else {
            f64::INFINITY
        };

        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: requests_per_second as f64,
            last_update: Instant::now(),
            enabled,
        }
    }

    fn refill(&mut self) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;
    }

    /// Take a token if one is available, otherwise report how long until the next one
    pub fn try_acquire(&mut self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }

        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let wait_secs = (1.0 - self.tokens) / self.refill_rate;
            Some(Duration::from_secs_f64(wait_secs))
        }
    }

    pub async fn acquire(&mut self) {
        while let Some(wait) = self.try_acquire() {
            debug!("Rate limiter waiting {:?} for token", wait);
            sleep(wait).await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Thread-safe rate limiter handle
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    inner: Arc<Mutex<RateLimiter>>,
}

impl SharedRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiter::new(requests_per_second))),
        }
    }

    /// Acquire a token, waiting if necessary
    pub async fn acquire(&self) {
        let mut limiter = self.inner.lock().await;
        limiter.acquire().await;
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.is_enabled()
    }
}

/// One limiter per external service for an analysis session
#[derive(Debug, Clone)]
pub struct ServiceLimiters {
    pub dns: SharedRateLimiter,
    pub whois: SharedRateLimiter,
    pub http: SharedRateLimiter,
}

impl ServiceLimiters {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let describe = |rate: u32| {
            if rate > 0 {
                format!("{}/s", rate)
            } else {
                "unlimited".to_string()
            }
        };
        debug!(
            "Rate limiting: DNS={}, WHOIS={}, HTTP={}",
            describe(config.dns_queries_per_second),
            describe(config.whois_queries_per_second),
            describe(config.http_requests_per_second)
        );

        Self {
            dns: SharedRateLimiter::new(config.dns_queries_per_second),
            whois: SharedRateLimiter::new(config.whois_queries_per_second),
            http: SharedRateLimiter::new(config.http_requests_per_second),
        }
    }
}

/// Retry helper with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryHelper {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryHelper {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_http_config(config: &HttpConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_delay_ms),
            Duration::from_millis(config.backoff_max_delay_ms),
        )
    }

    /// Delay before retry `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or retries run out
    pub async fn with_retry<T, E, F, Fut, R>(&self, mut operation: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    if attempt > self.max_retries {
                        warn!("All {} retry attempts exhausted, giving up: {}", self.max_retries, e);
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    debug!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rate_limiter_disabled() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.is_enabled());
        for _ in 0..1000 {
            assert!(limiter.try_acquire().is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_bucket_empties() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire().is_none());
        assert!(limiter.try_acquire().is_none());
        let wait = limiter.try_acquire().expect("bucket should be empty");
        assert!(wait <= Duration::from_millis(500));
    }

    #[test]
    fn test_delay_for_is_capped() {
        let helper = RetryHelper::new(10, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(helper.delay_for(0), Duration::ZERO);
        assert_eq!(helper.delay_for(1), Duration::from_millis(100));
        assert_eq!(helper.delay_for(2), Duration::from_millis(200));
        assert_eq!(helper.delay_for(3), Duration::from_millis(350));
        assert_eq!(helper.delay_for(10), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let helper = RetryHelper::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = helper
            .with_retry(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {}", n))
                    } else {
                        Ok(n)
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let helper = RetryHelper::new(5, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = helper
            .with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("not found".to_string())
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let helper = RetryHelper::new(2, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = helper
            .with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("503".to_string())
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shared_rate_limiter() {
        assert!(SharedRateLimiter::new(100).is_enabled().await);
        assert!(!SharedRateLimiter::new(0).is_enabled().await);
        let limiters = ServiceLimiters::from_config(&AnalysisConfig {
            concurrency: 1,
            dns_queries_per_second: 0,
            whois_queries_per_second: 5,
            http_requests_per_second: 0,
        });
        assert!(!limiters.dns.is_enabled().await);
        assert!(limiters.whois.is_enabled().await);
        limiters.dns.acquire().await;
        limiters.http.acquire().await;
    }
}
