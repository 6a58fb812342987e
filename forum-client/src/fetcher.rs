use crate::limiter::{ConnectionLimiter, LimiterStatus};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tradewatch_core::{CoreError, ErrorExt, FetchError, HttpSettings};

/// Anything that can turn a URL into page markup.
///
/// `None` means "no data for this unit of work": the caller skips it and
/// moves on. Transient failures never surface as errors here.
pub trait PageSource {
    async fn fetch(&self, url: &str) -> Option<String>;
}

impl<T: PageSource> PageSource for &T {
    async fn fetch(&self, url: &str) -> Option<String> {
        (**self).fetch(url).await
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per URL, including the first
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay_ms` before the next try
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1200,
        }
    }
}

impl RetryConfig {
    pub fn from_settings(http: &HttpSettings) -> Self {
        Self {
            max_attempts: http.max_retries,
            base_delay_ms: http.retry_delay_ms,
        }
    }
}

/// Linear backoff. `attempt` is 1-based.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    Duration::from_millis(config.base_delay_ms.saturating_mul(u64::from(attempt.max(1))))
}

#[derive(Debug, Default)]
struct FetchCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failed_attempts: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchMetrics {
    /// Individual HTTP attempts, retries included
    pub requests: u64,
    pub successes: u64,
    pub failed_attempts: u64,
    /// URLs given up on after the last attempt
    pub exhausted: u64,
}

/// HTTP GET with bounded retries, shared connection cap and per-request timeout.
#[derive(Debug)]
pub struct Fetcher {
    http_client: Client,
    limiter: Arc<ConnectionLimiter>,
    retry: RetryConfig,
    counters: FetchCounters,
}

impl Fetcher {
    pub fn new(user_agent: &str, http: &HttpSettings) -> Result<Self, CoreError> {
        Self::with_config(
            user_agent,
            Duration::from_secs(http.timeout_secs),
            RetryConfig::from_settings(http),
            Arc::new(ConnectionLimiter::new(http.max_connections)),
        )
    }

    pub fn with_config(
        user_agent: &str,
        timeout: Duration,
        retry: RetryConfig,
        limiter: Arc<ConnectionLimiter>,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            limiter,
            retry,
            counters: FetchCounters::default(),
        })
    }

    async fn request_once(&self, url: &str) -> Result<String, CoreError> {
        let _permit = self.limiter.acquire_permit().await?;
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let start_time = Instant::now();
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::RequestTimeout {
                    url: url.to_string(),
                }
            } else if e.is_builder() {
                FetchError::InvalidUrl {
                    url: url.to_string(),
                }
            } else {
                FetchError::ConnectionFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let status_code = status.as_u16();
            let error = if status == StatusCode::TOO_MANY_REQUESTS {
                FetchError::RateLimited {
                    url: url.to_string(),
                }
            } else if status.is_server_error() {
                FetchError::ServerError {
                    url: url.to_string(),
                    status_code,
                }
            } else {
                FetchError::UnexpectedStatus {
                    url: url.to_string(),
                    status_code,
                }
            };
            return Err(error.into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::BodyUnreadable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            "GET {} -> {} bytes in {:?}",
            url,
            body.len(),
            start_time.elapsed()
        );
        Ok(body)
    }

    /// Fetch with retries, returning the last error once attempts run out.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<String, CoreError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error: Option<CoreError> = None;
        let mut attempts_made = 0;

        for attempt in 1..=max_attempts {
            attempts_made = attempt;
            match self.request_once(url).await {
                Ok(body) => {
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        info!("GET {} succeeded on attempt {}", url, attempt);
                    }
                    return Ok(body);
                }
                Err(error) => {
                    self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    debug!("Attempt {} failed for {}: {}", attempt, url, error);

                    if !error.is_retryable() {
                        last_error = Some(error);
                        break;
                    }

                    if attempt < max_attempts {
                        let delay = calculate_delay(attempt, &self.retry);
                        info!("Retrying {} in {:?} due to: {}", url, delay, error);
                        sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        let error = last_error.unwrap_or_else(|| CoreError::Internal {
            message: format!("no attempt made for {url}"),
        });
        warn!(
            "Giving up on {} after {} attempt{}: {}",
            url,
            attempts_made,
            if attempts_made == 1 { "" } else { "s" },
            error
        );
        Err(error)
    }

    pub fn metrics(&self) -> FetchMetrics {
        FetchMetrics {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }

    pub fn limiter_status(&self) -> LimiterStatus {
        self.limiter.status()
    }
}

impl PageSource for Fetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        match self.fetch_with_retry(url).await {
            Ok(body) if body.trim().is_empty() => {
                warn!("Empty body from {}", url);
                None
            }
            Ok(body) => Some(body),
            Err(error) => {
                debug!("No data for {} ({})", url, error.error_code());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{closed_port_url, StubServer};

    fn test_fetcher(max_attempts: u32) -> Fetcher {
        Fetcher::with_config(
            "tradewatch-test/1.0",
            Duration::from_secs(5),
            RetryConfig {
                max_attempts,
                base_delay_ms: 1,
            },
            Arc::new(ConnectionLimiter::new(4)),
        )
        .unwrap()
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1200);
    }

    #[test]
    fn test_linear_backoff_calculation() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1200,
        };
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(1200));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(2400));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(3600));
    }

    #[tokio::test]
    async fn test_retry_waits_linear_delay_between_attempts_only() {
        let server = StubServer::start(vec![("/slow-fail", vec![(500, "")])]).await;
        let fetcher = Fetcher::with_config(
            "tradewatch-test/1.0",
            Duration::from_secs(5),
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 40,
            },
            Arc::new(ConnectionLimiter::new(4)),
        )
        .unwrap();

        let start = Instant::now();
        assert!(fetcher.fetch(&server.url("/slow-fail")).await.is_none());
        let elapsed = start.elapsed();

        assert_eq!(server.hits("/slow-fail"), 3);
        // 40 ms after the first attempt, 80 ms after the second, nothing after the third.
        assert!(elapsed >= Duration::from_millis(120), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(240), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_invalid_url_stops_after_one_attempt() {
        let fetcher = test_fetcher(3);
        let err = fetcher.fetch_with_retry("http://").await.unwrap_err();
        assert!(matches!(err, CoreError::Fetch(FetchError::InvalidUrl { .. })));
        assert_eq!(fetcher.metrics().requests, 1);
        assert_eq!(fetcher.metrics().failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_fetch_success_on_first_attempt() {
        let server = StubServer::start(vec![("/ok", vec![(200, "<html>ok</html>")])]).await;
        let fetcher = test_fetcher(3);

        let body = fetcher.fetch(&server.url("/ok")).await;
        assert_eq!(body.as_deref(), Some("<html>ok</html>"));
        assert_eq!(server.hits("/ok"), 1);

        let metrics = fetcher.metrics();
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.exhausted, 0);
    }

    #[tokio::test]
    async fn test_fetch_succeeds_after_server_errors() {
        let server = StubServer::start(vec![(
            "/flaky",
            vec![(500, ""), (503, ""), (200, "<html>late</html>")],
        )])
        .await;
        let fetcher = test_fetcher(3);

        let body = fetcher.fetch(&server.url("/flaky")).await;
        assert_eq!(body.as_deref(), Some("<html>late</html>"));
        assert_eq!(server.hits("/flaky"), 3);
        assert_eq!(fetcher.metrics().failed_attempts, 2);
    }

    #[tokio::test]
    async fn test_non_200_exhaustion_returns_none() {
        let server = StubServer::start(vec![("/missing", vec![(404, "gone")])]).await;
        let fetcher = test_fetcher(3);

        assert!(fetcher.fetch(&server.url("/missing")).await.is_none());
        assert_eq!(server.hits("/missing"), 3);
        assert_eq!(fetcher.metrics().exhausted, 1);
    }

    #[tokio::test]
    async fn test_exhausted_fetch_reports_last_error() {
        let server = StubServer::start(vec![("/down", vec![(502, "")])]).await;
        let fetcher = test_fetcher(2);

        let error = fetcher
            .fetch_with_retry(&server.url("/down"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            CoreError::Fetch(FetchError::ServerError {
                status_code: 502,
                ..
            })
        ));
        assert_eq!(server.hits("/down"), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_returns_none() {
        let fetcher = test_fetcher(3);
        let url = closed_port_url().await;

        assert!(fetcher.fetch(&url).await.is_none());
        let metrics = fetcher.metrics();
        assert_eq!(metrics.failed_attempts, 3);
        assert_eq!(metrics.exhausted, 1);
    }

    #[tokio::test]
    async fn test_empty_body_treated_as_no_data() {
        let server = StubServer::start(vec![("/blank", vec![(200, "   ")])]).await;
        let fetcher = test_fetcher(3);

        assert!(fetcher.fetch(&server.url("/blank")).await.is_none());
        assert_eq!(server.hits("/blank"), 1);
    }

    #[tokio::test]
    async fn test_permits_released_after_fetch() {
        let server = StubServer::start(vec![("/ok", vec![(200, "x")])]).await;
        let fetcher = test_fetcher(1);

        fetcher.fetch(&server.url("/ok")).await;
        let status = fetcher.limiter_status();
        assert_eq!(status.in_flight(), 0);
        assert_eq!(status.total_granted, 1);
    }
}
