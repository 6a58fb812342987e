use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tradewatch_core::CoreError;

/// Caps how many requests are in flight against the forum at once.
///
/// Crawling itself stays sequential; the cap only matters when several
/// fetchers share one client.
#[derive(Debug)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    granted: AtomicU64,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            granted: AtomicU64::new(0),
        }
    }

    pub async fn acquire_permit(&self) -> Result<ConnectionPermit, CoreError> {
        let start_time = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal {
                message: "connection limiter closed".to_string(),
            })?;

        self.granted.fetch_add(1, Ordering::Relaxed);
        let queue_wait_time = start_time.elapsed();
        if queue_wait_time > Duration::from_millis(500) {
            tracing::debug!("Waited {:?} for a connection slot", queue_wait_time);
        }

        Ok(ConnectionPermit { _permit: permit })
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            available_permits: self.semaphore.available_permits(),
            max_permits: self.max_connections,
            total_granted: self.granted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStatus {
    pub available_permits: usize,
    pub max_permits: usize,
    pub total_granted: u64,
}

impl LimiterStatus {
    pub fn in_flight(&self) -> usize {
        self.max_permits - self.available_permits
    }
}
