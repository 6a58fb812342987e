pub mod crawler;
pub mod fetcher;
pub mod limiter;
pub mod listing;
pub mod thread;


pub use crawler::{page_url, CrawlOptions, CrawlOutcome, CrawlStats, Crawler};
pub use fetcher::{calculate_delay, FetchMetrics, Fetcher, PageSource, RetryConfig};
pub use limiter::{ConnectionLimiter, ConnectionPermit, LimiterStatus};
pub use listing::{parse_abbreviated_count, parse_timestamp, ListingItem, ListingParser};
pub use thread::{ThreadBody, ThreadParser};
