use crate::fetcher::PageSource;
use crate::listing::{ListingItem, ListingParser};
use crate::thread::ThreadParser;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tradewatch_core::{
    AppSettings, CategoryConfig, ConfigError, CoreError, HttpSettings, RawPost, SelectorConfig,
    SourceConfig,
};
use url::Url;

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub platform: String,
    pub base_url: Url,
    pub categories: Vec<CategoryConfig>,
    pub max_posts_per_run: usize,
    pub from_days_ago: i64,
    /// Pause after each thread-body fetch
    pub request_delay: Duration,
}

impl CrawlOptions {
    pub fn from_source(
        platform: &str,
        source: &SourceConfig,
        app: &AppSettings,
        http: &HttpSettings,
    ) -> Result<Self, CoreError> {
        let base_url = Url::parse(&source.base_url).map_err(|_| ConfigError::InvalidValue {
            field: format!("sources.{platform}.base_url"),
            value: source.base_url.clone(),
        })?;

        Ok(Self {
            platform: platform.to_string(),
            base_url,
            categories: source.categories.clone(),
            max_posts_per_run: source.max_posts_per_run,
            from_days_ago: app.run_interval_days,
            request_delay: Duration::from_millis(http.request_delay_ms),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub categories_visited: usize,
    pub categories_unreachable: usize,
    pub pages_fetched: usize,
    pub page_failures: usize,
    pub items_seen: usize,
    pub duplicate_items: usize,
    pub threads_fetched: usize,
    pub thread_failures: usize,
    pub stopped_by_cutoff: usize,
    pub stopped_by_cap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub posts: Vec<RawPost>,
    pub stats: CrawlStats,
}

enum Flow {
    NextCategory,
    Finished,
}

/// Walks every configured category newest-first, page by page, until the
/// time window, the per-run cap, or the last page ends it.
pub struct Crawler<S> {
    source: S,
    listing: ListingParser,
    thread: ThreadParser,
    options: CrawlOptions,
}

impl<S: PageSource> Crawler<S> {
    pub fn new(
        source: S,
        options: CrawlOptions,
        selectors: &SelectorConfig,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            listing: ListingParser::new(options.base_url.clone(), selectors)?,
            thread: ThreadParser::new(selectors)?,
            source,
            options,
        })
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn crawl(&self) -> CrawlOutcome {
        self.crawl_at(Utc::now()).await
    }

    /// Crawl as if the current time were `now`.
    pub async fn crawl_at(&self, now: DateTime<Utc>) -> CrawlOutcome {
        let cutoff = cutoff_for(now, self.options.from_days_ago);
        let mut outcome = CrawlOutcome::default();
        let mut seen = HashSet::new();

        info!(
            "Crawling {} ({} categories, cutoff {}, cap {})",
            self.options.platform,
            self.options.categories.len(),
            cutoff,
            self.options.max_posts_per_run
        );

        for category in &self.options.categories {
            if outcome.posts.len() >= self.options.max_posts_per_run {
                outcome.stats.stopped_by_cap = true;
                break;
            }

            let flow = self
                .crawl_category(category, cutoff, now, &mut seen, &mut outcome)
                .await;
            if let Flow::Finished = flow {
                break;
            }
        }

        info!(
            "Crawled {} posts from {} ({} pages, {} thread bodies missing)",
            outcome.posts.len(),
            self.options.platform,
            outcome.stats.pages_fetched,
            outcome.stats.thread_failures
        );
        outcome
    }

    async fn crawl_category(
        &self,
        category: &CategoryConfig,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        seen: &mut HashSet<String>,
        outcome: &mut CrawlOutcome,
    ) -> Flow {
        let category_url = match self.options.base_url.join(&category.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping category {}: bad URL {}: {}", category.name, category.url, e);
                outcome.stats.categories_unreachable += 1;
                return Flow::NextCategory;
            }
        };

        let Some(first_page) = self.source.fetch(category_url.as_str()).await else {
            warn!("Category {} unreachable, skipping", category.name);
            outcome.stats.categories_unreachable += 1;
            return Flow::NextCategory;
        };
        outcome.stats.categories_visited += 1;

        let last_page = self.listing.last_page_number(&first_page);
        debug!("Category {} has {} pages", category.name, last_page);

        let mut pending_first = Some(first_page);
        for page in 1..=last_page {
            let markup = match pending_first.take() {
                Some(markup) => markup,
                None => match self.source.fetch(&page_url(&category_url, page)).await {
                    Some(markup) => markup,
                    None => {
                        warn!("Page {} of {} unreachable, leaving category", page, category.name);
                        outcome.stats.page_failures += 1;
                        return Flow::NextCategory;
                    }
                },
            };
            outcome.stats.pages_fetched += 1;

            let items = self.listing.extract_items(&markup, now);
            if items.is_empty() {
                debug!("No threads on page {} of {}", page, category.name);
                return Flow::NextCategory;
            }

            for item in items {
                outcome.stats.items_seen += 1;

                if item.published_at < cutoff {
                    debug!(
                        "Thread {} ({}) older than cutoff, leaving {}",
                        item.external_id, item.published_at, category.name
                    );
                    outcome.stats.stopped_by_cutoff += 1;
                    return Flow::NextCategory;
                }

                if !seen.insert(item.external_id.clone()) {
                    outcome.stats.duplicate_items += 1;
                    continue;
                }

                let content_text = self.fetch_thread_text(&item, &mut outcome.stats).await;
                outcome
                    .posts
                    .push(self.to_raw_post(item, category, content_text));

                if outcome.posts.len() >= self.options.max_posts_per_run {
                    info!(
                        "Reached {} posts for {}, stopping crawl",
                        self.options.max_posts_per_run, self.options.platform
                    );
                    outcome.stats.stopped_by_cap = true;
                    return Flow::Finished;
                }

                if !self.options.request_delay.is_zero() {
                    sleep(self.options.request_delay).await;
                }
            }
        }

        Flow::NextCategory
    }

    async fn fetch_thread_text(&self, item: &ListingItem, stats: &mut CrawlStats) -> String {
        let body = match self.source.fetch(&item.url).await {
            Some(markup) => self.thread.extract_body(&markup),
            None => None,
        };

        match body {
            Some(body) => {
                stats.threads_fetched += 1;
                body.text
            }
            None => {
                debug!("No body for thread {}, keeping it without content", item.url);
                stats.thread_failures += 1;
                String::new()
            }
        }
    }

    fn to_raw_post(&self, item: ListingItem, category: &CategoryConfig, content_text: String) -> RawPost {
        let category = if item.category.is_empty() {
            category.name.clone()
        } else {
            item.category
        };

        RawPost {
            platform: self.options.platform.clone(),
            external_id: item.external_id,
            url: item.url,
            category,
            title: item.title,
            content_text,
            author: item.author,
            replies: item.replies,
            views: item.views,
            published_at: item.published_at,
        }
    }
}

/// Page 1 is the category URL itself; later pages append `page-N`.
/// Oldest publish time still inside the window. A window reaching past the
/// representable range keeps everything.
fn cutoff_for(now: DateTime<Utc>, from_days_ago: i64) -> DateTime<Utc> {
    TimeDelta::try_days(from_days_ago)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn page_url(category_url: &Url, page: u32) -> String {
    let base = category_url.as_str().trim_end_matches('/');
    if page <= 1 {
        base.to_string()
    } else {
        format!("{base}/page-{page}")
    }
}
