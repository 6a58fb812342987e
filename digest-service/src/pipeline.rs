use crate::dedupe::filter_new_posts;
use chrono::Utc;
use forum_client::{CrawlOutcome, CrawlStats, Crawler, PageSource};
use intent_engine::{rank_posts, IntentScorer};
use llm_interface::Summarizer;
use serde_json::json;
use tracing::{error, info, warn};
use tradewatch_core::{
    DigestSender, ErrorExt, PostRepository, RunLogEntry, RunStatus, ScoredPost,
};
use uuid::Uuid;

pub const RUN_EVENT: &str = "digest_run";
const CREATED_BY: &str = "system";

/// Anything that yields one platform's crawl for a run.
pub trait PostSource {
    fn platform(&self) -> &str;
    async fn collect(&self) -> CrawlOutcome;
}

impl<S: PageSource> PostSource for Crawler<S> {
    fn platform(&self) -> &str {
        &self.options().platform
    }

    async fn collect(&self) -> CrawlOutcome {
        self.crawl().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing qualified, so no digest was sent.
    Skipped,
    Sent,
    Failed { code: String, message: String },
}

impl DeliveryOutcome {
    fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub platform: String,
    pub status: RunStatus,
    pub crawled: usize,
    pub new: usize,
    pub qualifying: usize,
    pub persisted: u64,
    pub delivery: DeliveryOutcome,
    pub summary_failures: usize,
    /// Set when the already-stored lookup failed and the run stopped early.
    pub lookup_error: Option<String>,
    pub persistence_error: Option<String>,
    pub crawl: CrawlStats,
}

impl RunReport {
    fn new(platform: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            platform: platform.to_string(),
            status: RunStatus::NothingNew,
            crawled: 0,
            new: 0,
            qualifying: 0,
            persisted: 0,
            delivery: DeliveryOutcome::Skipped,
            summary_failures: 0,
            lookup_error: None,
            persistence_error: None,
            crawl: CrawlStats::default(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, RunStatus::Failed | RunStatus::PartialFailure)
    }

    fn settle_status(&mut self) {
        let delivery_failed = matches!(self.delivery, DeliveryOutcome::Failed { .. });
        let persistence_failed = self.persistence_error.is_some();
        self.status = match (persistence_failed, delivery_failed) {
            (true, true) => RunStatus::Failed,
            (true, false) | (false, true) => RunStatus::PartialFailure,
            (false, false) => RunStatus::Success,
        };
    }

    fn reason(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(code) = &self.lookup_error {
            parts.push(format!("lookup: {code}"));
        }
        if let Some(code) = &self.persistence_error {
            parts.push(format!("persistence: {code}"));
        }
        if let DeliveryOutcome::Failed { code, .. } = &self.delivery {
            parts.push(format!("delivery: {code}"));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }

    fn metadata(&self) -> serde_json::Value {
        json!({
            "platform": self.platform,
            "crawled": self.crawled,
            "new": self.new,
            "qualifying": self.qualifying,
            "persisted": self.persisted,
            "delivery": self.delivery.label(),
            "summary_failures": self.summary_failures,
            "crawl": {
                "categories_visited": self.crawl.categories_visited,
                "categories_unreachable": self.crawl.categories_unreachable,
                "pages_fetched": self.crawl.pages_fetched,
                "page_failures": self.crawl.page_failures,
                "thread_failures": self.crawl.thread_failures,
                "stopped_by_cap": self.crawl.stopped_by_cap,
            },
        })
    }

    pub fn log_entry(&self) -> RunLogEntry {
        RunLogEntry {
            run_id: self.run_id.clone(),
            event_type: RUN_EVENT.to_string(),
            status: self.status,
            reason: self.reason(),
            metadata: self.metadata(),
            created_by: CREATED_BY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub min_score: i64,
    pub subject_prefix: String,
}

/// One platform's run: crawl, dedupe, score, rank, summarize, persist, deliver.
pub struct DigestPipeline<'a, C, R, D, M> {
    source: C,
    repository: &'a R,
    sender: &'a D,
    summarizer: Option<&'a M>,
    scorer: IntentScorer,
    settings: PipelineSettings,
}

impl<'a, C, R, D, M> DigestPipeline<'a, C, R, D, M>
where
    C: PostSource,
    R: PostRepository,
    D: DigestSender,
    M: Summarizer,
{
    pub fn new(
        source: C,
        repository: &'a R,
        sender: &'a D,
        summarizer: Option<&'a M>,
        scorer: IntentScorer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            repository,
            sender,
            summarizer,
            scorer,
            settings,
        }
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new(self.source.platform());
        info!("Run {} started for {}", report.run_id, report.platform);

        let outcome = self.source.collect().await;
        report.crawled = outcome.posts.len();
        report.crawl = outcome.stats;

        let new_posts = match filter_new_posts(self.repository, outcome.posts).await {
            Ok(posts) => posts,
            Err(e) => {
                e.log_error();
                report.lookup_error = Some(e.error_code());
                report.status = RunStatus::Failed;
                self.record(&report).await;
                return report;
            }
        };
        report.new = new_posts.len();

        let ranked = rank_posts(
            self.scorer.score_posts(new_posts),
            self.settings.min_score,
        );
        report.qualifying = ranked.len();

        if ranked.is_empty() {
            info!(
                "No new qualifying posts for {} ({} crawled, {} new, threshold {})",
                report.platform, report.crawled, report.new, self.settings.min_score
            );
            report.status = RunStatus::NothingNew;
            self.record(&report).await;
            return report;
        }

        let ranked = self.summarize(ranked, &mut report).await;

        match self.repository.insert_posts(&ranked).await {
            Ok(inserted) => {
                report.persisted = inserted;
                info!("Persisted {} posts for {}", inserted, report.platform);
            }
            Err(e) => {
                e.log_error();
                report.persistence_error = Some(e.error_code());
            }
        }

        let subject = self.subject(&report.platform, ranked.len());
        report.delivery = match self.sender.send_digest(&subject, &ranked).await {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) => {
                error!("Digest delivery failed for {}: {}", report.platform, e);
                DeliveryOutcome::Failed {
                    code: e.error_code(),
                    message: e.to_string(),
                }
            }
        };

        report.settle_status();
        self.record(&report).await;
        info!(
            "Run {} finished for {}: {} ({} qualifying, delivery {})",
            report.run_id,
            report.platform,
            report.status.as_str(),
            report.qualifying,
            report.delivery.label()
        );
        report
    }

    /// A failed summary leaves the post without one.
    async fn summarize(&self, mut posts: Vec<ScoredPost>, report: &mut RunReport) -> Vec<ScoredPost> {
        let Some(summarizer) = self.summarizer else {
            return posts;
        };

        for scored in &mut posts {
            match summarizer.summarize(&scored.post).await {
                Ok(summary) => scored.summary = Some(summary),
                Err(e) => {
                    warn!(
                        "No summary for {} {}: {}",
                        scored.post.platform, scored.post.external_id, e
                    );
                    report.summary_failures += 1;
                }
            }
        }
        posts
    }

    fn subject(&self, platform: &str, count: usize) -> String {
        format!(
            "{}: {} new post{} from {} ({})",
            self.settings.subject_prefix,
            count,
            if count == 1 { "" } else { "s" },
            platform,
            Utc::now().format("%Y-%m-%d")
        )
    }

    async fn record(&self, report: &RunReport) {
        if let Err(e) = self.repository.record_run(&report.log_entry()).await {
            e.log_warn();
        }
    }
}
