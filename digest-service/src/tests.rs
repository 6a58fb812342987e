use crate::{filter_new_posts, DeliveryOutcome, DigestPipeline, PipelineSettings, PostSource, RUN_EVENT};
use chrono::{TimeZone, Utc};
use forum_client::{CrawlOutcome, CrawlStats};
use indexmap::IndexMap;
use intent_engine::IntentScorer;
use llm_interface::Summarizer;
use std::collections::HashSet;
use std::sync::Mutex;
use tradewatch_core::{
    CoreError, DatabaseError, DeliveryError, DigestSender, KeywordConfig, LlmError,
    PostRepository, RawPost, RunLogEntry, RunStatus, ScoredPost, ScoringConfig, Thresholds,
};

fn post(platform: &str, id: &str, title: &str, content: &str) -> RawPost {
    RawPost {
        platform: platform.to_string(),
        external_id: id.to_string(),
        url: format!("https://forum.example.com/threads/t.{id}/"),
        category: "Automated Trading".to_string(),
        title: title.to_string(),
        content_text: content.to_string(),
        author: "trader42".to_string(),
        replies: 2,
        views: 40,
        published_at: Utc.with_ymd_and_hms(2024, 6, 10, 7, 21, 0).unwrap(),
    }
}

fn crawl() -> Vec<RawPost> {
    vec![
        post("elitetrader", "1", "Backtest results", ""),
        post("elitetrader", "2", "Hello", "backtest inside"),
        post("elitetrader", "3", "Random chat", ""),
        post("elitetrader", "4", "Backtest giveaway", ""),
        post("elitetrader", "5", "Another backtest", ""),
    ]
}

fn scorer() -> IntentScorer {
    let mut strategy = IndexMap::new();
    strategy.insert("backtest".to_string(), 3);
    let mut positive = IndexMap::new();
    positive.insert("strategy".to_string(), strategy);
    let mut negative = IndexMap::new();
    negative.insert("giveaway".to_string(), -5);

    let scoring = ScoringConfig {
        title: 2,
        content: 1,
        thresholds: Thresholds { min_score: 3 },
        ..ScoringConfig::default()
    };
    IntentScorer::new(&scoring, &KeywordConfig { positive, negative }).unwrap()
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        min_score: 3,
        subject_prefix: "Tradewatch digest".to_string(),
    }
}

struct FakeSource {
    platform: String,
    posts: Vec<RawPost>,
}

impl FakeSource {
    fn new(posts: Vec<RawPost>) -> Self {
        Self {
            platform: "elitetrader".to_string(),
            posts,
        }
    }
}

impl PostSource for FakeSource {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn collect(&self) -> CrawlOutcome {
        CrawlOutcome {
            posts: self.posts.clone(),
            stats: CrawlStats {
                categories_visited: 1,
                items_seen: self.posts.len(),
                ..CrawlStats::default()
            },
        }
    }
}

#[derive(Default)]
struct MemoryRepository {
    stored: Mutex<Vec<ScoredPost>>,
    lookups: Mutex<Vec<(String, Vec<String>)>>,
    runs: Mutex<Vec<RunLogEntry>>,
    fail_inserts: bool,
    fail_lookups: bool,
}

impl MemoryRepository {
    fn with_stored(ids: &[&str]) -> Self {
        let repo = Self::default();
        repo.stored.lock().unwrap().extend(
            ids.iter()
                .map(|id| ScoredPost::new(post("elitetrader", id, "old", ""), 0, Vec::new())),
        );
        repo
    }

    fn stored_ids(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.post.external_id.clone())
            .collect()
    }

    fn runs(&self) -> Vec<RunLogEntry> {
        self.runs.lock().unwrap().clone()
    }
}

impl PostRepository for MemoryRepository {
    async fn existing_external_ids(
        &self,
        platform: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>, CoreError> {
        self.lookups
            .lock()
            .unwrap()
            .push((platform.to_string(), external_ids.to_vec()));
        if self.fail_lookups {
            return Err(DatabaseError::DatabaseLocked.into());
        }
        Ok(self
            .stored
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.post.platform == platform && external_ids.contains(&p.post.external_id))
            .map(|p| p.post.external_id.clone())
            .collect())
    }

    async fn insert_posts(&self, posts: &[ScoredPost]) -> Result<u64, CoreError> {
        if self.fail_inserts {
            return Err(DatabaseError::DatabaseLocked.into());
        }
        let mut stored = self.stored.lock().unwrap();
        let mut inserted = 0;
        for post in posts {
            let exists = stored.iter().any(|p| {
                p.post.platform == post.post.platform
                    && p.post.external_id == post.post.external_id
            });
            if !exists {
                stored.push(post.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn record_run(&self, entry: &RunLogEntry) -> Result<(), CoreError> {
        self.runs.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, Vec<String>)>>,
    fail: bool,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl DigestSender for RecordingSender {
    async fn send_digest(&self, subject: &str, posts: &[ScoredPost]) -> Result<(), CoreError> {
        self.sent.lock().unwrap().push((
            subject.to_string(),
            posts.iter().map(|p| p.post.external_id.clone()).collect(),
        ));
        if self.fail {
            return Err(DeliveryError::AuthenticationFailed {
                username: "digest@example.com".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeSummarizer {
    fail_for: Option<&'static str>,
}

impl Summarizer for FakeSummarizer {
    async fn summarize(&self, post: &RawPost) -> Result<String, CoreError> {
        if self.fail_for == Some(post.external_id.as_str()) {
            return Err(LlmError::EmptyCompletion {
                provider: "fake".to_string(),
            }
            .into());
        }
        Ok(format!("Summary of {}", post.title))
    }
}

#[tokio::test]
async fn test_full_run_sends_ranked_digest() {
    let repo = MemoryRepository::default();
    let sender = RecordingSender::default();
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.crawled, 5);
    assert_eq!(report.new, 5);
    assert_eq!(report.qualifying, 3);
    assert_eq!(report.persisted, 3);
    assert_eq!(report.delivery, DeliveryOutcome::Sent);
    assert!(!report.is_failure());

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.starts_with("Tradewatch digest: 3 new posts from elitetrader"));
    assert_eq!(sent[0].1, vec!["1", "5", "2"]);
    assert_eq!(repo.stored_ids(), vec!["1", "5", "2"]);

    let runs = repo.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
    assert_eq!(runs[0].event_type, RUN_EVENT);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].metadata["qualifying"], 3);
    assert_eq!(runs[0].metadata["delivery"], "sent");
    assert!(runs[0].reason.is_none());
}

#[tokio::test]
async fn test_stored_posts_are_not_resent() {
    let repo = MemoryRepository::with_stored(&["1", "2"]);
    let sender = RecordingSender::default();
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.new, 3);
    assert_eq!(report.qualifying, 1);
    assert_eq!(sender.sent()[0].1, vec!["5"]);
    assert!(sender.sent()[0].0.contains("1 new post from"));
}

#[tokio::test]
async fn test_nothing_qualifying_skips_insert_and_email() {
    let repo = MemoryRepository::default();
    let sender = RecordingSender::default();
    let quiet = vec![
        post("elitetrader", "3", "Random chat", ""),
        post("elitetrader", "4", "Backtest giveaway", ""),
    ];
    let pipeline = DigestPipeline::new(
        FakeSource::new(quiet),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::NothingNew);
    assert_eq!(report.delivery, DeliveryOutcome::Skipped);
    assert!(sender.sent().is_empty());
    assert!(repo.stored_ids().is_empty());
    assert_eq!(repo.runs()[0].status, RunStatus::NothingNew);
}

#[tokio::test]
async fn test_empty_crawl_skips_store_lookup() {
    let repo = MemoryRepository::default();
    let sender = RecordingSender::default();
    let pipeline = DigestPipeline::new(
        FakeSource::new(Vec::new()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::NothingNew);
    assert!(repo.lookups.lock().unwrap().is_empty());
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn test_delivery_failure_keeps_persisted_posts() {
    let repo = MemoryRepository::default();
    let sender = RecordingSender {
        fail: true,
        ..RecordingSender::default()
    };
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert!(report.is_failure());
    assert_eq!(report.persisted, 3);
    assert!(matches!(
        report.delivery,
        DeliveryOutcome::Failed { ref code, .. } if code == "MAIL_AUTH_FAILED"
    ));
    assert_eq!(repo.stored_ids().len(), 3);
    assert_eq!(
        repo.runs()[0].reason.as_deref(),
        Some("delivery: MAIL_AUTH_FAILED")
    );
}

#[tokio::test]
async fn test_persistence_failure_sends_once() {
    let repo = MemoryRepository {
        fail_inserts: true,
        ..MemoryRepository::default()
    };
    let sender = RecordingSender::default();
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.persisted, 0);
    assert_eq!(report.persistence_error.as_deref(), Some("DB_LOCKED"));
    assert_eq!(report.delivery, DeliveryOutcome::Sent);
    assert_eq!(sender.sent().len(), 1);
}

#[tokio::test]
async fn test_lookup_failure_aborts_before_delivery() {
    let repo = MemoryRepository {
        fail_lookups: true,
        ..MemoryRepository::default()
    };
    let sender = RecordingSender::default();
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        None::<&FakeSummarizer>,
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.lookup_error.as_deref(), Some("DB_LOCKED"));
    assert!(report.persistence_error.is_none());
    assert!(sender.sent().is_empty());
    let runs = repo.runs();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].reason.as_deref(), Some("lookup: DB_LOCKED"));
}

#[tokio::test]
async fn test_failed_summary_does_not_block_run() {
    let repo = MemoryRepository::default();
    let sender = RecordingSender::default();
    let summarizer = FakeSummarizer {
        fail_for: Some("5"),
    };
    let pipeline = DigestPipeline::new(
        FakeSource::new(crawl()),
        &repo,
        &sender,
        Some(&summarizer),
        scorer(),
        settings(),
    );

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.summary_failures, 1);

    let stored = repo.stored.lock().unwrap().clone();
    assert_eq!(stored[0].summary.as_deref(), Some("Summary of Backtest results"));
    assert_eq!(stored[1].post.external_id, "5");
    assert!(stored[1].summary.is_none());
    assert_eq!(stored[2].summary.as_deref(), Some("Summary of Hello"));
}

#[tokio::test]
async fn test_filter_new_posts_groups_by_platform() {
    let repo = MemoryRepository::with_stored(&["2"]);
    let posts = vec![
        post("elitetrader", "1", "a", ""),
        post("ninjatrader", "2", "b", ""),
        post("elitetrader", "2", "c", ""),
        post("elitetrader", "3", "d", ""),
    ];

    let fresh = filter_new_posts(&repo, posts).await.unwrap();

    let keys: Vec<(&str, &str)> = fresh
        .iter()
        .map(|p| (p.platform.as_str(), p.external_id.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![("elitetrader", "1"), ("ninjatrader", "2"), ("elitetrader", "3")]
    );

    let lookups = repo.lookups.lock().unwrap().clone();
    assert_eq!(lookups.len(), 2);
    assert_eq!(lookups[0], ("elitetrader".to_string(), vec!["1".to_string(), "2".to_string(), "3".to_string()]));
    assert_eq!(lookups[1], ("ninjatrader".to_string(), vec!["2".to_string()]));
}

#[tokio::test]
async fn test_filter_new_posts_empty_store_keeps_all() {
    let repo = MemoryRepository::default();
    let fresh = filter_new_posts(&repo, crawl()).await.unwrap();
    assert_eq!(fresh, crawl());
}
