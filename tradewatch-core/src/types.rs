use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One thread discovered on a forum listing page.
///
/// `(platform, external_id)` is the natural key. `published_at` is always
/// populated; the page parser substitutes the crawl time when the listing
/// carries no usable timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub platform: String,
    pub external_id: String,
    pub url: String,
    pub category: String,
    pub title: String,
    pub content_text: String,
    pub author: String,
    pub replies: u64,
    pub views: u64,
    pub published_at: DateTime<Utc>,
}

impl RawPost {
    pub fn engagement(&self) -> Engagement {
        Engagement {
            replies: self.replies,
            views: self.views,
        }
    }

    /// Timestamp as stored: UTC with the offset dropped.
    pub fn published_at_naive(&self) -> NaiveDateTime {
        self.published_at.naive_utc()
    }
}

/// A post with its intent score and the trail of contributions that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    pub post: RawPost,
    pub intent_score: i64,
    pub intent_reasons: Vec<String>,
    pub summary: Option<String>,
}

impl ScoredPost {
    pub fn new(post: RawPost, intent_score: i64, intent_reasons: Vec<String>) -> Self {
        Self {
            post,
            intent_score,
            intent_reasons,
            summary: None,
        }
    }
}

/// Engagement counters persisted as a JSON blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub replies: u64,
    pub views: u64,
}

/// Outcome status recorded in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    NothingNew,
    PartialFailure,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::NothingNew => "nothing_new",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLogEntry {
    pub run_id: String,
    pub event_type: String,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: String,
}
