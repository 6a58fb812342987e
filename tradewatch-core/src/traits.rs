use crate::{CoreError, RunLogEntry, ScoredPost};
use std::collections::HashSet;

/// Persistent store of posts already seen, keyed by `(platform, external_id)`.
pub trait PostRepository {
    /// Subset of `external_ids` already stored for `platform`.
    async fn existing_external_ids(
        &self,
        platform: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>, CoreError>;

    /// Insert posts, silently skipping keys that already exist.
    /// Returns the number of rows actually inserted.
    async fn insert_posts(&self, posts: &[ScoredPost]) -> Result<u64, CoreError>;

    async fn record_run(&self, entry: &RunLogEntry) -> Result<(), CoreError>;
}

/// Delivery channel for a ranked digest.
pub trait DigestSender {
    async fn send_digest(&self, subject: &str, posts: &[ScoredPost]) -> Result<(), CoreError>;
}
