use std::collections::{HashMap, HashSet};
use tradewatch_core::{CoreError, PostRepository, RawPost};

/// Drops posts whose `(platform, external_id)` is already stored, keeping
/// crawl order among the survivors. One lookup per platform present.
pub async fn filter_new_posts<R: PostRepository>(
    repository: &R,
    posts: Vec<RawPost>,
) -> Result<Vec<RawPost>, CoreError> {
    if posts.is_empty() {
        return Ok(posts);
    }

    let mut platforms: Vec<&str> = Vec::new();
    let mut candidates: HashMap<&str, Vec<String>> = HashMap::new();
    for post in &posts {
        let ids = candidates.entry(post.platform.as_str()).or_insert_with(|| {
            platforms.push(post.platform.as_str());
            Vec::new()
        });
        ids.push(post.external_id.clone());
    }

    let mut existing: HashMap<String, HashSet<String>> = HashMap::new();
    for platform in platforms {
        let ids = &candidates[platform];
        let found = repository.existing_external_ids(platform, ids).await?;
        tracing::debug!(
            "{}: {} of {} candidates already stored",
            platform,
            found.len(),
            ids.len()
        );
        existing.insert(platform.to_string(), found);
    }

    Ok(posts
        .into_iter()
        .filter(|post| {
            !existing
                .get(&post.platform)
                .is_some_and(|ids| ids.contains(&post.external_id))
        })
        .collect())
}
