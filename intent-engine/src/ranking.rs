use tradewatch_core::ScoredPost;

/// Keeps posts at or above `min_score`, highest first.
///
/// `sort_by` is stable, so equal scores keep their crawl order.
pub fn rank_posts(posts: Vec<ScoredPost>, min_score: i64) -> Vec<ScoredPost> {
    let mut qualifying: Vec<ScoredPost> = posts
        .into_iter()
        .filter(|p| p.intent_score >= min_score)
        .collect();
    qualifying.sort_by(|a, b| b.intent_score.cmp(&a.intent_score));
    qualifying
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tradewatch_core::RawPost;

    fn scored(id: &str, score: i64) -> ScoredPost {
        let post = RawPost {
            platform: "elitetrader".to_string(),
            external_id: id.to_string(),
            url: format!("https://www.elitetrader.com/et/threads/t.{id}/"),
            category: "Automated Trading".to_string(),
            title: format!("Thread {id}"),
            content_text: String::new(),
            author: "trader42".to_string(),
            replies: 0,
            views: 0,
            published_at: Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
        };
        ScoredPost::new(post, score, Vec::new())
    }

    fn ids(posts: &[ScoredPost]) -> Vec<&str> {
        posts.iter().map(|p| p.post.external_id.as_str()).collect()
    }

    #[test]
    fn test_ties_keep_crawl_order() {
        let ranked = rank_posts(vec![scored("1", 5), scored("2", 9), scored("3", 5)], 5);
        assert_eq!(ids(&ranked), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let ranked = rank_posts(
            vec![scored("1", 2), scored("2", 3), scored("3", 4), scored("4", -1)],
            3,
        );
        assert_eq!(ids(&ranked), vec!["3", "2"]);
    }

    #[test]
    fn test_nothing_qualifies() {
        assert!(rank_posts(vec![scored("1", 1)], 10).is_empty());
        assert!(rank_posts(Vec::new(), 0).is_empty());
    }
}
