//! Trading-intent scoring and ranking of crawled posts.

pub mod ranking;
pub mod scorer;

pub use ranking::rank_posts;
pub use scorer::{IntentScore, IntentScorer};
