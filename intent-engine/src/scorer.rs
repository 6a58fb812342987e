use regex::Regex;
use tradewatch_core::{
    CoreError, KeywordConfig, ParseError, RawPost, ScoredPost, ScoringConfig, StructuralBonuses,
};

const EQUITY_PHRASES: &[&str] = &[
    "equity curve",
    "drawdown",
    "sharpe",
    "profit factor",
    "expectancy",
    "cagr",
    "max drawdown",
];

const CODE_MARKERS: &[&str] = &["<code>", "```", "def ", "class ", ";"];

const PERCENTAGE_PATTERN: &str = r"\b\d+(?:\.\d+)?%";

#[derive(Debug, Clone)]
struct KeywordGroup {
    name: String,
    phrases: Vec<(String, i64)>,
}

/// Score and the ordered trail of contributions behind it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntentScore {
    pub score: i64,
    pub reasons: Vec<String>,
}

impl IntentScore {
    fn add(&mut self, weight: i64, category: &str, label: &str) {
        self.score = self.score.saturating_add(weight);
        self.reasons.push(format!("{weight:+} {category}:{label}"));
    }

    /// Zero-weight conditions still count but leave no trace.
    fn add_bonus(&mut self, weight: i64, label: &str) {
        if weight != 0 {
            self.add(weight, "structural", label);
        }
    }
}

/// Keyword and structure based trading-intent scorer.
///
/// Keyword tables are lower-cased once at construction; matching is plain
/// substring search over lower-cased title and content.
#[derive(Debug, Clone)]
pub struct IntentScorer {
    title_weight: i64,
    content_weight: i64,
    positive: Vec<KeywordGroup>,
    negative: Vec<(String, i64)>,
    bonuses: StructuralBonuses,
    percentage: Regex,
}

impl IntentScorer {
    pub fn new(scoring: &ScoringConfig, keywords: &KeywordConfig) -> Result<Self, CoreError> {
        let percentage = Regex::new(PERCENTAGE_PATTERN).map_err(|e| ParseError::InvalidPattern {
            pattern: PERCENTAGE_PATTERN.to_string(),
            reason: e.to_string(),
        })?;

        let positive = keywords
            .positive
            .iter()
            .map(|(name, phrases)| KeywordGroup {
                name: name.clone(),
                phrases: normalize_phrases(phrases.iter()),
            })
            .collect::<Vec<_>>();
        let negative = normalize_phrases(keywords.negative.iter());

        tracing::debug!(
            "Scorer ready: keyword groups [{}], {} penalties",
            positive
                .iter()
                .map(|g| g.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            negative.len()
        );

        Ok(Self {
            title_weight: scoring.title,
            content_weight: scoring.content,
            positive,
            negative,
            bonuses: scoring.structural_bonuses.clone(),
            percentage,
        })
    }

    pub fn score(&self, post: &RawPost) -> IntentScore {
        let title = post.title.to_lowercase();
        let content = post.content_text.to_lowercase();
        let mut result = IntentScore::default();

        for group in &self.positive {
            for (phrase, weight) in &group.phrases {
                if title.contains(phrase.as_str()) {
                    result.add(weight.saturating_mul(self.title_weight), "title", phrase);
                } else if content.contains(phrase.as_str()) {
                    result.add(weight.saturating_mul(self.content_weight), "content", phrase);
                }
            }
        }

        for (phrase, weight) in &self.negative {
            if title.contains(phrase.as_str()) || content.contains(phrase.as_str()) {
                result.add(*weight, "penalty", phrase);
            }
        }

        let length = content.chars().count();
        if length > 1000 {
            result.add_bonus(self.bonuses.post_length_gt_1000, "long_post_1000");
        } else if length > 500 {
            result.add_bonus(self.bonuses.post_length_gt_500, "long_post_500");
        }

        if contains_code(&content) {
            result.add_bonus(self.bonuses.contains_code_snippet, "code_snippet");
        }

        if self.contains_equity_stats(&content) {
            result.add_bonus(self.bonuses.contains_equity_curve_or_stats, "equity_stats");
        }

        if post.replies >= 10 {
            result.add_bonus(self.bonuses.comment_count_gt_10, "replies_gt_10");
        }

        result
    }

    pub fn score_posts(&self, posts: Vec<RawPost>) -> Vec<ScoredPost> {
        posts
            .into_iter()
            .map(|post| {
                let IntentScore { score, reasons } = self.score(&post);
                ScoredPost::new(post, score, reasons)
            })
            .collect()
    }

    fn contains_equity_stats(&self, content: &str) -> bool {
        EQUITY_PHRASES.iter().any(|p| content.contains(p)) || self.percentage.is_match(content)
    }
}

fn contains_code(content: &str) -> bool {
    CODE_MARKERS.iter().any(|marker| content.contains(marker))
}

fn normalize_phrases<'a>(phrases: impl Iterator<Item = (&'a String, &'a i64)>) -> Vec<(String, i64)> {
    phrases
        .map(|(phrase, weight)| (phrase.trim().to_lowercase(), *weight))
        .filter(|(phrase, _)| !phrase.is_empty())
        .collect()
}
