//! Run configuration.
//!
//! Everything a run needs is read from one TOML file up front and validated
//! before any network or database work starts. Secrets can be kept out of the
//! file and supplied through the environment instead.

use crate::error::{ConfigError, CoreError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use url::Url;

pub const ENV_CONFIG_PATH: &str = "TRADEWATCH_CONFIG";
pub const ENV_DATABASE_URL: &str = "TRADEWATCH_DATABASE_URL";
pub const ENV_SMTP_PASSWORD: &str = "TRADEWATCH_SMTP_PASSWORD";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

pub const DEFAULT_CONFIG_PATH: &str = "config/tradewatch.toml";

/// Widest crawl window accepted, roughly a century.
pub const MAX_RUN_INTERVAL_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app: AppSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub email: EmailSettings,
    #[serde(default)]
    pub summarizer: Option<SummarizerSettings>,
    pub sources: IndexMap<String, SourceConfig>,
    #[serde(default)]
    pub keywords: KeywordConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub user_agent: String,
    /// Posts older than this many days are outside the crawl window.
    #[serde(default = "default_run_interval_days")]
    pub run_interval_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause after each thread-body fetch.
    #[serde(default = "default_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_delay_ms(),
            request_delay_ms: default_delay_ms(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_db_pool_size")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_db_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub categories: Vec<CategoryConfig>,
    pub max_posts_per_run: usize,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub url: String,
}

/// CSS selectors describing a forum's page structure. Defaults match XenForo 2.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub page_nav_link: String,
    pub thread_item: String,
    pub title_link: String,
    pub author: String,
    pub category_link: String,
    pub counter_pair: String,
    pub published_time: String,
    pub first_message: String,
    pub message_body: String,
    pub stripped_blocks: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            page_nav_link: "nav.pageNavWrapper a".to_string(),
            thread_item: "div.structItem.structItem--thread".to_string(),
            title_link: "div.structItem-title a[href*='/threads/']".to_string(),
            author: "ul.structItem-parts a.username".to_string(),
            category_link: "ul.structItem-parts a[href*='/forums/']".to_string(),
            counter_pair: "div.structItem-cell--meta dl.pairs".to_string(),
            published_time: "time.structItem-latestDate".to_string(),
            first_message: "article.message--post".to_string(),
            message_body: "div.bbWrapper".to_string(),
            stripped_blocks: vec![
                "blockquote.bbCodeBlock--quote".to_string(),
                "script".to_string(),
                "style".to_string(),
            ],
        }
    }
}

/// Keyword tables. Map order is the file order, which fixes the order of
/// reasons in a score trail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordConfig {
    #[serde(default)]
    pub positive: IndexMap<String, IndexMap<String, i64>>,
    #[serde(default)]
    pub negative: IndexMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_weight")]
    pub title: i64,
    #[serde(default = "default_weight")]
    pub content: i64,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub structural_bonuses: StructuralBonuses,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title: default_weight(),
            content: default_weight(),
            thresholds: Thresholds::default(),
            structural_bonuses: StructuralBonuses::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thresholds {
    #[serde(default, alias = "minimum_score")]
    pub min_score: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StructuralBonuses {
    pub post_length_gt_1000: i64,
    pub post_length_gt_500: i64,
    pub contains_code_snippet: i64,
    pub contains_equity_curve_or_stats: i64,
    pub comment_count_gt_10: i64,
}

impl Settings {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }),
            _ => CoreError::Io(e),
        })?;

        let mut settings = Self::from_toml_str(&raw)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;

        tracing::debug!(
            "Loaded configuration from {} ({} sources)",
            path.display(),
            settings.sources.len()
        );
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let settings: Settings = toml::from_str(raw).map_err(ConfigError::from)?;
        Ok(settings)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.is_empty()) {
            self.database.url = url;
        }
        if let Some(password) = lookup(ENV_SMTP_PASSWORD).filter(|v| !v.is_empty()) {
            self.email.password = password;
        }
        if let Some(summarizer) = self.summarizer.as_mut() {
            if let Some(key) = lookup(ENV_OPENAI_API_KEY).filter(|v| !v.is_empty()) {
                summarizer.api_key = key;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.user_agent.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "app.user_agent".to_string(),
            });
        }
        if !(0..=MAX_RUN_INTERVAL_DAYS).contains(&self.app.run_interval_days) {
            return Err(ConfigError::InvalidValue {
                field: "app.run_interval_days".to_string(),
                value: self.app.run_interval_days.to_string(),
            });
        }
        if self.http.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_retries".to_string(),
                value: "0".to_string(),
            });
        }
        if self.http.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_connections".to_string(),
                value: "0".to_string(),
            });
        }
        if self.sources.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "no sources configured".to_string(),
            });
        }
        for (platform, source) in &self.sources {
            source.validate(platform)?;
        }
        if self.email.recipients.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "email.recipients is empty".to_string(),
            });
        }
        Ok(())
    }
}

impl SourceConfig {
    fn validate(&self, platform: &str) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidValue {
            field: format!("sources.{platform}.base_url"),
            value: self.base_url.clone(),
        })?;
        if self.categories.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: format!("source `{platform}` has no categories"),
            });
        }
        if self.max_posts_per_run == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("sources.{platform}.max_posts_per_run"),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn default_run_interval_days() -> i64 {
    1
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1200
}

fn default_max_connections() -> usize {
    4
}

fn default_database_url() -> String {
    "sqlite://tradewatch.db?mode=rwc".to_string()
}

fn default_db_pool_size() -> u32 {
    5
}

fn default_smtp_port() -> u16 {
    587
}

fn default_subject_prefix() -> String {
    "Tradewatch digest".to_string()
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_weight() -> i64 {
    1
}
