use database::Database;
use digest_mailer::SmtpDigestSender;
use digest_service::{DigestPipeline, PipelineSettings, RunReport};
use forum_client::{CrawlOptions, Crawler, Fetcher};
use intent_engine::IntentScorer;
use llm_interface::OpenAiSummarizer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tradewatch_core::{CoreError, ErrorExt, Settings, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};

const DEFAULT_LOG_FILTER: &str = "tradewatch=info,forum_client=info,digest_service=info";

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting Tradewatch digest run");

    let config_path = config_path();
    let settings = Settings::load(&config_path).map_err(|e| {
        tracing::error!("Cannot load {}: {}", config_path.display(), e);
        e
    })?;

    let database = Database::connect(&settings.database.url, settings.database.max_connections)
        .await
        .map_err(|e| {
            e.log_error();
            e
        })?;
    database.run_migrations().await?;
    tracing::info!("Database ready");

    let reports = run_sources(&settings, &database).await;
    database.close().await;

    let reports = reports?;
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    for report in &reports {
        tracing::info!(
            "{}: {} crawled, {} new, {} qualifying, {} persisted, status {}",
            report.platform,
            report.crawled,
            report.new,
            report.qualifying,
            report.persisted,
            report.status.as_str()
        );
    }

    if failed > 0 {
        return Err(CoreError::Internal {
            message: format!("{failed} of {} source runs failed", reports.len()),
        });
    }

    tracing::info!("Tradewatch run complete");
    Ok(())
}

/// First CLI argument, then `TRADEWATCH_CONFIG`, then the default path.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

async fn run_sources(settings: &Settings, database: &Database) -> Result<Vec<RunReport>, CoreError> {
    let fetcher = Fetcher::new(&settings.app.user_agent, &settings.http)?;
    let sender = SmtpDigestSender::from_settings(&settings.email)?;
    let summarizer = settings
        .summarizer
        .clone()
        .and_then(|config| match OpenAiSummarizer::new(config) {
            Ok(summarizer) => Some(summarizer),
            Err(e) => {
                tracing::warn!("Summaries disabled: {}", e);
                None
            }
        });
    let pipeline_settings = PipelineSettings {
        min_score: settings.scoring.thresholds.min_score,
        subject_prefix: settings.email.subject_prefix.clone(),
    };

    let mut reports = Vec::with_capacity(settings.sources.len());
    for (platform, source) in &settings.sources {
        let options = CrawlOptions::from_source(platform, source, &settings.app, &settings.http)?;
        let crawler = Crawler::new(&fetcher, options, &source.selectors)?;
        let scorer = IntentScorer::new(&settings.scoring, &settings.keywords)?;

        let pipeline = DigestPipeline::new(
            crawler,
            database,
            &sender,
            summarizer.as_ref(),
            scorer,
            pipeline_settings.clone(),
        );
        reports.push(pipeline.run().await);
    }

    let metrics = fetcher.metrics();
    tracing::info!(
        "HTTP: {} requests, {} succeeded, {} failed attempts, {} URLs given up",
        metrics.requests,
        metrics.successes,
        metrics.failed_attempts,
        metrics.exhausted
    );

    Ok(reports)
}
