use forum_client::{CrawlOptions, Crawler, Fetcher};
use std::io::{self, Write};
use std::time::Duration;
use tradewatch_core::{CategoryConfig, HttpSettings, SelectorConfig};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Forum Crawl Manual Test ===\n");

    print!("Category URL (e.g. https://www.elitetrader.com/et/forums/automated-trading.10/): ");
    io::stdout().flush()?;
    let mut category_url = String::new();
    io::stdin().read_line(&mut category_url)?;
    let category_url = category_url.trim().to_string();

    let parsed = match Url::parse(&category_url) {
        Ok(url) => url,
        Err(e) => {
            println!("❌ Not a valid URL: {e}");
            return Ok(());
        }
    };
    let base_url = Url::parse(&format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    ))?;

    let http = HttpSettings::default();
    let fetcher = Fetcher::new("Mozilla/5.0 (compatible; tradewatch-manual/0.1)", &http)?;
    let options = CrawlOptions {
        platform: "manual".to_string(),
        base_url,
        categories: vec![CategoryConfig {
            name: "Manual".to_string(),
            url: category_url,
        }],
        max_posts_per_run: 5,
        from_days_ago: 2,
        request_delay: Duration::from_millis(http.request_delay_ms),
    };
    let crawler = Crawler::new(&fetcher, options, &SelectorConfig::default())?;

    println!("\n🔍 Crawling up to 5 threads from the last 2 days...\n");
    let outcome = crawler.crawl().await;

    for (i, post) in outcome.posts.iter().enumerate() {
        println!("{}. {} [{}]", i + 1, post.title, post.external_id);
        println!("   by {} | {} replies | {} views | {}", post.author, post.replies, post.views, post.published_at);
        println!("   {}", post.url);
        let preview: String = post.content_text.chars().take(160).collect();
        println!("   {}\n", preview.replace('\n', " "));
    }

    println!("📊 Stats: {:#?}", outcome.stats);
    println!("📡 HTTP: {:?}", fetcher.metrics());
    Ok(())
}
