use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use listing_scraper::config;
use listing_scraper::db;
use listing_scraper::fetch::HttpFetcher;
use listing_scraper::pipeline::{CrawlSettings, Pipeline};
use listing_scraper::sink::{JsonSink, SqliteSink};

#[derive(Debug, Parser)]
#[command(author, version, about = "Crawl a product listing and persist every item")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listing URL to start from
    seed: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let fetcher = HttpFetcher::new(&cfg.http.user_agent, cfg.timeout())?;
    let mut pipeline = Pipeline::new(Arc::new(fetcher), CrawlSettings::from_config(&cfg));

    if cfg.sinks.sqlite {
        let pool = db::init_pool(&cfg.database_url()).await?;
        db::run_migrations(&pool).await?;
        pipeline = pipeline.with_sink(Arc::new(SqliteSink::new(pool)));
    }
    if let Some(path) = cfg.sinks.json_path.as_deref().filter(|p| !p.trim().is_empty()) {
        let sink = JsonSink::open(path, cfg.sinks.batch_size).await?;
        pipeline = pipeline.with_sink(Arc::new(sink));
    }

    let summary = pipeline.run(&args.seed).await?;
    if summary.write_failures > 0 || summary.enrichment_failed > 0 {
        warn!(
            write_failures = summary.write_failures,
            enrichment_failed = summary.enrichment_failed,
            "run finished with partial failures"
        );
    }
    info!(run_id = %summary.run_id, termination = %summary.termination, "done");
    println!(
        "run {}: {} pages, {} items ({} skipped), {} persisted, stopped: {}",
        summary.run_id,
        summary.pages_fetched,
        summary.items_extracted,
        summary.items_skipped,
        summary.persisted,
        summary.termination
    );
    Ok(())
}
