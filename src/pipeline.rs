//! One crawl run end to end.
//!
//! Listing pages are fetched one after another. Each normalised item is
//! handed to the enrichment pool straight away, and finished records travel
//! over a channel to a single persistence task that owns every sink.
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, MAX_ENRICHMENT_CONCURRENCY};
use crate::crawl::{site_origin, validate_seed, PaginationController, PaginationState, Termination};
use crate::enrich::{EnrichStats, Enricher, ReviewEndpoint};
use crate::error::CrawlError;
use crate::extract::PayloadExtractor;
use crate::fetch::{Fetcher, RequestContext};
use crate::model::Product;
use crate::normalize::product_from_item;
use crate::sink::ProductSink;

const CHANNEL_CAPACITY: usize = 64;

/// Run parameters, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub page_cap: u32,
    pub host_marker: String,
    pub path_prefix: String,
    pub payload_marker: String,
    pub enrichment_concurrency: usize,
    pub review: ReviewEndpoint,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl CrawlSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            page_cap: cfg.crawl.page_cap,
            host_marker: cfg.crawl.host_marker.clone(),
            path_prefix: cfg.crawl.path_prefix.clone(),
            payload_marker: cfg.crawl.payload_marker.clone(),
            enrichment_concurrency: cfg.crawl.enrichment_concurrency,
            review: ReviewEndpoint {
                url_template: cfg.crawl.review_url.clone(),
                count_pointer: cfg.crawl.review_count_pointer.clone(),
            },
            headers: cfg.http.headers.clone(),
            cookies: cfg.http.cookies.clone(),
        }
    }

    /// Initial request context; `Referer` falls back to the seed's origin.
    fn initial_context(&self, origin: &str) -> RequestContext {
        let mut headers = self.headers.clone();
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("referer")) {
            headers.insert("Referer".into(), format!("{}/", origin));
        }
        RequestContext::new(headers, self.cookies.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pages_fetched: u32,
    /// Raw items found in listing payloads.
    pub items_extracted: usize,
    /// Items rejected by the field normaliser.
    pub items_skipped: usize,
    pub enriched: usize,
    pub enrichment_failed: usize,
    /// Records accepted by every sink.
    pub persisted: usize,
    /// Individual sink writes that failed.
    pub write_failures: usize,
    pub termination: Termination,
}

#[derive(Debug, Default, Clone, Copy)]
struct PersistStats {
    persisted: usize,
    write_failures: usize,
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    settings: CrawlSettings,
    sinks: Vec<Arc<dyn ProductSink>>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: CrawlSettings) -> Self {
        Self {
            fetcher,
            settings,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProductSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Crawl from `seed` until pagination terminates, then wait for every
    /// in-flight enrichment and write. Only an invalid seed is an error;
    /// every other failure is reported through the summary.
    pub async fn run(&self, seed: &str) -> Result<RunSummary, CrawlError> {
        let seed = validate_seed(seed, &self.settings.host_marker, &self.settings.path_prefix)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run_validated(seed, run_id).instrument(span).await
    }

    async fn run_validated(&self, seed: reqwest::Url, run_id: Uuid) -> Result<RunSummary, CrawlError> {
        let origin = site_origin(&seed);
        info!(%seed, page_cap = self.settings.page_cap, "starting crawl");

        let (tx, rx) = mpsc::channel::<Product>(CHANNEL_CAPACITY);
        let writer = tokio::spawn(persist(self.sinks.clone(), rx).in_current_span());

        let concurrency = self
            .settings
            .enrichment_concurrency
            .clamp(1, MAX_ENRICHMENT_CONCURRENCY);
        let mut enricher = Enricher::new(
            Arc::clone(&self.fetcher),
            self.settings.review.clone(),
            concurrency,
            tx,
        );
        let controller = PaginationController::new(
            Arc::clone(&self.fetcher),
            PayloadExtractor::new(self.settings.payload_marker.clone()),
        );
        let mut state = PaginationState::new(
            seed,
            self.settings.page_cap,
            self.settings.initial_context(&origin),
        );

        let mut items_extracted = 0usize;
        let mut items_skipped = 0usize;
        let termination = controller
            .run(&mut state, |items, context| {
                for item in items {
                    items_extracted += 1;
                    match product_from_item(&item, &origin, Utc::now()) {
                        Ok(product) => enricher.dispatch(product, context.clone()),
                        Err(err) => {
                            items_skipped += 1;
                            let id = item.get("productId").map(|v| v.to_string());
                            warn!(?id, %err, "skipping item");
                        }
                    }
                }
            })
            .await;

        let EnrichStats {
            succeeded,
            failed,
            undelivered,
        } = enricher.drain().await;
        if undelivered > 0 {
            error!(undelivered, "records lost before reaching the writer");
        }

        let persisted = match writer.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(?err, "persistence task aborted");
                PersistStats::default()
            }
        };

        let summary = RunSummary {
            run_id,
            pages_fetched: state.pages_fetched,
            items_extracted,
            items_skipped,
            enriched: succeeded,
            enrichment_failed: failed,
            persisted: persisted.persisted,
            write_failures: persisted.write_failures,
            termination,
        };
        info!(
            pages = summary.pages_fetched,
            items = summary.items_extracted,
            skipped = summary.items_skipped,
            enriched = summary.enriched,
            enrichment_failed = summary.enrichment_failed,
            persisted = summary.persisted,
            write_failures = summary.write_failures,
            termination = %summary.termination,
            "crawl finished"
        );
        Ok(summary)
    }
}

/// The only writer of a run: drains the channel, then closes every sink.
async fn persist(sinks: Vec<Arc<dyn ProductSink>>, mut rx: mpsc::Receiver<Product>) -> PersistStats {
    let mut stats = PersistStats::default();
    while let Some(product) = rx.recv().await {
        let mut accepted = true;
        for sink in &sinks {
            if let Err(err) = sink.accept(&product).await {
                error!(id = %product.id, sink = sink.name(), %err, "failed to write product");
                stats.write_failures += 1;
                accepted = false;
            }
        }
        if accepted {
            stats.persisted += 1;
        }
    }
    for sink in &sinks {
        if let Err(err) = sink.close().await {
            error!(sink = sink.name(), %err, "failed to close sink");
        }
    }
    stats
}
