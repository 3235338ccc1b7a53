//! Per-item review-count enrichment on a bounded task pool.
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use crate::fetch::{Fetcher, RequestContext};
use crate::model::{Product, ScrapeStatus};
use crate::normalize::count_from_value;

/// Where to ask for reviews and how to read the answer.
#[derive(Debug, Clone)]
pub struct ReviewEndpoint {
    pub url_template: String,
    pub count_pointer: String,
}

impl ReviewEndpoint {
    pub fn url_for(&self, id: &str) -> Option<Url> {
        Url::parse(&self.url_template.replace("{id}", id)).ok()
    }
}

/// Review count from a JSON body. `Ok(None)` when the body is valid but
/// carries no count.
pub fn parse_review_count(body: &str, pointer: &str) -> Result<Option<i64>, serde_json::Error> {
    let json: Value = serde_json::from_str(body)?;
    Ok(json.pointer(pointer).and_then(count_from_value))
}

/// Fetch and merge the review count. Never drops the record: any failure
/// yields `scrape_status = failed` with `number_reviews` left empty.
pub async fn enrich_product(
    fetcher: &dyn Fetcher,
    endpoint: &ReviewEndpoint,
    context: &RequestContext,
    mut product: Product,
) -> Product {
    let Some(url) = endpoint.url_for(&product.id) else {
        warn!(id = %product.id, "cannot build review URL");
        product.scrape_status = ScrapeStatus::Failed;
        return product;
    };

    let response = match fetcher.fetch(&context.request(url.clone())).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(id = %product.id, %url, %err, "review fetch failed");
            product.scrape_status = ScrapeStatus::Failed;
            return product;
        }
    };
    if !response.is_success() {
        warn!(id = %product.id, %url, status = response.status, "review fetch returned error status");
        product.scrape_status = ScrapeStatus::Failed;
        return product;
    }

    match parse_review_count(&response.body, &endpoint.count_pointer) {
        Ok(count) => {
            debug!(id = %product.id, reviews = ?count, "enriched");
            product.number_reviews = count;
            product.scrape_status = ScrapeStatus::Successful;
        }
        Err(err) => {
            warn!(id = %product.id, %err, "failed to decode review response");
            product.number_reviews = None;
            product.scrape_status = ScrapeStatus::Failed;
        }
    }
    product
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub succeeded: usize,
    pub failed: usize,
    /// Records that could not be handed on because the writer had gone away.
    pub undelivered: usize,
}

/// Spawns one task per product; at most `concurrency` fetches run at once.
/// Finished products are sent to `out`. Call [`Enricher::drain`] before
/// dropping so in-flight work completes.
pub struct Enricher {
    fetcher: Arc<dyn Fetcher>,
    endpoint: Arc<ReviewEndpoint>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<(ScrapeStatus, bool)>,
    out: mpsc::Sender<Product>,
}

impl Enricher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        endpoint: ReviewEndpoint,
        concurrency: usize,
        out: mpsc::Sender<Product>,
    ) -> Self {
        Self {
            fetcher,
            endpoint: Arc::new(endpoint),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            out,
        }
    }

    pub fn dispatch(&mut self, product: Product, context: RequestContext) {
        let fetcher = Arc::clone(&self.fetcher);
        let endpoint = Arc::clone(&self.endpoint);
        let permits = Arc::clone(&self.permits);
        let out = self.out.clone();
        self.tasks.spawn(async move {
            let enriched = match permits.acquire_owned().await {
                Ok(_permit) => enrich_product(fetcher.as_ref(), &endpoint, &context, product).await,
                Err(_) => {
                    let mut product = product;
                    product.scrape_status = ScrapeStatus::Failed;
                    product
                }
            };
            let status = enriched.scrape_status;
            let delivered = out.send(enriched).await.is_ok();
            (status, delivered)
        }
        .in_current_span());
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched task.
    pub async fn drain(mut self) -> EnrichStats {
        let mut stats = EnrichStats::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((status, delivered)) => {
                    match status {
                        ScrapeStatus::Successful => stats.succeeded += 1,
                        ScrapeStatus::Failed => stats.failed += 1,
                    }
                    if !delivered {
                        stats.undelivered += 1;
                    }
                }
                Err(err) => {
                    warn!(?err, "enrichment task aborted");
                    stats.failed += 1;
                    stats.undelivered += 1;
                }
            }
        }
        stats
    }
}
