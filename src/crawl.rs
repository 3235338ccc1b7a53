//! Listing pagination: one page in flight at a time, stop on an empty page,
//! the page cap, or a page that cannot be read.
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::error::{CrawlError, ExtractionError, TransportError};
use crate::extract::{Extracted, PayloadExtractor};
use crate::fetch::{Fetcher, RequestContext};

const PAGE_PARAM: &str = "page";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    CapReached,
    NoRecords,
    Extraction(ExtractionError),
    Transport(TransportError),
    HttpStatus(u16),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::CapReached => f.write_str("page cap reached"),
            Termination::NoRecords => f.write_str("no records"),
            Termination::Extraction(e) => write!(f, "extraction failed: {}", e),
            Termination::Transport(e) => write!(f, "listing fetch failed: {}", e),
            Termination::HttpStatus(s) => write!(f, "listing fetch returned HTTP {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Extracting,
    Deciding,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Continue { url: Url, page: u32 },
    Terminate(Termination),
}

/// Mutable state of one crawl run. Created at start, dropped at the end.
#[derive(Debug, Clone)]
pub struct PaginationState {
    pub seed: Url,
    pub current_url: Url,
    pub page: u32,
    pub page_cap: u32,
    pub total_results: Option<u64>,
    pub context: RequestContext,
    pub pages_fetched: u32,
    pub phase: Phase,
}

impl PaginationState {
    pub fn new(seed: Url, page_cap: u32, context: RequestContext) -> Self {
        let page = page_param(&seed).unwrap_or(1);
        Self {
            current_url: seed.clone(),
            seed,
            page,
            page_cap,
            total_results: None,
            context,
            pages_fetched: 0,
            phase: Phase::Idle,
        }
    }

    /// Continue iff the page had items and the effective page is below the
    /// cap. The payload's page number never moves the crawl backwards.
    pub fn decide(&self, items_found: bool, reported_page: Option<u32>) -> Decision {
        if !items_found {
            return Decision::Terminate(Termination::NoRecords);
        }
        let current = reported_page.unwrap_or(self.page).max(self.page);
        if current >= self.page_cap {
            return Decision::Terminate(Termination::CapReached);
        }
        let next = current + 1;
        Decision::Continue {
            url: with_page(&self.current_url, next),
            page: next,
        }
    }

    fn advance(&mut self, url: Url, page: u32, context: RequestContext) {
        self.current_url = url;
        self.page = page;
        self.context = context;
    }
}

/// Parse the seed and check it is a listing URL of the expected site.
pub fn validate_seed(seed: &str, host_marker: &str, path_prefix: &str) -> Result<Url, CrawlError> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(CrawlError::InvalidInput("no seed URL provided".into()));
    }
    let url = Url::parse(seed)
        .map_err(|e| CrawlError::InvalidInput(format!("unparsable seed URL {}: {}", seed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::InvalidInput(format!(
            "unsupported scheme in {}",
            seed
        )));
    }
    let host = url.host_str().unwrap_or_default();
    if !host.contains(host_marker) || !url.path().starts_with(path_prefix) {
        return Err(CrawlError::InvalidInput(format!(
            "{} is not a listing URL (expected host {}* and path {}*)",
            seed, host_marker, path_prefix
        )));
    }
    Ok(url)
}

/// `scheme://host[:port]` of a URL.
pub fn site_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn page_param(url: &Url) -> Option<u32> {
    url.query_pairs()
        .find(|(k, _)| k == PAGE_PARAM)
        .and_then(|(_, v)| v.parse().ok())
}

/// Replace the `page` query parameter, or append it when absent.
pub fn with_page(url: &Url, page: u32) -> Url {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    match pairs.iter_mut().find(|(k, _)| k == PAGE_PARAM) {
        Some(pair) => pair.1 = page.to_string(),
        None => pairs.push((PAGE_PARAM.to_string(), page.to_string())),
    }
    let mut next = url.clone();
    next.query_pairs_mut().clear().extend_pairs(pairs);
    next
}

pub struct PaginationController {
    fetcher: Arc<dyn Fetcher>,
    extractor: PayloadExtractor,
}

impl PaginationController {
    pub fn new(fetcher: Arc<dyn Fetcher>, extractor: PayloadExtractor) -> Self {
        Self { fetcher, extractor }
    }

    /// Drive the crawl until it terminates. `on_items` receives each page's
    /// raw items together with the request context the page left behind; it
    /// must not block, the next page is fetched as soon as it returns.
    #[instrument(skip_all, fields(seed = %state.seed))]
    pub async fn run<F>(&self, state: &mut PaginationState, mut on_items: F) -> Termination
    where
        F: FnMut(Vec<Value>, &RequestContext),
    {
        let termination = loop {
            if state.page > state.page_cap {
                break Termination::CapReached;
            }

            state.phase = Phase::Fetching;
            info!(page = state.page, url = %state.current_url, "fetching listing page");
            let request = state.context.request(state.current_url.clone());
            let response = match self.fetcher.fetch(&request).await {
                Ok(resp) => resp,
                Err(err) => {
                    error!(page = state.page, url = %state.current_url, %err, "listing fetch failed");
                    break Termination::Transport(err);
                }
            };
            state.pages_fetched += 1;
            if !response.is_success() {
                error!(page = state.page, url = %state.current_url, status = response.status, "listing fetch returned error status");
                break Termination::HttpStatus(response.status);
            }
            let next_context = state.context.carry_forward(&response);

            state.phase = Phase::Extracting;
            let (items_found, reported_page) = match self.extractor.extract(&response.body) {
                Ok(Extracted::Page(page)) => {
                    debug!(page = state.page, items = page.items.len(), total = ?page.total_results, "extracted listing page");
                    if page.total_results.is_some() {
                        state.total_results = page.total_results;
                    }
                    let reported = page.current_page;
                    on_items(page.items, &next_context);
                    (true, reported)
                }
                Ok(Extracted::NoRecords { current_page }) => (false, current_page),
                Err(err) => {
                    error!(page = state.page, url = %state.current_url, %err, "failed to extract listing payload");
                    break Termination::Extraction(err);
                }
            };

            state.phase = Phase::Deciding;
            match state.decide(items_found, reported_page) {
                Decision::Continue { url, page } => state.advance(url, page, next_context),
                Decision::Terminate(t) => break t,
            }
        };
        state.phase = Phase::Terminated;
        info!(pages = state.pages_fetched, %termination, "pagination finished");
        termination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "https://www.aliexpress.com/w/wholesale-widgets.html?SearchText=widgets";

    fn state(cap: u32) -> PaginationState {
        PaginationState::new(Url::parse(SEED).unwrap(), cap, RequestContext::default())
    }

    #[test]
    fn seed_validation() {
        assert!(validate_seed(SEED, "www.aliexpress", "/w/wholesale").is_ok());
        for bad in [
            "",
            "not a url",
            "ftp://www.aliexpress.com/w/wholesale-x.html",
            "https://www.aliexpress.com/item/1.html",
            "https://shop.example.com/w/wholesale-x.html",
        ] {
            let err = validate_seed(bad, "www.aliexpress", "/w/wholesale").unwrap_err();
            assert!(matches!(err, CrawlError::InvalidInput(_)), "{}", bad);
        }
    }

    #[test]
    fn with_page_appends_or_substitutes() {
        let url = Url::parse(SEED).unwrap();
        let next = with_page(&url, 2);
        assert_eq!(
            next.as_str(),
            "https://www.aliexpress.com/w/wholesale-widgets.html?SearchText=widgets&page=2"
        );
        let again = with_page(&next, 3);
        assert_eq!(
            again.as_str(),
            "https://www.aliexpress.com/w/wholesale-widgets.html?SearchText=widgets&page=3"
        );

        let bare = Url::parse("https://www.aliexpress.com/w/wholesale-x.html").unwrap();
        assert_eq!(with_page(&bare, 2).query(), Some("page=2"));
    }

    #[test]
    fn site_origin_keeps_scheme_and_host() {
        assert_eq!(site_origin(&Url::parse(SEED).unwrap()), "https://www.aliexpress.com");
    }

    #[test]
    fn state_starts_at_seed_page() {
        assert_eq!(state(60).page, 1);
        let seeded = PaginationState::new(
            Url::parse(&format!("{}&page=7", SEED)).unwrap(),
            60,
            RequestContext::default(),
        );
        assert_eq!(seeded.page, 7);
        assert_eq!(seeded.phase, Phase::Idle);
    }

    #[test]
    fn decide_continues_below_cap() {
        let s = state(60);
        match s.decide(true, Some(1)) {
            Decision::Continue { url, page } => {
                assert_eq!(page, 2);
                assert!(url.as_str().ends_with("page=2"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decide_stops_on_empty_page_or_cap() {
        let s = state(60);
        assert_eq!(s.decide(false, Some(1)), Decision::Terminate(Termination::NoRecords));
        assert_eq!(s.decide(true, Some(60)), Decision::Terminate(Termination::CapReached));
        assert_eq!(s.decide(true, Some(75)), Decision::Terminate(Termination::CapReached));
        assert_eq!(state(1).decide(true, None), Decision::Terminate(Termination::CapReached));
    }

    #[test]
    fn decide_never_rewinds() {
        let mut s = state(60);
        s.page = 5;
        match s.decide(true, Some(1)) {
            Decision::Continue { page, .. } => assert_eq!(page, 6),
            other => panic!("unexpected {:?}", other),
        }
    }
}
