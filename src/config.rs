//! Configuration loader and validator for the listing scraper.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub crawl: Crawl,
    pub http: Http,
    pub sinks: Sinks,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Pagination and enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Crawl {
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,
    pub host_marker: String,
    pub path_prefix: String,
    pub payload_marker: String,
    #[serde(default = "default_enrichment_concurrency")]
    pub enrichment_concurrency: usize,
    /// Review endpoint; `{id}` is replaced by the product id.
    pub review_url: String,
    #[serde(default = "default_review_count_pointer")]
    pub review_count_pointer: String,
}

/// Static request decoration handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

/// Persistence targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sinks {
    #[serde(default = "default_true")]
    pub sqlite: bool,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_page_cap() -> u32 {
    60
}

fn default_enrichment_concurrency() -> usize {
    3
}

fn default_review_count_pointer() -> String {
    "/displayMessage/numRatings".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    10
}

pub const MAX_ENRICHMENT_CONCURRENCY: usize = 8;

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins, then `app.database_url`, then a file in `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| {
                format!(
                    "sqlite://{}/products.db",
                    self.app.data_dir.trim_end_matches('/')
                )
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.crawl.page_cap == 0 {
        return Err(ConfigError::Invalid("crawl.page_cap must be >= 1"));
    }
    if cfg.crawl.host_marker.trim().is_empty() {
        return Err(ConfigError::Invalid("crawl.host_marker must be non-empty"));
    }
    if !cfg.crawl.path_prefix.starts_with('/') {
        return Err(ConfigError::Invalid("crawl.path_prefix must start with '/'"));
    }
    if cfg.crawl.payload_marker.trim().is_empty() {
        return Err(ConfigError::Invalid("crawl.payload_marker must be non-empty"));
    }
    if cfg.crawl.enrichment_concurrency == 0
        || cfg.crawl.enrichment_concurrency > MAX_ENRICHMENT_CONCURRENCY
    {
        return Err(ConfigError::Invalid(
            "crawl.enrichment_concurrency must be between 1 and 8",
        ));
    }
    if !cfg.crawl.review_url.contains("{id}") {
        return Err(ConfigError::Invalid("crawl.review_url must contain {id}"));
    }
    if !cfg.crawl.review_count_pointer.starts_with('/') {
        return Err(ConfigError::Invalid(
            "crawl.review_count_pointer must be a JSON pointer",
        ));
    }

    if cfg.http.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("http.user_agent must be non-empty"));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(ConfigError::Invalid("http.timeout_secs must be > 0"));
    }

    if cfg.sinks.batch_size == 0 {
        return Err(ConfigError::Invalid("sinks.batch_size must be >= 1"));
    }
    let json_enabled = cfg
        .sinks
        .json_path
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    if !cfg.sinks.sqlite && !json_enabled {
        return Err(ConfigError::Invalid(
            "sinks: enable sqlite or set json_path",
        ));
    }

    Ok(())
}

/// Returns an example YAML document covering every key.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

crawl:
  page_cap: 60
  host_marker: "www.aliexpress"
  path_prefix: "/w/wholesale"
  payload_marker: "window._dida_config_ ="
  enrichment_concurrency: 3
  review_url: "https://feedback.aliexpress.com/pc/searchEvaluation.do?productId={id}"
  review_count_pointer: "/displayMessage/numRatings"

http:
  user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
  timeout_secs: 30
  headers:
    accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
    accept-language: "en-US,en;q=0.9"
  cookies:
    aep_usuc_f: "glo&province=&city=&c_tp=USD&region=US&b_locale=en_US&ae_u_p_s=2"

sinks:
  sqlite: true
  json_path: "./data/products.json"
  batch_size: 10
"#
}
