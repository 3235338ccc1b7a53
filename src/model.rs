use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Successful,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Successful => "successful",
            ScrapeStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "successful" => Some(ScrapeStatus::Successful),
            "failed" => Some(ScrapeStatus::Failed),
            _ => None,
        }
    }
}

/// One listing entry as persisted by every sink.
///
/// Serialized field names follow the camelCase document schema; `images`
/// always serializes as an array, never `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub sku_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub main_image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    pub currency: String,
    #[serde(default)]
    pub trade_count: Option<i64>,
    #[serde(default)]
    pub total_sales: Option<i64>,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub star_rating: Option<f64>,
    #[serde(default)]
    pub number_reviews: Option<i64>,
    pub last_scrape_date: DateTime<Utc>,
    pub scrape_status: ScrapeStatus,
}

impl Product {
    /// Same record ignoring `last_scrape_date`, which changes on every scrape.
    pub fn same_content(&self, other: &Product) -> bool {
        let mut a = self.clone();
        a.last_scrape_date = other.last_scrape_date;
        &a == other
    }
}
