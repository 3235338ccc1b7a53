//! Pure field conversions from the loosely typed listing payload.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde_json::Value;

use crate::error::FieldExtractionError;
use crate::model::{Product, ScrapeStatus};

static LEADING_COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\+?").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Leading run of digits, optionally followed by `+` (`"1000+ sold"` -> 1000).
pub fn extract_leading_count(text: &str) -> Option<i64> {
    LEADING_COUNT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// [`extract_leading_count`] over a JSON string or number.
pub fn count_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => extract_leading_count(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
        _ => None,
    }
}

/// Numeric conversion that never fails loudly.
pub fn cast_decimal(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Strip tags, drop escape characters, then decode HTML entities.
///
/// Entity decoding runs last so that `&lt;b&gt;` survives as literal text.
pub fn clean_text(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    let unescaped: String = stripped
        .chars()
        .filter(|c| !matches!(c, '\n' | '\t' | '\r'))
        .collect();
    // Any `<` left is literal text; keep the fragment parser from eating it.
    let fragment = Html::parse_fragment(&unescaped.replace('<', "&lt;"));
    let decoded: String = fragment.root_element().text().collect();
    decoded.trim().to_string()
}

/// Protocol-relative asset URLs (`//ae01.alicdn.com/...`) become `https:` URLs.
pub fn absolutize(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        None
    } else if url.starts_with("//") {
        Some(format!("https:{}", url))
    } else {
        Some(url.to_string())
    }
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Map one raw item object to a partial [`Product`].
///
/// `site_origin` is `scheme://host` of the seed URL and is used to build the
/// canonical product address. Items lacking `id`, `title` or `currency` are
/// rejected.
pub fn product_from_item(
    item: &Value,
    site_origin: &str,
    now: DateTime<Utc>,
) -> Result<Product, FieldExtractionError> {
    let id = item
        .get("productId")
        .and_then(string_or_number)
        .ok_or(FieldExtractionError::MissingField("productId"))?;

    let raw_title = non_empty_str(item.pointer("/title/displayTitle"))
        .ok_or(FieldExtractionError::MissingField("title.displayTitle"))?;
    let title = clean_text(raw_title);
    if title.is_empty() {
        return Err(FieldExtractionError::InvalidField {
            field: "title.displayTitle",
            value: raw_title.to_string(),
        });
    }

    let currency = non_empty_str(item.pointer("/prices/salePrice/currencyCode"))
        .ok_or(FieldExtractionError::MissingField("prices.salePrice.currencyCode"))?;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(FieldExtractionError::InvalidField {
            field: "prices.salePrice.currencyCode",
            value: currency.to_string(),
        });
    }

    let images = item
        .get("images")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|img| img.get("imgUrl").and_then(Value::as_str))
                .filter_map(absolutize)
                .collect()
        })
        .unwrap_or_default();

    let discount = item
        .pointer("/prices/salePrice/discount")
        .map(cast_decimal)
        .unwrap_or(Some(0.0));

    Ok(Product {
        url: format!("{}/item/{}", site_origin.trim_end_matches('/'), id),
        id,
        sku_id: item.pointer("/prices/skuId").and_then(string_or_number),
        title,
        main_image: non_empty_str(item.pointer("/image/imgUrl")).and_then(absolutize),
        images,
        sale_price: item.pointer("/prices/salePrice/minPrice").and_then(cast_decimal),
        original_price: item
            .pointer("/prices/originalPrice/minPrice")
            .and_then(cast_decimal),
        discount,
        currency: currency.to_ascii_uppercase(),
        trade_count: item.pointer("/trade/realTradeCount").and_then(count_from_value),
        total_sales: item.pointer("/trade/tradeDesc").and_then(count_from_value),
        store_name: non_empty_str(item.pointer("/store/storeName")).map(str::to_string),
        store_url: non_empty_str(item.pointer("/store/storeUrl")).and_then(absolutize),
        star_rating: item.pointer("/evaluation/starRating").and_then(cast_decimal),
        number_reviews: None,
        last_scrape_date: now,
        scrape_status: ScrapeStatus::Successful,
    })
}
