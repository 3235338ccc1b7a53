//! Column-level view of a product row.
//!
//! The upsert compares these values against the stored row one column at a
//! time; `id` and `last_scrape_date` are handled separately.

use crate::model::Product;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Real(Option<f64>),
    Integer(Option<i64>),
}

impl ColumnValue {
    /// Read the stored value of `column` with the same type as `self`.
    pub fn read_stored(&self, row: &SqliteRow, column: &str) -> Result<ColumnValue, sqlx::Error> {
        Ok(match self {
            ColumnValue::Text(_) => ColumnValue::Text(row.try_get(column)?),
            ColumnValue::Real(_) => ColumnValue::Real(row.try_get(column)?),
            ColumnValue::Integer(_) => ColumnValue::Integer(row.try_get(column)?),
        })
    }
}

/// Every diffable column of `product`, in schema order.
pub fn product_columns(product: &Product) -> Result<Vec<(&'static str, ColumnValue)>, serde_json::Error> {
    use ColumnValue::*;
    Ok(vec![
        ("sku_id", Text(product.sku_id.clone())),
        ("title", Text(Some(product.title.clone()))),
        ("main_image", Text(product.main_image.clone())),
        ("images", Text(Some(serde_json::to_string(&product.images)?))),
        ("url", Text(Some(product.url.clone()))),
        ("sale_price", Real(product.sale_price)),
        ("original_price", Real(product.original_price)),
        ("discount", Real(product.discount)),
        ("currency", Text(Some(product.currency.clone()))),
        ("trade_count", Integer(product.trade_count)),
        ("total_sales", Integer(product.total_sales)),
        ("store_name", Text(product.store_name.clone())),
        ("store_url", Text(product.store_url.clone())),
        ("star_rating", Real(product.star_rating)),
        ("number_reviews", Integer(product.number_reviews)),
        ("scrape_status", Text(Some(product.scrape_status.as_str().to_string()))),
    ])
}

/// What a single upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// Existing row; `changed` lists the columns rewritten besides
    /// `last_scrape_date`, which is always refreshed.
    Updated { changed: Vec<&'static str> },
}
