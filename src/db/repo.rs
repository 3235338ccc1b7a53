use super::model::{product_columns, ColumnValue, WriteOutcome};
use crate::error::PersistenceError;
use crate::model::{Product, ScrapeStatus};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// Single-connection pool: the upsert writer is the only writer of a run.
pub async fn init_pool(database_url: &str) -> Result<Pool, PersistenceError> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), PersistenceError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: ColumnValue) {
    match value {
        ColumnValue::Text(v) => qb.push_bind(v),
        ColumnValue::Real(v) => qb.push_bind(v),
        ColumnValue::Integer(v) => qb.push_bind(v),
    };
}

/// Insert `product`, or update only the columns that differ from the stored
/// row. `last_scrape_date` is refreshed on every call and strictly increases
/// per id. Lookup and write share one transaction.
#[instrument(skip_all, fields(id = %product.id))]
pub async fn upsert_product(pool: &Pool, product: &Product) -> Result<WriteOutcome, PersistenceError> {
    let columns = product_columns(product)?;
    let mut tx = pool.begin().await?;

    let existing = sqlx::query("SELECT * FROM products WHERE id = ?")
        .bind(&product.id)
        .fetch_optional(&mut *tx)
        .await?;

    let outcome = match existing {
        None => {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO products (id");
            for (name, _) in &columns {
                qb.push(", ").push(*name);
            }
            qb.push(", last_scrape_date) VALUES (");
            qb.push_bind(product.id.clone());
            for (_, value) in columns {
                qb.push(", ");
                push_value(&mut qb, value);
            }
            qb.push(", ").push_bind(Utc::now()).push(")");
            qb.build().execute(&mut *tx).await?;
            WriteOutcome::Inserted
        }
        Some(row) => {
            let previous: DateTime<Utc> = row.try_get("last_scrape_date")?;
            let mut changed = Vec::new();
            let mut updates = Vec::new();
            for (name, value) in columns {
                if value.read_stored(&row, name)? != value {
                    changed.push(name);
                    updates.push((name, value));
                }
            }

            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE products SET ");
            for (name, value) in updates {
                qb.push(name).push(" = ");
                push_value(&mut qb, value);
                qb.push(", ");
            }
            qb.push("last_scrape_date = ").push_bind(next_timestamp(previous, Utc::now()));
            qb.push(" WHERE id = ").push_bind(product.id.clone());
            qb.build().execute(&mut *tx).await?;
            WriteOutcome::Updated { changed }
        }
    };

    tx.commit().await?;
    debug!(?outcome, "product written");
    Ok(outcome)
}

/// `now`, or just past `previous` when the clock has not moved forward.
fn next_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, PersistenceError> {
    let images: String = row.try_get("images")?;
    let status: String = row.try_get("scrape_status")?;
    Ok(Product {
        id: row.try_get("id")?,
        sku_id: row.try_get("sku_id")?,
        title: row.try_get("title")?,
        main_image: row.try_get("main_image")?,
        images: serde_json::from_str(&images)?,
        url: row.try_get("url")?,
        sale_price: row.try_get("sale_price")?,
        original_price: row.try_get("original_price")?,
        discount: row.try_get("discount")?,
        currency: row.try_get("currency")?,
        trade_count: row.try_get("trade_count")?,
        total_sales: row.try_get("total_sales")?,
        store_name: row.try_get("store_name")?,
        store_url: row.try_get("store_url")?,
        star_rating: row.try_get("star_rating")?,
        number_reviews: row.try_get("number_reviews")?,
        last_scrape_date: row.try_get("last_scrape_date")?,
        scrape_status: ScrapeStatus::parse_status(&status).unwrap_or(ScrapeStatus::Failed),
    })
}

#[instrument(skip_all)]
pub async fn get_product(pool: &Pool, id: &str) -> Result<Option<Product>, PersistenceError> {
    let row = sqlx::query("SELECT * FROM products WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(product_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn count_products(pool: &Pool) -> Result<i64, PersistenceError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
