//! Destinations for finalized products.
//!
//! Every sink is owned by the single persistence task of a run, so
//! implementations see records strictly one at a time.
use async_trait::async_trait;
use tracing::{debug, info};

use crate::db::{self, Pool, WriteOutcome};
use crate::error::PersistenceError;
use crate::model::Product;

pub mod json;

pub use json::JsonSink;

#[async_trait]
pub trait ProductSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist one record. An error affects this record only.
    async fn accept(&self, product: &Product) -> Result<(), PersistenceError>;

    /// Orderly shutdown; flush anything buffered.
    async fn close(&self) -> Result<(), PersistenceError>;
}

/// Change-aware upsert into the `products` table.
pub struct SqliteSink {
    pool: Pool,
}

impl SqliteSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn accept(&self, product: &Product) -> Result<(), PersistenceError> {
        match db::upsert_product(&self.pool, product).await? {
            WriteOutcome::Inserted => info!(id = %product.id, "inserted product"),
            WriteOutcome::Updated { changed } if changed.is_empty() => {
                debug!(id = %product.id, "product unchanged")
            }
            WriteOutcome::Updated { changed } => {
                info!(id = %product.id, ?changed, "updated product")
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        self.pool.close().await;
        Ok(())
    }
}
