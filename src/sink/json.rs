//! Batched JSON-array file sink.
//!
//! Records are queued and the whole document is rewritten every
//! `batch_size` records and on close. A crash between flushes loses the
//! queued records.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ProductSink;
use crate::error::PersistenceError;
use crate::model::Product;

#[derive(Debug, Default)]
struct State {
    /// Contents of the file as of the last flush.
    document: Vec<Product>,
    queue: Vec<Product>,
}

pub struct JsonSink {
    path: PathBuf,
    batch_size: usize,
    state: Mutex<State>,
}

impl JsonSink {
    /// Load `path` when it exists, otherwise create it holding `[]`.
    pub async fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let document = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).await?;
                    }
                }
                fs::write(&path, "[]").await?;
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), records = document.len(), "opened JSON sink");
        Ok(Self {
            path,
            batch_size: batch_size.max(1),
            state: Mutex::new(State {
                document,
                queue: Vec::new(),
            }),
        })
    }

    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn flush(&self, state: &mut State) -> Result<(), PersistenceError> {
        if state.queue.is_empty() {
            return Ok(());
        }
        let mut document = state.document.clone();
        document.extend(state.queue.iter().cloned());
        let rendered = serde_json::to_string_pretty(&document)?;
        fs::write(&self.path, rendered).await?;
        info!(path = %self.path.display(), flushed = state.queue.len(), total = document.len(), "flushed JSON batch");
        state.document = document;
        state.queue.clear();
        Ok(())
    }
}

#[async_trait]
impl ProductSink for JsonSink {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn accept(&self, product: &Product) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;

        if let Some(pos) = state.document.iter().position(|p| p.id == product.id) {
            if state.document[pos] == *product {
                return Ok(());
            }
            state.document[pos] = product.clone();
            let rendered = serde_json::to_string_pretty(&state.document)?;
            fs::write(&self.path, rendered).await?;
            debug!(id = %product.id, "replaced existing JSON record");
            return Ok(());
        }

        match state.queue.iter().position(|p| p.id == product.id) {
            Some(pos) => state.queue[pos] = product.clone(),
            None => state.queue.push(product.clone()),
        }
        if state.queue.len() >= self.batch_size {
            self.flush(&mut state).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        self.flush(&mut state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScrapeStatus;
    use chrono::Utc;

    fn product(id: &str, title: &str) -> Product {
        Product {
            id: id.into(),
            sku_id: None,
            title: title.into(),
            main_image: None,
            images: vec![],
            url: format!("https://www.aliexpress.com/item/{}", id),
            sale_price: Some(1.5),
            original_price: None,
            discount: Some(0.0),
            currency: "USD".into(),
            trade_count: None,
            total_sales: None,
            store_name: None,
            store_url: None,
            star_rating: None,
            number_reviews: None,
            last_scrape_date: Utc::now(),
            scrape_status: ScrapeStatus::Successful,
        }
    }

    async fn read(path: &Path) -> Vec<Product> {
        serde_json::from_str(&fs::read_to_string(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn open_creates_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/products.json");
        let sink = JsonSink::open(&path, 3).await.unwrap();
        assert_eq!(sink.queued().await, 0);
        assert!(read(&path).await.is_empty());
    }

    #[tokio::test]
    async fn flushes_every_batch_and_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let sink = JsonSink::open(&path, 2).await.unwrap();

        sink.accept(&product("1", "a")).await.unwrap();
        assert!(read(&path).await.is_empty());
        sink.accept(&product("2", "b")).await.unwrap();
        assert_eq!(read(&path).await.len(), 2);

        sink.accept(&product("3", "c")).await.unwrap();
        assert_eq!(sink.queued().await, 1);
        sink.close().await.unwrap();

        let ids: Vec<String> = read(&path).await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn duplicates_replace_instead_of_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let sink = JsonSink::open(&path, 10).await.unwrap();

        sink.accept(&product("1", "first")).await.unwrap();
        sink.accept(&product("1", "second")).await.unwrap();
        assert_eq!(sink.queued().await, 1);
        sink.close().await.unwrap();

        let sink = JsonSink::open(&path, 10).await.unwrap();
        sink.accept(&product("1", "third")).await.unwrap();
        assert_eq!(sink.queued().await, 0);
        let stored = read(&path).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "third");
    }

    #[tokio::test]
    async fn rescrape_refreshes_stored_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let sink = JsonSink::open(&path, 1).await.unwrap();
        let p = product("7", "same");
        sink.accept(&p).await.unwrap();

        let mut later = p.clone();
        later.last_scrape_date = p.last_scrape_date + chrono::Duration::hours(24);
        sink.accept(&later).await.unwrap();
        sink.close().await.unwrap();

        let stored = read(&path).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].last_scrape_date, later.last_scrape_date);
    }

    #[tokio::test]
    async fn identical_record_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let sink = JsonSink::open(&path, 1).await.unwrap();
        let p = product("7", "same");
        sink.accept(&p).await.unwrap();
        let before = fs::read_to_string(&path).await.unwrap();

        sink.accept(&p).await.unwrap();
        assert_eq!(sink.queued().await, 0);
        assert_eq!(fs::read_to_string(&path).await.unwrap(), before);
    }
}
